use crate::binding::Binder;
use crate::channel::ChannelRegistry;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::composer::compose_units;
use crate::error::{ConfigurationError, ProcessingError, StreamFnError};
use crate::error_handler::{DeadLetterQueue, ERROR_ATTEMPTS_HEADER, ErrorHandler};
use crate::interceptor::{HeaderInterceptor, InterceptorChain};
use crate::message::{Message, MessageBuilder};
use crate::outbound::Outbound;
use crate::registry::UnitRegistry;
use crate::retry::RetryPolicy;
use crate::unit::Unit;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Fixture {
  channels: Arc<ChannelRegistry>,
  dispatcher: Dispatcher,
  dlq: DeadLetterQueue,
}

fn fixture(units: Vec<Unit>, binder: Binder, chain: InterceptorChain) -> Fixture {
  let mut registry = UnitRegistry::new();
  for unit in units {
    registry.register(unit).unwrap();
  }
  let channels = Arc::new(ChannelRegistry::new());
  let dlq = DeadLetterQueue::new();
  let dispatcher = Dispatcher::new(
    Arc::new(registry),
    Arc::new(binder),
    Outbound::new(Arc::clone(&channels), Arc::new(chain)),
    Some(Arc::new(dlq.clone()) as Arc<dyn ErrorHandler>),
  );
  Fixture {
    channels,
    dispatcher,
    dlq,
  }
}

fn text(msg: &Message) -> String {
  String::from_utf8(msg.payload().to_vec()).unwrap()
}

#[tokio::test]
async fn test_transform_publishes_with_input_headers() {
  let uppercase = Unit::transform("uppercase", |s: String| s.to_uppercase());
  let f = fixture(vec![uppercase.clone()], Binder::new(), InterceptorChain::new());

  let input = MessageBuilder::with_payload("hello")
    .set_header("trace", "t-1")
    .build();
  let outcome = f.dispatcher.dispatch(&uppercase, input).await;

  assert_eq!(
    outcome,
    DispatchOutcome::Published(vec!["uppercase-out-0".to_string()])
  );
  let out = f.channels.get("uppercase-out-0").unwrap().try_recv().unwrap();
  assert_eq!(text(&out), "HELLO");
  assert_eq!(out.header("trace"), Some("t-1"));
}

#[tokio::test]
async fn test_output_goes_through_interceptors() {
  let reverse = Unit::transform("reverse", |s: String| s.chars().rev().collect::<String>());
  let mut chain = InterceptorChain::new();
  chain
    .intercept("reverse-out-0", HeaderInterceptor::new("Interceptor-Header", "Value"))
    .unwrap();
  let f = fixture(vec![reverse.clone()], Binder::new(), chain);

  f.dispatcher.dispatch(&reverse, Message::new("hello")).await;

  let out = f.channels.get("reverse-out-0").unwrap().try_recv().unwrap();
  assert_eq!(text(&out), "olleh");
  assert_eq!(out.header("Interceptor-Header"), Some("Value"));
}

#[tokio::test]
async fn test_output_override_destination() {
  let uppercase = Unit::transform("uppercase", |s: String| s.to_uppercase());
  let binder = Binder::new().with_destination("uppercase-out-0", "results");
  let f = fixture(vec![uppercase.clone()], binder, InterceptorChain::new());

  f.dispatcher.dispatch(&uppercase, Message::new("a")).await;

  assert_eq!(f.channels.get("results").map(|c| c.len()), Some(1));
  assert!(f.channels.get("uppercase-out-0").is_none());
}

#[tokio::test]
async fn test_sink_consumes() {
  let seen = Arc::new(AtomicUsize::new(0));
  let counter = Arc::clone(&seen);
  let sink = Unit::sink("sink", move |_: String| {
    counter.fetch_add(1, Ordering::SeqCst);
  });
  let f = fixture(vec![sink.clone()], Binder::new(), InterceptorChain::new());

  assert_eq!(
    f.dispatcher.dispatch(&sink, Message::new("x")).await,
    DispatchOutcome::Consumed
  );
  assert_eq!(seen.load(Ordering::SeqCst), 1);
  assert!(f.channels.names().is_empty());
}

#[tokio::test]
async fn test_exhausted_message_goes_to_handler_once() {
  let calls = Arc::new(AtomicUsize::new(0));
  let counter = Arc::clone(&calls);
  let failing = Unit::try_transform("functionWithError", move |_: String| {
    counter.fetch_add(1, Ordering::SeqCst);
    Err::<String, _>(ProcessingError::new("always"))
  });
  let f = fixture(vec![failing.clone()], Binder::new(), InterceptorChain::new());

  let outcome = f.dispatcher.dispatch(&failing, Message::new("x")).await;

  assert!(matches!(outcome, DispatchOutcome::Failed(ref e) if e.attempts == 3));
  assert_eq!(calls.load(Ordering::SeqCst), 3);
  let failures = f.dlq.drain().await;
  assert_eq!(failures.len(), 1);
  assert_eq!(
    failures[0].to_message().header(ERROR_ATTEMPTS_HEADER),
    Some("3")
  );
  assert!(f.channels.get("functionWithError-out-0").is_none());
}

#[tokio::test]
async fn test_binding_max_attempts_overrides_declared_policy() {
  let calls = Arc::new(AtomicUsize::new(0));
  let counter = Arc::clone(&calls);
  let failing = Unit::try_transform("flaky", move |_: String| {
    counter.fetch_add(1, Ordering::SeqCst);
    Err::<String, _>(ProcessingError::new("nope"))
  })
  .with_retry(RetryPolicy::new(5));
  let binder = Binder::new().with_max_attempts("flaky-in-0", 1);
  let f = fixture(vec![failing.clone()], binder, InterceptorChain::new());

  f.dispatcher.dispatch(&failing, Message::new("x")).await;
  assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_post_process_runs_after_append() {
  let channels_seen = Arc::new(AtomicUsize::new(usize::MAX));
  let unit_channels = Arc::new(ChannelRegistry::new());
  let observed = Arc::clone(&channels_seen);
  let registry = Arc::clone(&unit_channels);
  let unit = Unit::transform("uppercasePostProcessingFunction", |s: String| s.to_uppercase())
    .with_post_process(move |published| {
      assert_eq!(published.payload().as_ref(), b"HI");
      let queued = registry
        .get("uppercasePostProcessingFunction-out-0")
        .map(|c| c.len())
        .unwrap_or(0);
      observed.store(queued, Ordering::SeqCst);
    });
  let dispatcher = Dispatcher::new(
    Arc::new(UnitRegistry::new()),
    Arc::new(Binder::new()),
    Outbound::new(unit_channels, Arc::new(InterceptorChain::new())),
    None,
  );

  dispatcher.dispatch(&unit, Message::new("hi")).await;
  assert_eq!(channels_seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_loop_processes_until_shutdown() {
  let uppercase = Unit::transform("uppercase", |s: String| s.to_uppercase());
  let f = fixture(vec![uppercase], Binder::new(), InterceptorChain::new());
  let shutdown = CancellationToken::new();
  let tasks = f.dispatcher.spawn_all(&shutdown);
  assert_eq!(tasks.len(), 1);

  let input = f.channels.get_or_create("uppercase-in-0");
  input.send(Message::new("a"));
  input.send(Message::new("b"));

  let output = f.channels.get_or_create("uppercase-out-0");
  let first = output.recv_timeout(Duration::from_secs(1)).await.unwrap();
  let second = output.recv_timeout(Duration::from_secs(1)).await.unwrap();
  assert_eq!((text(&first), text(&second)), ("A".to_string(), "B".to_string()));

  shutdown.cancel();
  for task in tasks {
    tokio::time::timeout(Duration::from_secs(1), task)
      .await
      .unwrap()
      .unwrap()
      .unwrap();
  }
}

#[tokio::test]
async fn test_sources_get_no_dispatch_loop() {
  let date = Unit::supplier("date", || Some("now".to_string()));
  let f = fixture(vec![date.clone()], Binder::new(), InterceptorChain::new());
  assert!(f.dispatcher.spawn(&date, &CancellationToken::new()).is_empty());
  assert_eq!(
    f.dispatcher.dispatch(&date, Message::new("x")).await,
    DispatchOutcome::Ignored
  );
}

#[test]
fn test_incompatible_consumers_on_shared_destination() {
  let concat = Unit::transform("concat", |items: Vec<String>| items.concat());
  let uppercase = Unit::transform("uppercase", |s: String| s.to_uppercase());
  let binder = Binder::new()
    .with_destination("concat-in-0", "shared")
    .with_destination("uppercase-in-0", "shared");
  let f = fixture(
    vec![concat.clone(), uppercase.clone()],
    binder,
    InterceptorChain::new(),
  );

  assert!(f.dispatcher.claim(&concat, 0, "shared").is_ok());
  assert!(matches!(
    f.dispatcher.claim(&uppercase, 0, "shared"),
    Err(ConfigurationError::IncompatibleInputs { .. })
  ));
}

#[tokio::test]
async fn test_conflicting_loop_fails_and_cancels() {
  let concat = Unit::transform("concat", |items: Vec<String>| items.concat());
  let uppercase = Unit::transform("uppercase", |s: String| s.to_uppercase());
  let binder = Binder::new().with_destination("uppercase-in-0", "concat-in-0");
  let f = fixture(vec![uppercase.clone()], binder, InterceptorChain::new());
  assert!(f.dispatcher.claim(&concat, 0, "concat-in-0").is_ok());

  let shutdown = CancellationToken::new();
  let tasks = f.dispatcher.spawn(&uppercase, &shutdown);
  let input = f.channels.get_or_create("concat-in-0");
  input.send(Message::new("hello"));

  for task in tasks {
    let result = tokio::time::timeout(Duration::from_secs(1), task)
      .await
      .unwrap()
      .unwrap();
    match result {
      Err(StreamFnError::Configuration(ConfigurationError::IncompatibleInputs {
        existing,
        unit,
        ..
      })) => {
        assert_eq!(existing, "concat");
        assert_eq!(unit, "uppercase");
      }
      other => panic!("expected an incompatible-inputs error, got {other:?}"),
    }
  }
  assert!(shutdown.is_cancelled());
  assert_eq!(input.len(), 1);
  assert!(f.channels.get("uppercase-out-0").is_none());
}

#[tokio::test]
async fn test_each_message_gets_fresh_attempts() {
  let calls = Arc::new(AtomicUsize::new(0));
  let counter = Arc::clone(&calls);
  let failing = Unit::try_transform("functionWithError", move |_: String| {
    counter.fetch_add(1, Ordering::SeqCst);
    Err::<String, _>(ProcessingError::new("always"))
  });
  let f = fixture(vec![failing.clone()], Binder::new(), InterceptorChain::new());

  for payload in ["a", "b", "c"] {
    f.dispatcher.dispatch(&failing, Message::new(payload)).await;
  }

  assert_eq!(calls.load(Ordering::SeqCst), 9);
  let failures = f.dlq.drain().await;
  assert_eq!(failures.len(), 3);
  assert!(failures.iter().all(|e| e.error.attempts == 3));
}

#[tokio::test]
async fn test_composite_failure_reports_failing_member() {
  let uppercase = Unit::transform("uppercase", |s: String| s.to_uppercase());
  let failing = Unit::try_transform("functionWithError", |_: String| {
    Err::<String, _>(ProcessingError::new("always"))
  });
  let composite = compose_units("uppercasefunctionWithError", &[uppercase, failing]).unwrap();
  let f = fixture(vec![composite.clone()], Binder::new(), InterceptorChain::new());

  let outcome = f.dispatcher.dispatch(&composite, Message::new("x")).await;

  assert!(matches!(
    outcome,
    DispatchOutcome::Failed(ref e) if e.unit == "functionWithError" && e.attempts == 3
  ));
  let failures = f.dlq.drain().await;
  assert_eq!(failures.len(), 1);
  assert_eq!(failures[0].failed.payload().as_ref(), b"x");
  assert_eq!(
    failures[0].to_message().header(ERROR_ATTEMPTS_HEADER),
    Some("3")
  );
}

#[tokio::test]
async fn test_panicking_unit_counts_as_failure() {
  let panicking = Unit::transform("panics", |_: String| -> String { panic!("boom") });
  let f = fixture(vec![panicking.clone()], Binder::new(), InterceptorChain::new());

  let outcome = f.dispatcher.dispatch(&panicking, Message::new("x")).await;

  assert!(matches!(outcome, DispatchOutcome::Failed(ref e) if e.unit == "panics"));
  assert_eq!(f.dlq.len().await, 1);
}
