use crate::binding::Binder;
use crate::channel::ChannelRegistry;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::error_handler::{DeadLetterQueue, ErrorHandler};
use crate::interceptor::InterceptorChain;
use crate::message::{Message, MessageBuilder};
use crate::outbound::Outbound;
use crate::registry::UnitRegistry;
use crate::unit::Unit;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn dispatcher(units: Vec<Unit>, dlq: &DeadLetterQueue) -> (Dispatcher, Arc<ChannelRegistry>) {
  dispatcher_with(units, Binder::new(), dlq)
}

fn dispatcher_with(
  units: Vec<Unit>,
  binder: Binder,
  dlq: &DeadLetterQueue,
) -> (Dispatcher, Arc<ChannelRegistry>) {
  let mut registry = UnitRegistry::new();
  for unit in units {
    registry.register(unit).unwrap();
  }
  let channels = Arc::new(ChannelRegistry::new());
  let dispatcher = Dispatcher::new(
    Arc::new(registry),
    Arc::new(binder),
    Outbound::new(Arc::clone(&channels), Arc::new(InterceptorChain::new())),
    Some(Arc::new(dlq.clone()) as Arc<dyn ErrorHandler>),
  );
  (dispatcher, channels)
}

fn gather() -> Unit {
  Unit::zip2("gather", |text: String, number: i64| format!("{text}{number}"))
}

fn text(msg: &Message) -> String {
  String::from_utf8(msg.payload().to_vec()).unwrap()
}

#[tokio::test]
async fn test_zip_tuple_uses_port_zero_headers() {
  let dlq = DeadLetterQueue::new();
  let unit = gather();
  let (dispatcher, channels) = dispatcher(vec![unit.clone()], &dlq);

  let left = MessageBuilder::with_payload("Hello").set_header("side", "left").build();
  let right = MessageBuilder::with_payload("0").set_header("side", "right").build();
  let outcome = dispatcher.dispatch_tuple(&unit, vec![left, right]).await;

  assert_eq!(
    outcome,
    DispatchOutcome::Published(vec!["gather-out-0".to_string()])
  );
  let out = channels.get("gather-out-0").unwrap().try_recv().unwrap();
  assert_eq!(text(&out), "Hello0");
  assert_eq!(out.header("side"), Some("left"));
}

#[tokio::test]
async fn test_incomplete_tuple_ignored() {
  let dlq = DeadLetterQueue::new();
  let unit = gather();
  let (dispatcher, _) = dispatcher(vec![unit.clone()], &dlq);
  assert_eq!(
    dispatcher.dispatch_tuple(&unit, vec![Message::new("x")]).await,
    DispatchOutcome::Ignored
  );
}

#[tokio::test]
async fn test_zip_decode_failure_reports_head_message() {
  let dlq = DeadLetterQueue::new();
  let unit = gather();
  let (dispatcher, _) = dispatcher(vec![unit.clone()], &dlq);
  let head = Message::new("Hello");
  let head_id = head.id().clone();

  let outcome = dispatcher
    .dispatch_tuple(&unit, vec![head, Message::new("not a number")])
    .await;

  assert!(matches!(outcome, DispatchOutcome::Failed(_)));
  let failures = dlq.drain().await;
  assert_eq!(failures.len(), 1);
  assert_eq!(failures[0].failed.id(), &head_id);
}

#[tokio::test]
async fn test_zip_loop_waits_for_every_port_and_keeps_surplus() {
  let dlq = DeadLetterQueue::new();
  let (dispatcher, channels) = dispatcher(vec![gather()], &dlq);
  let shutdown = CancellationToken::new();
  let tasks = dispatcher.spawn_all(&shutdown);

  let strings = channels.get_or_create("gather-in-0");
  let numbers = channels.get_or_create("gather-in-1");
  let output = channels.get_or_create("gather-out-0");

  strings.send(Message::new("Hello"));
  strings.send(Message::new("World"));
  assert!(output.recv_timeout(Duration::from_millis(50)).await.is_none());

  numbers.send(Message::new("0"));
  let first = output.recv_timeout(Duration::from_secs(1)).await.unwrap();
  assert_eq!(text(&first), "Hello0");
  assert!(output.recv_timeout(Duration::from_millis(50)).await.is_none());

  numbers.send(Message::new("1"));
  let second = output.recv_timeout(Duration::from_secs(1)).await.unwrap();
  assert_eq!(text(&second), "World1");

  shutdown.cancel();
  for task in tasks {
    task.await.unwrap().unwrap();
  }
}

#[tokio::test]
async fn test_zip_shutdown_returns_partial_tuple() {
  let dlq = DeadLetterQueue::new();
  let (dispatcher, channels) = dispatcher(vec![gather()], &dlq);
  let shutdown = CancellationToken::new();
  let tasks = dispatcher.spawn_all(&shutdown);

  let strings = channels.get_or_create("gather-in-0");
  strings.send(Message::new("Hello"));
  tokio::time::sleep(Duration::from_millis(50)).await;

  shutdown.cancel();
  for task in tasks {
    task.await.unwrap().unwrap();
  }
  assert_eq!(strings.try_recv().map(|m| text(&m)), Some("Hello".to_string()));
}

#[tokio::test]
async fn test_merge_invokes_per_arrival_with_port_index() {
  let dlq = DeadLetterQueue::new();
  let unit = Unit::merge("interleave", 2, |index: usize, s: String| format!("{index}:{s}"));
  let (dispatcher, channels) = dispatcher(vec![unit], &dlq);
  let shutdown = CancellationToken::new();
  let tasks = dispatcher.spawn_all(&shutdown);
  assert_eq!(tasks.len(), 2);

  channels.get_or_create("interleave-in-1").send(Message::new("b"));
  channels.get_or_create("interleave-in-0").send(Message::new("a"));

  let output = channels.get_or_create("interleave-out-0");
  let mut seen = HashSet::new();
  for _ in 0..2 {
    let msg = output.recv_timeout(Duration::from_secs(1)).await.unwrap();
    seen.insert(text(&msg));
  }
  assert_eq!(
    seen,
    HashSet::from(["0:a".to_string(), "1:b".to_string()])
  );

  shutdown.cancel();
  for task in tasks {
    task.await.unwrap().unwrap();
  }
}

#[tokio::test]
async fn test_merge_dispatch_single_message_uses_port_zero() {
  let dlq = DeadLetterQueue::new();
  let unit = Unit::merge("interleave", 2, |index: usize, s: String| format!("{index}:{s}"));
  let (dispatcher, channels) = dispatcher(vec![unit.clone()], &dlq);

  dispatcher.dispatch(&unit, Message::new("x")).await;
  let out = channels.get("interleave-out-0").unwrap().try_recv().unwrap();
  assert_eq!(text(&out), "0:x");
}

#[tokio::test]
async fn test_merge_attempts_follow_port_binding() {
  let dlq = DeadLetterQueue::new();
  let calls = Arc::new(AtomicUsize::new(0));
  let counter = Arc::clone(&calls);
  let unit = Unit::merge("interleave", 2, move |index: usize, s: String| {
    counter.fetch_add(1, Ordering::SeqCst);
    format!("{index}:{s}")
  });
  let binder = Binder::new().with_max_attempts("interleave-in-1", 1);
  let (dispatcher, _) = dispatcher_with(vec![unit.clone()], binder, &dlq);
  let invalid_utf8 = || Message::new(vec![0xff, 0xfe]);

  let outcome = dispatcher.dispatch_arrival(&unit, 1, invalid_utf8()).await;
  assert!(matches!(outcome, DispatchOutcome::Failed(ref e) if e.attempts == 1));

  let outcome = dispatcher.dispatch_arrival(&unit, 0, invalid_utf8()).await;
  assert!(matches!(outcome, DispatchOutcome::Failed(ref e) if e.attempts == 3));

  assert_eq!(calls.load(Ordering::SeqCst), 0);
  assert_eq!(dlq.len().await, 2);
}

#[tokio::test]
async fn test_zip_attempts_use_smallest_port_override() {
  let dlq = DeadLetterQueue::new();
  let unit = gather();
  let binder = Binder::new()
    .with_max_attempts("gather-in-0", 4)
    .with_max_attempts("gather-in-1", 2);
  let (dispatcher, _) = dispatcher_with(vec![unit.clone()], binder, &dlq);

  let outcome = dispatcher
    .dispatch_tuple(&unit, vec![Message::new("Hello"), Message::new("not a number")])
    .await;

  assert!(matches!(outcome, DispatchOutcome::Failed(ref e) if e.attempts == 2));
}
