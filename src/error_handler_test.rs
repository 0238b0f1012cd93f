use crate::error::{ExhaustedRetryError, ProcessingError};
use crate::error_handler::{
  DeadLetterQueue, ERROR_ATTEMPTS_HEADER, ERROR_CAUSE_HEADER, ERROR_UNIT_HEADER, ErrorHandler,
  ErrorMessage, LoggingErrorHandler, SinkErrorHandler,
};
use crate::message::{Message, MessageBuilder};
use crate::unit::SinkFn;
use std::sync::{Arc, Mutex};

fn failure(payload: &'static str) -> ErrorMessage {
  ErrorMessage::new(
    MessageBuilder::with_payload(payload)
      .set_header("trace", "t-9")
      .build(),
    ExhaustedRetryError {
      unit: "functionWithError".to_string(),
      attempts: 3,
      cause: ProcessingError::new("boom"),
    },
  )
}

#[test]
fn test_to_message_adds_failure_headers() {
  let error = failure("x");
  let msg = error.to_message();

  assert_eq!(msg.payload().as_ref(), b"x");
  assert_eq!(msg.header("trace"), Some("t-9"));
  assert_eq!(msg.header(ERROR_UNIT_HEADER), Some("functionWithError"));
  assert_eq!(msg.header(ERROR_ATTEMPTS_HEADER), Some("3"));
  assert_eq!(msg.header(ERROR_CAUSE_HEADER), Some("boom"));
  assert_eq!(error.failed.header(ERROR_UNIT_HEADER), None);
}

#[tokio::test]
async fn test_dead_letter_queue_collects_in_order() {
  let dlq = DeadLetterQueue::new();
  assert!(dlq.is_empty().await);

  dlq.handle(failure("a")).await;
  dlq.handle(failure("b")).await;

  assert_eq!(dlq.len().await, 2);
  let items = dlq.items().await;
  assert_eq!(items[0].failed.payload().as_ref(), b"a");
  assert_eq!(items[1].failed.payload().as_ref(), b"b");

  assert_eq!(dlq.drain().await.len(), 2);
  assert!(dlq.is_empty().await);
}

#[tokio::test]
async fn test_dead_letter_queue_clones_share_storage() {
  let dlq = DeadLetterQueue::new();
  let handler: Arc<dyn ErrorHandler> = Arc::new(dlq.clone());
  handler.handle(failure("a")).await;
  assert_eq!(dlq.len().await, 1);
}

#[tokio::test]
async fn test_sink_handler_receives_headers() {
  let seen: Arc<Mutex<Vec<Message>>> = Arc::new(Mutex::new(Vec::new()));
  let store = Arc::clone(&seen);
  let sink: SinkFn = Arc::new(move |msg: &Message| {
    store.lock().unwrap().push(msg.clone());
    Ok::<(), ProcessingError>(())
  });
  let handler = SinkErrorHandler::new("myErrorHandler", sink);

  handler.handle(failure("x")).await;

  let seen = seen.lock().unwrap();
  assert_eq!(seen.len(), 1);
  assert_eq!(seen[0].header(ERROR_UNIT_HEADER), Some("functionWithError"));
}

#[tokio::test]
async fn test_failing_sink_handler_is_not_retried() {
  let calls = Arc::new(Mutex::new(0));
  let counter = Arc::clone(&calls);
  let sink: SinkFn = Arc::new(move |_: &Message| {
    *counter.lock().unwrap() += 1;
    Err(ProcessingError::new("handler broke"))
  });

  SinkErrorHandler::new("broken", sink).handle(failure("x")).await;
  assert_eq!(*calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_logging_handler_drops() {
  LoggingErrorHandler.handle(failure("x")).await;
}
