//! Handling of messages whose retries were exhausted.
//!
//! At most one [`ErrorHandler`] is installed per runtime. Without one, the
//! [`LoggingErrorHandler`] logs the failure and drops the message. Handlers are
//! the extension point for dead-letter routing; [`DeadLetterQueue`] keeps failed
//! messages in memory for later inspection or replay.

use crate::error::ExhaustedRetryError;
use crate::message::Message;
use crate::unit::SinkFn;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Header naming the unit that failed.
pub const ERROR_UNIT_HEADER: &str = "error-unit";
/// Header carrying the number of attempts made.
pub const ERROR_ATTEMPTS_HEADER: &str = "error-attempts";
/// Header carrying the last failure.
pub const ERROR_CAUSE_HEADER: &str = "error-cause";

/// A failed message together with its failure metadata.
#[derive(Clone, Debug)]
pub struct ErrorMessage {
  /// The input message that could not be processed.
  pub failed: Message,
  /// Why processing gave up.
  pub error: ExhaustedRetryError,
  /// When retries were exhausted.
  pub timestamp: DateTime<Utc>,
}

impl ErrorMessage {
  /// Wrap a failure.
  pub fn new(failed: Message, error: ExhaustedRetryError) -> Self {
    Self {
      failed,
      error,
      timestamp: Utc::now(),
    }
  }

  /// The failed message with the failure metadata added as headers.
  pub fn to_message(&self) -> Message {
    self
      .failed
      .to_builder()
      .set_header(ERROR_UNIT_HEADER, self.error.unit.clone())
      .set_header(ERROR_ATTEMPTS_HEADER, self.error.attempts.to_string())
      .set_header(ERROR_CAUSE_HEADER, self.error.cause.to_string())
      .build()
  }
}

/// Receives every message whose retries were exhausted.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
  /// Handle one failure. Called exactly once per failed message.
  async fn handle(&self, error: ErrorMessage);
}

/// Logs and drops.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingErrorHandler;

#[async_trait]
impl ErrorHandler for LoggingErrorHandler {
  async fn handle(&self, error: ErrorMessage) {
    warn!(
      unit = %error.error.unit,
      attempts = error.error.attempts,
      id = %error.failed.id(),
      cause = %error.error.cause,
      "dropping message after exhausted retries"
    );
  }
}

/// Routes failures into a registered sink unit.
///
/// The sink receives [`ErrorMessage::to_message`]. If the sink itself fails the
/// failure is logged and the message dropped; it is never retried or re-routed.
#[derive(Clone)]
pub struct SinkErrorHandler {
  name: String,
  sink: SinkFn,
}

impl SinkErrorHandler {
  /// Wrap the sink function of unit `name`.
  pub fn new(name: impl Into<String>, sink: SinkFn) -> Self {
    Self {
      name: name.into(),
      sink,
    }
  }
}

#[async_trait]
impl ErrorHandler for SinkErrorHandler {
  async fn handle(&self, error: ErrorMessage) {
    debug!(handler = %self.name, unit = %error.error.unit, "routing failure to error handler");
    if let Err(e) = (self.sink)(&error.to_message()) {
      warn!(handler = %self.name, error = %e, "error handler failed, dropping message");
    }
  }
}

/// Collects failed messages in memory.
#[derive(Clone, Debug, Default)]
pub struct DeadLetterQueue {
  queue: Arc<Mutex<Vec<ErrorMessage>>>,
}

impl DeadLetterQueue {
  /// An empty queue.
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of collected failures.
  pub async fn len(&self) -> usize {
    self.queue.lock().await.len()
  }

  /// Whether nothing was collected.
  pub async fn is_empty(&self) -> bool {
    self.queue.lock().await.is_empty()
  }

  /// Copies of every collected failure, oldest first.
  pub async fn items(&self) -> Vec<ErrorMessage> {
    self.queue.lock().await.clone()
  }

  /// Remove and return every collected failure, oldest first.
  pub async fn drain(&self) -> Vec<ErrorMessage> {
    std::mem::take(&mut *self.queue.lock().await)
  }
}

#[async_trait]
impl ErrorHandler for DeadLetterQueue {
  async fn handle(&self, error: ErrorMessage) {
    self.queue.lock().await.push(error);
  }
}
