//! Bounded, immediate retry of one unit invocation.
//!
//! The attempt counter lives on the stack of [`RetryPolicy::run`]: it is scoped
//! to a single message and never written into the payload or headers.

use crate::error::{ExhaustedRetryError, ProcessingError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default number of attempts per message.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// How many times a unit is invoked for one message before giving up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
  /// Total attempts, including the first. Zero is treated as one.
  pub max_attempts: u32,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: DEFAULT_MAX_ATTEMPTS,
    }
  }
}

impl RetryPolicy {
  /// A policy allowing `max_attempts` invocations.
  pub fn new(max_attempts: u32) -> Self {
    Self { max_attempts }
  }

  /// A single attempt, no retry.
  pub fn no_retry() -> Self {
    Self::new(1)
  }

  /// Effective attempt limit.
  pub fn max_attempts(&self) -> u32 {
    self.max_attempts.max(1)
  }

  /// Invoke `op` until it succeeds or the attempt limit is reached.
  ///
  /// `op` receives the 1-based attempt number. Retries are immediate.
  pub fn run<T, F>(&self, unit: &str, mut op: F) -> Result<T, ExhaustedRetryError>
  where
    F: FnMut(u32) -> Result<T, ProcessingError>,
  {
    let limit = self.max_attempts();
    let mut attempt = 0;
    loop {
      attempt += 1;
      match op(attempt) {
        Ok(value) => return Ok(value),
        Err(cause) if attempt >= limit => {
          return Err(ExhaustedRetryError {
            unit: unit.to_string(),
            attempts: attempt,
            cause,
          });
        }
        Err(cause) => {
          debug!(unit = %unit, attempt, limit, error = %cause, "attempt failed, retrying");
        }
      }
    }
  }
}
