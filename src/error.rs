//! # Error Handling
//!
//! Error taxonomy for binding, dispatching and polling processing units.
//!
//! ## Overview
//!
//! - **[`ConfigurationError`]**: invalid or conflicting binding declarations. Fatal
//!   at startup, or at the first dispatch on a channel when the conflict depends
//!   on payload shapes.
//! - **[`ProcessingError`]**: a unit's function failed for one invocation. Recoverable
//!   through the unit's [`RetryPolicy`](crate::retry::RetryPolicy).
//! - **[`ExhaustedRetryError`]**: every attempt allowed by the retry policy failed.
//!   The message is routed to the error handler, or logged and dropped.
//! - **[`StreamFnError`]**: crate-level wrapper used by the runtime and the binary.
//!
//! Channels are unbounded, so there is no overflow error.

use crate::codec::PayloadShape;
use thiserror::Error;

/// Invalid or conflicting binding declarations.
#[derive(Error, Debug)]
pub enum ConfigurationError {
  /// Two units were registered under the same name.
  #[error("unit `{0}` is already registered")]
  DuplicateUnit(String),

  /// A definition or error handler refers to a unit that was never registered.
  #[error("unit `{0}` is not registered")]
  UnknownUnit(String),

  /// A binding name does not follow `<unit>-<in|out>[-<index>]`.
  #[error("invalid binding name `{0}`")]
  InvalidBindingName(String),

  /// A destination or channel pattern is empty or malformed.
  #[error("invalid destination `{0}`")]
  InvalidDestination(String),

  /// Two units consume the same input channel but decode payloads differently.
  #[error(
    "channel `{channel}` is consumed by `{existing}` as {existing_shape} and by `{unit}` as {shape}"
  )]
  IncompatibleInputs {
    /// Shared input channel.
    channel: String,
    /// Unit that claimed the channel first.
    existing: String,
    /// Payload shape expected by the first unit.
    existing_shape: PayloadShape,
    /// Unit whose claim was rejected.
    unit: String,
    /// Payload shape expected by the rejected unit.
    shape: PayloadShape,
  },

  /// A function definition cannot be composed.
  #[error("cannot compose `{definition}`: {reason}")]
  InvalidComposition {
    /// The `a|b|c` definition being composed.
    definition: String,
    /// Why the members do not chain.
    reason: String,
  },

  /// The error handler definition does not name a sink.
  #[error("error handler `{0}` must be a sink")]
  InvalidErrorHandler(String),

  /// The configuration file could not be read.
  #[error("failed to read configuration: {0}")]
  Io(#[from] std::io::Error),

  /// The configuration document could not be parsed.
  #[error("failed to parse configuration: {0}")]
  Parse(#[from] serde_json::Error),
}

/// A unit's function failed during one invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessingError {
  /// The function itself reported a failure.
  #[error("{0}")]
  Failed(String),

  /// The incoming payload could not be decoded into the function's input type.
  #[error("failed to decode payload as {shape}: {reason}")]
  Decode {
    /// Expected payload shape.
    shape: PayloadShape,
    /// Decoder message.
    reason: String,
  },

  /// The function's result could not be encoded as a payload.
  #[error("failed to encode payload: {0}")]
  Encode(String),

  /// A member of a composite unit used up its own retries.
  #[error("{0}")]
  Exhausted(Box<ExhaustedRetryError>),
}

impl ProcessingError {
  /// Creates a [`ProcessingError::Failed`] from any message.
  pub fn new(message: impl Into<String>) -> Self {
    ProcessingError::Failed(message.into())
  }
}

/// Every attempt permitted by the retry policy failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unit `{unit}` failed after {attempts} attempt(s): {cause}")]
pub struct ExhaustedRetryError {
  /// Name of the unit that failed.
  pub unit: String,
  /// Number of attempts made for the message.
  pub attempts: u32,
  /// Failure of the last attempt.
  pub cause: ProcessingError,
}

impl ExhaustedRetryError {
  /// The innermost exhausted unit when the cause is itself an exhaustion.
  pub fn flatten(self) -> Self {
    match self.cause {
      ProcessingError::Exhausted(inner) => inner.flatten(),
      _ => self,
    }
  }
}

/// Crate-level error.
#[derive(Error, Debug)]
pub enum StreamFnError {
  /// See [`ConfigurationError`].
  #[error(transparent)]
  Configuration(#[from] ConfigurationError),

  /// See [`ProcessingError`].
  #[error(transparent)]
  Processing(#[from] ProcessingError),

  /// See [`ExhaustedRetryError`].
  #[error(transparent)]
  ExhaustedRetry(#[from] ExhaustedRetryError),

  /// Socket or file I/O failed.
  #[error("i/o error: {0}")]
  Io(#[from] std::io::Error),

  /// A runtime task panicked or was aborted.
  #[error("runtime task failed: {0}")]
  Join(#[from] tokio::task::JoinError),
}

/// Result type defaulting to [`StreamFnError`].
pub type Result<T, E = StreamFnError> = std::result::Result<T, E>;
