//! # Dispatcher
//!
//! Drives every unit that has inputs: transforms, sinks and gathers.
//!
//! ## Execution model
//!
//! [`Dispatcher::spawn`] starts one independent task per unit (one per input
//! port for merge gathers). Each task:
//!
//! 1. waits for the next message on the unit's resolved input channel, which
//!    suspends only that task;
//! 2. on the first message, claims the channel with the unit's payload shape
//!    (see [`Binder::claim_input`]); a conflict leaves the message queued,
//!    cancels the whole runtime and ends the task with the
//!    [`ConfigurationError`];
//! 3. invokes the unit under its [`RetryPolicy`](crate::retry::RetryPolicy) on
//!    Tokio's blocking pool, retrying immediately on failure;
//! 4. on success, builds the output message (result payload, input headers),
//!    publishes it through the interceptor chain to every output port, then
//!    runs the unit's post-processing callback with the published message;
//! 5. on exhausted retries, hands the input message to the error handler.
//!
//! Cancellation is observed only while waiting for a message; a running
//! invocation is never interrupted. Unit functions are synchronous and may
//! block; they never run on an async worker thread.

use crate::binding::Binder;
use crate::channel::Channel;
use crate::codec::PayloadShape;
use crate::error::{ConfigurationError, ExhaustedRetryError, ProcessingError, Result};
use crate::error_handler::{ErrorHandler, ErrorMessage, LoggingErrorHandler};
use crate::message::Message;
use crate::outbound::Outbound;
use crate::registry::UnitRegistry;
use crate::retry::RetryPolicy;
use crate::unit::{GatherStrategy, Unit, UnitKind};
use bytes::Bytes;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// What happened to one dispatched message (or zipped tuple).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
  /// A result was appended to these output channels.
  Published(Vec<String>),
  /// A sink consumed the message.
  Consumed,
  /// Retries were exhausted; the error handler received the message.
  Failed(ExhaustedRetryError),
  /// The unit cannot consume messages of this form.
  Ignored,
}

/// Drives input-consuming units.
#[derive(Clone)]
pub struct Dispatcher {
  pub(crate) registry: Arc<UnitRegistry>,
  pub(crate) binder: Arc<Binder>,
  pub(crate) outbound: Outbound,
  error_handler: Arc<dyn ErrorHandler>,
}

impl Dispatcher {
  /// A dispatcher over `registry`. Without an error handler, failures are logged and dropped.
  pub fn new(
    registry: Arc<UnitRegistry>,
    binder: Arc<Binder>,
    outbound: Outbound,
    error_handler: Option<Arc<dyn ErrorHandler>>,
  ) -> Self {
    Self {
      registry,
      binder,
      outbound,
      error_handler: error_handler.unwrap_or_else(|| Arc::new(LoggingErrorHandler)),
    }
  }

  /// The units this dispatcher can drive.
  pub fn registry(&self) -> &Arc<UnitRegistry> {
    &self.registry
  }

  /// Start the dispatch loop(s) of `unit`. Sources get none.
  ///
  /// A task ends with an error when its unit cannot claim its input channel.
  pub fn spawn(&self, unit: &Unit, shutdown: &CancellationToken) -> Vec<JoinHandle<Result<()>>> {
    match unit.kind() {
      UnitKind::Transform(_) | UnitKind::Sink(_) => {
        vec![tokio::spawn(
          self.clone().run_single(unit.clone(), shutdown.clone()),
        )]
      }
      UnitKind::Gather(GatherStrategy::Zip(_)) => {
        vec![tokio::spawn(
          self.clone().run_zip(unit.clone(), shutdown.clone()),
        )]
      }
      UnitKind::Gather(GatherStrategy::Merge(_)) => self.spawn_merge(unit, shutdown),
      UnitKind::Source(_) => Vec::new(),
    }
  }

  /// Start the loops of every registered unit with inputs.
  pub fn spawn_all(&self, shutdown: &CancellationToken) -> Vec<JoinHandle<Result<()>>> {
    let registry = Arc::clone(&self.registry);
    registry
      .units()
      .flat_map(|unit| self.spawn(unit, shutdown))
      .collect()
  }

  /// Process one message with a single-input unit.
  pub async fn dispatch(&self, unit: &Unit, message: Message) -> DispatchOutcome {
    let policy = self.binder.retry_policy(unit.name(), 0, unit.retry());
    match unit.kind() {
      UnitKind::Transform(function) => {
        let function = function.clone();
        let input = message.clone();
        let name = unit.name().to_string();
        let result = invoke(unit.name(), policy, move |attempt| {
          trace!(unit = %name, attempt, "invoking transform");
          function(&input)
        })
        .await;
        match result {
          Ok(payload) => self.publish_result(unit, &message, payload),
          Err(error) => self.fail(message, error).await,
        }
      }
      UnitKind::Sink(function) => {
        let function = function.clone();
        let input = message.clone();
        let name = unit.name().to_string();
        let result = invoke(unit.name(), policy, move |attempt| {
          trace!(unit = %name, attempt, "invoking sink");
          function(&input)
        })
        .await;
        match result {
          Ok(()) => DispatchOutcome::Consumed,
          Err(error) => self.fail(message, error).await,
        }
      }
      UnitKind::Gather(GatherStrategy::Merge(_)) => self.dispatch_arrival(unit, 0, message).await,
      UnitKind::Gather(GatherStrategy::Zip(_)) | UnitKind::Source(_) => {
        warn!(unit = %unit.name(), kind = unit.kind().label(), "unit does not take single messages");
        DispatchOutcome::Ignored
      }
    }
  }

  /// Append a unit's result to each of its output ports, then post-process.
  pub(crate) fn publish_result(
    &self,
    unit: &Unit,
    input: &Message,
    payload: Bytes,
  ) -> DispatchOutcome {
    let output = Message::derive(input, payload);
    let mut published = Vec::with_capacity(unit.output_count());
    let mut first = None;
    for index in 0..unit.output_count() {
      let channel = self.binder.output(unit.name(), index);
      let sent = self.outbound.publish(&channel, output.clone());
      debug!(unit = %unit.name(), channel = %channel, id = %sent.id(), "published");
      first.get_or_insert(sent);
      published.push(channel);
    }
    if let (Some(post_process), Some(sent)) = (unit.post_process(), first.as_ref()) {
      post_process(sent);
    }
    DispatchOutcome::Published(published)
  }

  /// Route an exhausted message to the error handler.
  ///
  /// Failures of a composite member are reported against that member.
  pub(crate) async fn fail(&self, message: Message, error: ExhaustedRetryError) -> DispatchOutcome {
    let error = error.flatten();
    warn!(
      unit = %error.unit,
      attempts = error.attempts,
      cause = %error.cause,
      "retries exhausted"
    );
    self
      .error_handler
      .handle(ErrorMessage::new(message, error.clone()))
      .await;
    DispatchOutcome::Failed(error)
  }

  /// Wait for the next message on `channel`, or `None` once `shutdown` fires.
  pub(crate) async fn next_message(
    channel: &Channel,
    shutdown: &CancellationToken,
  ) -> Option<Message> {
    tokio::select! {
      biased;
      _ = shutdown.cancelled() => None,
      message = channel.recv() => Some(message),
    }
  }

  /// Claim `channel_name` for port `index` of `unit`.
  pub(crate) fn claim(
    &self,
    unit: &Unit,
    index: usize,
    channel_name: &str,
  ) -> Result<(), ConfigurationError> {
    let shape = unit.input_shape(index).unwrap_or(PayloadShape::Bytes);
    self.binder.claim_input(channel_name, unit.name(), shape)
  }

  /// A claim conflict is fatal: stop every loop and report it.
  pub(crate) fn abort(unit: &Unit, shutdown: &CancellationToken, error: ConfigurationError) -> Result<()> {
    error!(unit = %unit.name(), error = %error, "stopping runtime");
    shutdown.cancel();
    Err(error.into())
  }

  async fn run_single(self, unit: Unit, shutdown: CancellationToken) -> Result<()> {
    let channel_name = self.binder.input(unit.name(), 0);
    let channel = self.outbound.channels().get_or_create(&channel_name);
    info!(unit = %unit.name(), channel = %channel_name, kind = unit.kind().label(), "dispatch loop started");
    let mut claimed = false;
    while let Some(message) = Self::next_message(&channel, &shutdown).await {
      if !claimed {
        if let Err(e) = self.claim(&unit, 0, &channel_name) {
          channel.requeue(message);
          return Self::abort(&unit, &shutdown, e);
        }
        claimed = true;
      }
      self.dispatch(&unit, message).await;
    }
    debug!(unit = %unit.name(), "dispatch loop stopped");
    Ok(())
  }
}

/// Run `op` under `policy` on the blocking pool.
///
/// A panicking invocation counts as the final failed attempt.
pub(crate) async fn invoke<T, F>(
  unit: &str,
  policy: RetryPolicy,
  op: F,
) -> Result<T, ExhaustedRetryError>
where
  T: Send + 'static,
  F: FnMut(u32) -> Result<T, ProcessingError> + Send + 'static,
{
  let name = unit.to_string();
  match tokio::task::spawn_blocking(move || policy.run(&name, op)).await {
    Ok(result) => result,
    Err(e) => Err(ExhaustedRetryError {
      unit: unit.to_string(),
      attempts: 1,
      cause: ProcessingError::new(format!("invocation panicked: {e}")),
    }),
  }
}
