//! # StreamRuntime
//!
//! Wires registered units, configuration and interceptors into a running
//! system, and owns its lifecycle.
//!
//! [`StreamRuntimeBuilder`] collects units and interceptors; [`build`](StreamRuntimeBuilder::build)
//! validates them against a [`StreamConfig`]:
//!
//! 1. every unit is registered, rejecting duplicate names;
//! 2. each `definition` entry is resolved, composing `a|b` chains into new units;
//! 3. `error_handler_definition` is checked to name a sink, which is then
//!    excluded from dispatch;
//! 4. binding overrides are applied.
//!
//! [`StreamRuntime::start`] spawns the dispatcher and poller tasks of every
//! active unit; [`StreamRuntime::shutdown`] cancels and joins them. A
//! [`ConfigurationError`] found at the first dispatch (two units decoding one
//! channel differently) cancels the runtime on its own and is returned by
//! `shutdown`.

use crate::binding::Binder;
use crate::bridge::StreamBridge;
use crate::channel::ChannelRegistry;
use crate::composer::{compose, split_definitions};
use crate::config::StreamConfig;
use crate::destination::{InputDestination, OutputDestination};
use crate::dispatcher::Dispatcher;
use crate::error::{ConfigurationError, Result};
use crate::error_handler::{ErrorHandler, SinkErrorHandler};
use crate::ingress::Ingress;
use crate::interceptor::{ChannelInterceptor, InterceptorChain};
use crate::outbound::Outbound;
use crate::poller::Poller;
use crate::registry::UnitRegistry;
use crate::unit::{Unit, UnitKind};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Builder for a [`StreamRuntime`].
///
/// # Example
///
/// ```rust,no_run
/// use streamfn::runtime::StreamRuntimeBuilder;
/// use streamfn::unit::Unit;
///
/// let runtime = StreamRuntimeBuilder::new()
///     .unit(Unit::transform("uppercase", |s: String| s.to_uppercase()))
///     .build()?;
/// # Ok::<(), streamfn::error::ConfigurationError>(())
/// ```
#[derive(Default)]
pub struct StreamRuntimeBuilder {
  config: StreamConfig,
  units: Vec<Unit>,
  interceptors: Vec<(String, Arc<dyn ChannelInterceptor>)>,
  error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl StreamRuntimeBuilder {
  /// A builder with the default configuration and no units.
  pub fn new() -> Self {
    Self::default()
  }

  /// Replace the configuration.
  pub fn config(mut self, config: StreamConfig) -> Self {
    self.config = config;
    self
  }

  /// Register a unit. Duplicate names are rejected by [`build`](Self::build).
  pub fn unit(mut self, unit: Unit) -> Self {
    self.units.push(unit);
    self
  }

  /// Register several units.
  pub fn units(mut self, units: impl IntoIterator<Item = Unit>) -> Self {
    self.units.extend(units);
    self
  }

  /// Apply `interceptor` to every channel matching `pattern`.
  ///
  /// # Arguments
  ///
  /// * `pattern` - An exact channel name, or a glob using `*` and `?`
  /// * `interceptor` - Applied in registration order before each append
  pub fn interceptor(
    mut self,
    pattern: impl Into<String>,
    interceptor: impl ChannelInterceptor + 'static,
  ) -> Self {
    self.interceptors.push((pattern.into(), Arc::new(interceptor)));
    self
  }

  /// Use `handler` for messages whose retries are exhausted.
  ///
  /// Takes precedence over `error_handler_definition`.
  pub fn error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
    self.error_handler = Some(handler);
    self
  }

  /// Validate everything and assemble the runtime. Nothing is started.
  pub fn build(self) -> std::result::Result<StreamRuntime, ConfigurationError> {
    let mut registered = UnitRegistry::new();
    for unit in self.units {
      registered.register(unit)?;
    }

    let handler_unit = match &self.config.error_handler_definition {
      Some(name) => match registered.require(name)?.kind() {
        UnitKind::Sink(sink) => Some((name.clone(), sink.clone())),
        _ => return Err(ConfigurationError::InvalidErrorHandler(name.clone())),
      },
      None => None,
    };
    let error_handler = match (self.error_handler, &handler_unit) {
      (Some(handler), _) => Some(handler),
      (None, Some((name, sink))) => {
        info!(handler = %name, "using sink as error handler");
        Some(Arc::new(SinkErrorHandler::new(name.clone(), sink.clone())) as Arc<dyn ErrorHandler>)
      }
      (None, None) => None,
    };
    let is_handler = |name: &str| handler_unit.as_ref().is_some_and(|(h, _)| h == name);

    let definitions = split_definitions(&self.config.definition);
    let mut active = UnitRegistry::new();
    let mut first_defined: Option<String> = None;
    if definitions.is_empty() {
      for unit in registered.units().filter(|unit| !is_handler(unit.name())) {
        active.register(unit.clone())?;
      }
    } else {
      for definition in &definitions {
        let unit = compose(&registered, definition)?;
        first_defined.get_or_insert_with(|| unit.name().to_string());
        if is_handler(unit.name()) {
          warn!(unit = %unit.name(), "error handler listed as a definition, not dispatching it");
          continue;
        }
        if active.contains(unit.name()) {
          debug!(unit = %unit.name(), "definition listed twice");
          continue;
        }
        active.register(unit)?;
      }
    }

    let mut chain = InterceptorChain::new();
    for (pattern, interceptor) in self.interceptors {
      chain.intercept_shared(&pattern, interceptor)?;
    }

    let binder = Arc::new(Binder::from_config(&self.config)?);
    let channels = Arc::new(ChannelRegistry::new());
    let outbound = Outbound::new(Arc::clone(&channels), Arc::new(chain));
    let active = Arc::new(active);
    let bridge = Arc::new(StreamBridge::new(
      Arc::clone(&binder),
      outbound.clone(),
      self.config.dynamic_destination_cache_size,
    ));
    let default_input = first_defined
      .as_deref()
      .and_then(|name| active.get(name))
      .filter(|unit| unit.input_count() > 0)
      .map(|unit| binder.input(unit.name(), 0));

    info!(
      active = active.len(),
      registered = registered.len(),
      "runtime assembled"
    );
    Ok(StreamRuntime {
      dispatcher: Dispatcher::new(
        Arc::clone(&active),
        Arc::clone(&binder),
        outbound.clone(),
        error_handler,
      ),
      poller: Poller::new(
        Arc::clone(&active),
        Arc::clone(&binder),
        outbound,
        self.config.poller.clone(),
      ),
      ingress: Arc::new(Ingress::new(
        Arc::clone(&bridge),
        self.config.ingress.destination.clone(),
      )),
      input: InputDestination::new(Arc::clone(&channels), Arc::clone(&binder), default_input),
      output: OutputDestination::new(Arc::clone(&channels), Arc::clone(&binder)),
      active,
      binder,
      channels,
      bridge,
      shutdown: CancellationToken::new(),
      tasks: Mutex::new(Vec::new()),
    })
  }
}

/// A running (or startable) set of units.
pub struct StreamRuntime {
  active: Arc<UnitRegistry>,
  binder: Arc<Binder>,
  channels: Arc<ChannelRegistry>,
  dispatcher: Dispatcher,
  poller: Poller,
  bridge: Arc<StreamBridge>,
  ingress: Arc<Ingress>,
  input: InputDestination,
  output: OutputDestination,
  shutdown: CancellationToken,
  tasks: Mutex<Vec<JoinHandle<Result<()>>>>,
}

impl StreamRuntime {
  /// Start a builder.
  pub fn builder() -> StreamRuntimeBuilder {
    StreamRuntimeBuilder::new()
  }

  /// Spawn the dispatch loops and pollers of every active unit.
  ///
  /// Must be called inside a Tokio runtime. Calling it again is a no-op.
  pub fn start(&self) {
    let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
    if !tasks.is_empty() {
      debug!("runtime already started");
      return;
    }
    tasks.extend(self.dispatcher.spawn_all(&self.shutdown));
    tasks.extend(self.poller.spawn_all(&self.shutdown));
    info!(tasks = tasks.len(), units = self.active.len(), "runtime started");
  }

  /// Cancel every task and wait for them to finish.
  ///
  /// In-flight invocations complete first; queued messages stay in their channels.
  /// Returns the first error a task ended with, such as a conflicting input claim.
  pub async fn shutdown(&self) -> Result<()> {
    self.shutdown.cancel();
    let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
    let count = tasks.len();
    let mut failure = None;
    for task in tasks {
      match task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
          warn!(error = %e, "runtime task stopped with an error");
          failure.get_or_insert(e);
        }
        Err(e) => {
          warn!(error = %e, "runtime task failed");
          failure.get_or_insert(e.into());
        }
      }
    }
    info!(tasks = count, "runtime stopped");
    match failure {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }

  /// Resolves once the runtime is cancelled, by [`shutdown`](Self::shutdown) or by a fatal error.
  pub async fn stopped(&self) {
    self.shutdown.cancelled().await
  }

  /// Token cancelled by [`shutdown`](Self::shutdown); share it with servers that should stop too.
  pub fn shutdown_token(&self) -> CancellationToken {
    self.shutdown.clone()
  }

  /// Injects test messages into input bindings.
  pub fn input_destination(&self) -> &InputDestination {
    &self.input
  }

  /// Reads messages off output bindings.
  pub fn output_destination(&self) -> &OutputDestination {
    &self.output
  }

  /// Publishes to arbitrary bindings.
  pub fn bridge(&self) -> &Arc<StreamBridge> {
    &self.bridge
  }

  /// The HTTP ingress bound to this runtime's bridge.
  pub fn ingress(&self) -> &Arc<Ingress> {
    &self.ingress
  }

  /// Active units, composites included.
  pub fn registry(&self) -> &Arc<UnitRegistry> {
    &self.active
  }

  /// Binding resolution in effect.
  pub fn binder(&self) -> &Arc<Binder> {
    &self.binder
  }

  /// Every channel created so far.
  pub fn channels(&self) -> &Arc<ChannelRegistry> {
    &self.channels
  }

  /// Processes one message synchronously with the dispatcher; see [`Dispatcher::dispatch`].
  pub fn dispatcher(&self) -> &Dispatcher {
    &self.dispatcher
  }

  /// See [`Poller::poll_once`].
  pub fn poller(&self) -> &Poller {
    &self.poller
  }
}
