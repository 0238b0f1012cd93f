//! # Poller
//!
//! Drives source units, which have no input binding.
//!
//! - **Single-shot sources** run on a fixed period (one second by default,
//!   overridable globally and per output binding). On each tick the source is
//!   invoked up to `max_messages_per_poll` times; every returned value is
//!   published to each output port, and a `None` ends the tick early.
//! - **Continuous sources** are invoked exactly once. Their stream is drained
//!   on a dedicated task, independent of the tick period, and every element is
//!   published to every output port as soon as it is produced.
//!
//! Each source gets its own task, so a slow source never delays another.
//! Single-shot sources are invoked on Tokio's blocking pool and may block.

use crate::binding::Binder;
use crate::config::PollerConfig;
use crate::error::Result;
use crate::message::Message;
use crate::outbound::Outbound;
use crate::registry::UnitRegistry;
use crate::unit::{ContinuousFn, SourceKind, Unit, UnitKind};
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Drives source units.
#[derive(Clone, Debug)]
pub struct Poller {
  registry: Arc<UnitRegistry>,
  binder: Arc<Binder>,
  outbound: Outbound,
  config: PollerConfig,
}

impl Poller {
  /// A poller over `registry` using `config` for tick scheduling.
  pub fn new(
    registry: Arc<UnitRegistry>,
    binder: Arc<Binder>,
    outbound: Outbound,
    config: PollerConfig,
  ) -> Self {
    Self {
      registry,
      binder,
      outbound,
      config,
    }
  }

  /// Tick period for `unit`: its binding override, else the global one.
  pub fn period(&self, unit: &Unit) -> Duration {
    self
      .binder
      .poll_delay(unit.name())
      .filter(|delay| !delay.is_zero())
      .unwrap_or_else(|| self.config.fixed_delay())
  }

  /// Start driving `unit`. Units with inputs are ignored.
  pub fn spawn(&self, unit: &Unit, shutdown: &CancellationToken) -> Option<JoinHandle<Result<()>>> {
    let UnitKind::Source(source) = unit.kind() else {
      return None;
    };
    let poller = self.clone();
    let unit = unit.clone();
    let shutdown = shutdown.clone();
    let handle = match source.clone() {
      SourceKind::SingleShot(_) => {
        tokio::spawn(async move { poller.run_ticks(unit, shutdown).await })
      }
      SourceKind::Continuous(function) => {
        tokio::spawn(async move { poller.run_continuous(unit, function, shutdown).await })
      }
    };
    Some(handle)
  }

  /// Start every registered source.
  pub fn spawn_all(&self, shutdown: &CancellationToken) -> Vec<JoinHandle<Result<()>>> {
    self
      .registry
      .units()
      .filter_map(|unit| self.spawn(unit, shutdown))
      .collect()
  }

  /// Invoke a single-shot source once, publishing what it returns.
  ///
  /// Returns how many messages were published.
  pub fn poll_once(&self, unit: &Unit) -> usize {
    let UnitKind::Source(SourceKind::SingleShot(function)) = unit.kind() else {
      return 0;
    };
    let mut published = 0;
    for _ in 0..self.config.max_messages_per_poll.max(1) {
      match function() {
        Ok(Some(payload)) => {
          self.publish(unit, payload);
          published += 1;
        }
        Ok(None) => {
          trace!(unit = %unit.name(), "source has no value this tick");
          break;
        }
        Err(e) => {
          warn!(unit = %unit.name(), error = %e, "source failed");
          break;
        }
      }
    }
    published
  }

  fn publish(&self, unit: &Unit, payload: Bytes) {
    let message = Message::new(payload);
    for index in 0..unit.output_count() {
      let channel = self.binder.output(unit.name(), index);
      let sent = self.outbound.publish(&channel, message.clone());
      debug!(unit = %unit.name(), channel = %channel, id = %sent.id(), "source published");
    }
  }

  async fn run_ticks(self, unit: Unit, shutdown: CancellationToken) -> Result<()> {
    let period = self.period(&unit);
    info!(unit = %unit.name(), period_ms = period.as_millis() as u64, "poller started");
    let mut ticks = tokio::time::interval(period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
      tokio::select! {
        biased;
        _ = shutdown.cancelled() => break,
        _ = ticks.tick() => {
          let (poller, polled) = (self.clone(), unit.clone());
          if let Err(e) = tokio::task::spawn_blocking(move || poller.poll_once(&polled)).await {
            warn!(unit = %unit.name(), error = %e, "source panicked");
          }
        }
      }
    }
    debug!(unit = %unit.name(), "poller stopped");
    Ok(())
  }

  async fn run_continuous(
    self,
    unit: Unit,
    function: ContinuousFn,
    shutdown: CancellationToken,
  ) -> Result<()> {
    info!(unit = %unit.name(), "continuous source started");
    let mut stream = function();
    loop {
      let next = tokio::select! {
        biased;
        _ = shutdown.cancelled() => break,
        next = stream.next() => next,
      };
      match next {
        Some(payload) => self.publish(&unit, payload),
        None => {
          info!(unit = %unit.name(), "continuous source completed");
          break;
        }
      }
    }
    debug!(unit = %unit.name(), "continuous source stopped");
    Ok(())
  }
}
