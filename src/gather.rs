//! Fan-in dispatch for units with several input ports.
//!
//! Two strategies, chosen by how the unit was declared:
//!
//! - **Zip**: a single task takes the head message of port 0, then of port 1,
//!   and so on, and invokes the unit once the tuple is complete. Each port is
//!   read in FIFO order and at most one message per port is held at a time, so
//!   surplus on a faster port stays queued for the next tuple. The output
//!   message carries the headers of the port-0 message.
//! - **Merge**: one task per port; every arrival on any port invokes the unit
//!   with the port index. Outputs interleave in whatever order the ports are
//!   served.
//!
//! Per-binding attempt limits apply per port for merge. A zip tuple holds one
//! message from every port, so it uses the smallest limit configured on any of
//! them.

use crate::channel::Channel;
use crate::dispatcher::{DispatchOutcome, Dispatcher, invoke};
use crate::error::Result;
use crate::message::Message;
use crate::unit::{GatherStrategy, Unit, UnitKind};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

impl Dispatcher {
  /// Process one complete tuple (one message per input port) with a zip unit.
  pub async fn dispatch_tuple(&self, unit: &Unit, messages: Vec<Message>) -> DispatchOutcome {
    let UnitKind::Gather(GatherStrategy::Zip(function)) = unit.kind() else {
      warn!(unit = %unit.name(), kind = unit.kind().label(), "unit does not zip");
      return DispatchOutcome::Ignored;
    };
    if messages.len() != unit.input_count() || messages.is_empty() {
      warn!(
        unit = %unit.name(),
        expected = unit.input_count(),
        got = messages.len(),
        "incomplete tuple"
      );
      return DispatchOutcome::Ignored;
    }
    let policy = self
      .binder
      .tuple_retry_policy(unit.name(), unit.input_count(), unit.retry());
    let head = messages[0].clone();
    let function = function.clone();
    let name = unit.name().to_string();
    let result = invoke(unit.name(), policy, move |attempt| {
      trace!(unit = %name, attempt, "invoking zip");
      function(&messages)
    })
    .await;
    match result {
      Ok(payload) => self.publish_result(unit, &head, payload),
      Err(error) => self.fail(head, error).await,
    }
  }

  /// Process one arrival on port `index` of a merge unit.
  pub async fn dispatch_arrival(&self, unit: &Unit, index: usize, message: Message) -> DispatchOutcome {
    let UnitKind::Gather(GatherStrategy::Merge(function)) = unit.kind() else {
      warn!(unit = %unit.name(), kind = unit.kind().label(), "unit does not merge");
      return DispatchOutcome::Ignored;
    };
    let policy = self.binder.retry_policy(unit.name(), index, unit.retry());
    let function = function.clone();
    let input = message.clone();
    let name = unit.name().to_string();
    let result = invoke(unit.name(), policy, move |attempt| {
      trace!(unit = %name, index, attempt, "invoking merge");
      function(index, &input)
    })
    .await;
    match result {
      Ok(payload) => self.publish_result(unit, &message, payload),
      Err(error) => self.fail(message, error).await,
    }
  }

  pub(crate) async fn run_zip(self, unit: Unit, shutdown: CancellationToken) -> Result<()> {
    let ports: Vec<(String, Arc<Channel>)> = (0..unit.input_count())
      .map(|index| {
        let name = self.binder.input(unit.name(), index);
        let channel = self.outbound.channels().get_or_create(&name);
        (name, channel)
      })
      .collect();
    info!(unit = %unit.name(), ports = ports.len(), "zip loop started");

    let mut claimed = vec![false; ports.len()];
    let mut pending: Vec<Message> = Vec::with_capacity(ports.len());
    loop {
      while pending.len() < ports.len() {
        let index = pending.len();
        let (name, channel) = &ports[index];
        let Some(message) = Self::next_message(channel, &shutdown).await else {
          // Hand partial tuples back so nothing is lost on shutdown.
          for (port, message) in pending.drain(..).enumerate() {
            ports[port].1.requeue(message);
          }
          debug!(unit = %unit.name(), "zip loop stopped");
          return Ok(());
        };
        if !claimed[index] {
          if let Err(e) = self.claim(&unit, index, name) {
            channel.requeue(message);
            for (port, message) in pending.drain(..).enumerate() {
              ports[port].1.requeue(message);
            }
            return Self::abort(&unit, &shutdown, e);
          }
          claimed[index] = true;
        }
        pending.push(message);
      }
      let tuple = std::mem::take(&mut pending);
      self.dispatch_tuple(&unit, tuple).await;
    }
  }

  pub(crate) fn spawn_merge(&self, unit: &Unit, shutdown: &CancellationToken) -> Vec<JoinHandle<Result<()>>> {
    (0..unit.input_count())
      .map(|index| {
        let dispatcher = self.clone();
        let unit = unit.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
          let name = dispatcher.binder.input(unit.name(), index);
          let channel = dispatcher.outbound.channels().get_or_create(&name);
          info!(unit = %unit.name(), channel = %name, index, "merge loop started");
          let mut claimed = false;
          while let Some(message) = Self::next_message(&channel, &shutdown).await {
            if !claimed {
              if let Err(e) = dispatcher.claim(&unit, index, &name) {
                channel.requeue(message);
                return Self::abort(&unit, &shutdown, e);
              }
              claimed = true;
            }
            dispatcher.dispatch_arrival(&unit, index, message).await;
          }
          debug!(unit = %unit.name(), index, "merge loop stopped");
          Ok(())
        })
      })
      .collect()
  }
}
