//! Test binder endpoints.
//!
//! [`InputDestination`] injects messages straight into a unit's input
//! channel; [`OutputDestination`] takes them off an output channel. Neither
//! runs interceptors: they stand in for an external broker on either side of
//! the runtime.

use crate::binding::Binder;
use crate::channel::ChannelRegistry;
use crate::message::Message;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Injects messages into input bindings.
#[derive(Clone, Debug)]
pub struct InputDestination {
  channels: Arc<ChannelRegistry>,
  binder: Arc<Binder>,
  default_binding: Option<String>,
}

impl InputDestination {
  /// An input destination; `default_binding` is used by [`send_default`](Self::send_default).
  pub fn new(channels: Arc<ChannelRegistry>, binder: Arc<Binder>, default_binding: Option<String>) -> Self {
    Self {
      channels,
      binder,
      default_binding,
    }
  }

  /// Append `message` to the channel `binding` resolves to.
  pub fn send(&self, message: Message, binding: &str) {
    let channel = self.binder.resolve(binding);
    trace!(binding = %binding, channel = %channel, id = %message.id(), "test input");
    self.channels.get_or_create(&channel).send(message);
  }

  /// Send to the default binding. Returns `false` when there is none.
  pub fn send_default(&self, message: Message) -> bool {
    match &self.default_binding {
      Some(binding) => {
        self.send(message, binding);
        true
      }
      None => false,
    }
  }
}

/// Takes messages off output bindings.
#[derive(Clone, Debug)]
pub struct OutputDestination {
  channels: Arc<ChannelRegistry>,
  binder: Arc<Binder>,
}

impl OutputDestination {
  /// An output destination over `channels`.
  pub fn new(channels: Arc<ChannelRegistry>, binder: Arc<Binder>) -> Self {
    Self { channels, binder }
  }

  /// Wait up to `timeout` for the next message on `binding`.
  pub async fn receive(&self, timeout: Duration, binding: &str) -> Option<Message> {
    let channel = self.binder.resolve(binding);
    self
      .channels
      .get_or_create(&channel)
      .recv_timeout(timeout)
      .await
  }

  /// Discard everything queued on every channel.
  pub fn clear(&self) {
    for name in self.channels.names() {
      if let Some(channel) = self.channels.get(&name) {
        channel.drain();
      }
    }
  }
}
