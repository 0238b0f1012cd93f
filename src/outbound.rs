//! Publishing side of the channel layer.
//!
//! Every message produced by a unit or sent through the stream bridge goes
//! through [`Outbound::publish`], which runs the interceptor chain for the
//! destination and only then appends, so consumers never observe an
//! unintercepted message.

use crate::channel::ChannelRegistry;
use crate::interceptor::InterceptorChain;
use crate::message::Message;
use std::sync::Arc;

/// Interceptors plus the channels they guard.
#[derive(Clone, Debug)]
pub struct Outbound {
  channels: Arc<ChannelRegistry>,
  interceptors: Arc<InterceptorChain>,
}

impl Outbound {
  /// Publish into `channels` through `interceptors`.
  pub fn new(channels: Arc<ChannelRegistry>, interceptors: Arc<InterceptorChain>) -> Self {
    Self {
      channels,
      interceptors,
    }
  }

  /// Intercept `message` for `channel`, then append it.
  pub fn publish(&self, channel: &str, message: Message) -> Message {
    let message = self.intercept(channel, message);
    self.channels.get_or_create(channel).send(message.clone());
    message
  }

  /// Run the interceptor chain for `channel` without appending.
  pub fn intercept(&self, channel: &str, message: Message) -> Message {
    self.interceptors.apply(channel, message)
  }

  /// The underlying channels.
  pub fn channels(&self) -> &Arc<ChannelRegistry> {
    &self.channels
  }
}
