//! # In-Memory Channels
//!
//! A [`Channel`] is an ordered, unbounded queue of [`Message`]s addressed by a
//! destination name. [`ChannelRegistry`] creates channels lazily the first time
//! a name is referenced and never destroys them, so a message appended to a
//! channel stays there until some consumer receives it.
//!
//! ## Semantics
//!
//! - **FIFO**: messages are received in append order.
//! - **Many producers**: [`Channel::send`] may be called concurrently from any task.
//! - **Competing consumers**: each message is handed to exactly one
//!   [`Channel::recv`] call, even when several tasks receive concurrently.
//! - **Unbounded**: `send` never blocks and never fails.

use crate::message::Message;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::trace;

/// A named FIFO queue of messages.
#[derive(Debug)]
pub struct Channel {
  name: String,
  queue: Mutex<VecDeque<Message>>,
  available: Notify,
}

impl Channel {
  /// Create an empty channel.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      queue: Mutex::new(VecDeque::new()),
      available: Notify::new(),
    }
  }

  /// The destination name of this channel.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Append a message at the tail.
  pub fn send(&self, message: Message) {
    trace!(channel = %self.name, id = %message.id(), "append");
    self
      .queue
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push_back(message);
    self.available.notify_one();
  }

  /// Put a message back at the head, ahead of everything already queued.
  ///
  /// Used when a consumer took a message it cannot process yet.
  pub fn requeue(&self, message: Message) {
    self
      .queue
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push_front(message);
    self.available.notify_one();
  }

  /// Take the head message if one is queued.
  pub fn try_recv(&self) -> Option<Message> {
    self
      .queue
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .pop_front()
  }

  /// Wait until a message is available and take it.
  pub async fn recv(&self) -> Message {
    loop {
      if let Some(message) = self.try_recv() {
        return message;
      }
      let notified = self.available.notified();
      tokio::pin!(notified);
      // Register interest before the second check so a send in between is not missed.
      notified.as_mut().enable();
      if let Some(message) = self.try_recv() {
        return message;
      }
      notified.await;
    }
  }

  /// Like [`recv`](Self::recv) but gives up after `timeout`.
  pub async fn recv_timeout(&self, timeout: Duration) -> Option<Message> {
    if timeout.is_zero() {
      return self.try_recv();
    }
    tokio::time::timeout(timeout, self.recv()).await.ok()
  }

  /// Number of queued messages.
  pub fn len(&self) -> usize {
    self
      .queue
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  /// Whether no message is queued.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Remove and return every queued message.
  pub fn drain(&self) -> Vec<Message> {
    self
      .queue
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .drain(..)
      .collect()
  }
}

/// Lazily created channels, keyed by destination name.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
  channels: RwLock<HashMap<String, Arc<Channel>>>,
}

impl ChannelRegistry {
  /// Create an empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// Return the channel named `name`, creating it on first reference.
  pub fn get_or_create(&self, name: &str) -> Arc<Channel> {
    if let Some(channel) = self.get(name) {
      return channel;
    }
    let mut channels = self
      .channels
      .write()
      .unwrap_or_else(PoisonError::into_inner);
    channels
      .entry(name.to_string())
      .or_insert_with(|| {
        trace!(channel = %name, "creating channel");
        Arc::new(Channel::new(name))
      })
      .clone()
  }

  /// Return the channel named `name` if it was ever referenced.
  pub fn get(&self, name: &str) -> Option<Arc<Channel>> {
    self
      .channels
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(name)
      .cloned()
  }

  /// Names of every channel created so far, sorted.
  pub fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = self
      .channels
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .keys()
      .cloned()
      .collect();
    names.sort();
    names
  }
}
