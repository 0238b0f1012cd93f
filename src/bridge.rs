//! # Stream Bridge
//!
//! Lets code outside any unit (an HTTP handler, a test) publish to an output
//! binding by name. Each binding name is resolved through the [`Binder`] and
//! published through the interceptor chain like any unit output.
//!
//! ## Dynamic bindings
//!
//! Bindings created on first use are cached in least-recently-used order, up
//! to a configured bound (10 by default). Creating one more evicts the
//! least recently used binding. Eviction drops only the cached binding, never
//! the channel: channels outlive bindings, so queued messages survive and a
//! later send to the evicted name recreates the binding transparently.

use crate::binding::Binder;
use crate::channel::Channel;
use crate::config::DEFAULT_DYNAMIC_DESTINATION_CACHE_SIZE;
use crate::error::ConfigurationError;
use crate::message::Message;
use crate::outbound::Outbound;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace};

#[derive(Debug)]
struct DynamicBinding {
  binding: String,
  destination: String,
  channel: Arc<Channel>,
}

/// Publishes to output bindings by name.
#[derive(Debug)]
pub struct StreamBridge {
  binder: Arc<Binder>,
  outbound: Outbound,
  capacity: usize,
  // Front is least recently used.
  bindings: Mutex<VecDeque<DynamicBinding>>,
  created: AtomicU64,
}

impl StreamBridge {
  /// A bridge keeping at most `capacity` dynamic bindings (minimum 1).
  pub fn new(binder: Arc<Binder>, outbound: Outbound, capacity: usize) -> Self {
    Self {
      binder,
      outbound,
      capacity: capacity.max(1),
      bindings: Mutex::new(VecDeque::new()),
      created: AtomicU64::new(0),
    }
  }

  /// A bridge with the default capacity.
  pub fn with_default_capacity(binder: Arc<Binder>, outbound: Outbound) -> Self {
    Self::new(binder, outbound, DEFAULT_DYNAMIC_DESTINATION_CACHE_SIZE)
  }

  /// Publish `payload` to `binding`.
  pub fn send(&self, binding: &str, payload: impl Into<Bytes>) -> Result<Message, ConfigurationError> {
    self.send_message(binding, Message::new(payload))
  }

  /// Publish `message` to `binding`, returning the message as appended.
  pub fn send_message(&self, binding: &str, message: Message) -> Result<Message, ConfigurationError> {
    if binding.trim().is_empty() {
      return Err(ConfigurationError::InvalidDestination(binding.to_string()));
    }
    let (destination, channel) = self.acquire(binding);
    // Intercept before appending to the channel held by this send, so a concurrent
    // eviction cannot redirect or lose the message.
    let message = self.outbound.intercept(&destination, message);
    trace!(binding = %binding, destination = %destination, id = %message.id(), "bridging");
    channel.send(message.clone());
    Ok(message)
  }

  /// Cached dynamic bindings, least recently used first.
  pub fn dynamic_bindings(&self) -> Vec<String> {
    self
      .bindings
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .map(|entry| entry.binding.clone())
      .collect()
  }

  /// How many dynamic bindings were created, recreations included.
  pub fn created_count(&self) -> u64 {
    self.created.load(Ordering::Relaxed)
  }

  fn acquire(&self, binding: &str) -> (String, Arc<Channel>) {
    let mut bindings = self
      .bindings
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    if let Some(position) = bindings.iter().position(|entry| entry.binding == binding) {
      if let Some(entry) = bindings.remove(position) {
        let found = (entry.destination.clone(), Arc::clone(&entry.channel));
        bindings.push_back(entry);
        return found;
      }
    }

    let destination = self.binder.resolve(binding);
    let channel = self.outbound.channels().get_or_create(&destination);
    self.created.fetch_add(1, Ordering::Relaxed);
    debug!(binding = %binding, destination = %destination, "created dynamic binding");
    bindings.push_back(DynamicBinding {
      binding: binding.to_string(),
      destination: destination.clone(),
      channel: Arc::clone(&channel),
    });
    while bindings.len() > self.capacity {
      if let Some(evicted) = bindings.pop_front() {
        debug!(
          binding = %evicted.binding,
          destination = %evicted.destination,
          queued = evicted.channel.len(),
          "evicted dynamic binding"
        );
      }
    }
    (destination, channel)
  }
}
