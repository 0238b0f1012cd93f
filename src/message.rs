//! Message envelope passed between channels and units.
//!
//! A [`Message`] is an opaque byte payload plus string headers. Messages are
//! immutable once built: anything that wants different headers (an interceptor,
//! a transform producing its output) builds a new message through
//! [`MessageBuilder`], leaving the original untouched.
//!
//! # Example
//!
//! ```rust
//! use streamfn::message::MessageBuilder;
//!
//! let msg = MessageBuilder::with_payload("Hello").set_header("origin", "docs").build();
//! let copy = msg.to_builder().set_header("Interceptor-Header", "Value").build();
//!
//! assert_eq!(msg.header("Interceptor-Header"), None);
//! assert_eq!(copy.header("origin"), Some("docs"));
//! assert_eq!(copy.payload(), msg.payload());
//! ```

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

/// Header map carried by every message, ordered by key.
pub type Headers = BTreeMap<String, String>;

/// A unique identifier for messages.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum MessageId {
  /// A random UUIDv4 (128-bit).
  Uuid(u128),

  /// A caller-provided identifier.
  Custom(String),
}

impl MessageId {
  /// Create a new UUID-based message ID using UUIDv4.
  #[must_use]
  pub fn new_uuid() -> Self {
    let high: u64 = rand::random();
    let low: u64 = rand::random();
    // Set version 4 and variant bits
    let uuid = ((high & 0xFFFFFFFFFFFF0FFF) | 0x0000000000004000) as u128
      | (((low & 0x3FFFFFFFFFFFFFFF) | 0x8000000000000000) as u128) << 64;
    MessageId::Uuid(uuid)
  }

  /// Create a custom message ID from a string.
  #[must_use]
  pub fn new_custom(id: impl Into<String>) -> Self {
    MessageId::Custom(id.into())
  }
}

impl Display for MessageId {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self {
      MessageId::Uuid(uuid) => write!(
        f,
        "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
        (uuid >> 96) as u32,
        (uuid >> 80) as u16,
        (uuid >> 64) as u16,
        (uuid >> 48) as u16,
        (uuid & 0xFFFFFFFFFFFF) as u64
      ),
      MessageId::Custom(id) => write!(f, "custom:{}", id),
    }
  }
}

impl Default for MessageId {
  fn default() -> Self {
    MessageId::new_uuid()
  }
}

/// An immutable payload with headers.
///
/// Cloning is cheap: the payload is reference-counted [`Bytes`].
#[derive(Clone, Debug)]
pub struct Message {
  id: MessageId,
  payload: Bytes,
  headers: Headers,
  timestamp: DateTime<Utc>,
}

impl Message {
  /// Create a message with no headers.
  #[must_use]
  pub fn new(payload: impl Into<Bytes>) -> Self {
    MessageBuilder::with_payload(payload).build()
  }

  /// Build the output message of a unit: the new payload with the input's headers.
  ///
  /// The result gets a fresh id and timestamp.
  #[must_use]
  pub fn derive(input: &Message, payload: impl Into<Bytes>) -> Self {
    MessageBuilder::with_payload(payload)
      .copy_headers(input.headers())
      .build()
  }

  /// The message id.
  #[must_use]
  pub fn id(&self) -> &MessageId {
    &self.id
  }

  /// The raw payload.
  #[must_use]
  pub fn payload(&self) -> &Bytes {
    &self.payload
  }

  /// All headers.
  #[must_use]
  pub fn headers(&self) -> &Headers {
    &self.headers
  }

  /// A single header value.
  #[must_use]
  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(name).map(String::as_str)
  }

  /// Creation time of this message.
  #[must_use]
  pub fn timestamp(&self) -> DateTime<Utc> {
    self.timestamp
  }

  /// Start a builder seeded with this message's id, payload and headers.
  #[must_use]
  pub fn to_builder(&self) -> MessageBuilder {
    MessageBuilder {
      id: Some(self.id.clone()),
      payload: self.payload.clone(),
      headers: self.headers.clone(),
    }
  }

  /// Consume the message and return its payload.
  #[must_use]
  pub fn into_payload(self) -> Bytes {
    self.payload
  }
}

/// Builds [`Message`]s; the only way to change headers.
#[derive(Clone, Debug, Default)]
pub struct MessageBuilder {
  id: Option<MessageId>,
  payload: Bytes,
  headers: Headers,
}

impl MessageBuilder {
  /// Start a builder for the given payload.
  #[must_use]
  pub fn with_payload(payload: impl Into<Bytes>) -> Self {
    Self {
      id: None,
      payload: payload.into(),
      headers: Headers::new(),
    }
  }

  /// Replace the payload.
  #[must_use]
  pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
    self.payload = payload.into();
    self
  }

  /// Copy every header from `headers`, overwriting existing keys.
  #[must_use]
  pub fn copy_headers(mut self, headers: &Headers) -> Self {
    self
      .headers
      .extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
    self
  }

  /// Add or overwrite one header.
  #[must_use]
  pub fn set_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(name.into(), value.into());
    self
  }

  /// Remove one header.
  #[must_use]
  pub fn remove_header(mut self, name: &str) -> Self {
    self.headers.remove(name);
    self
  }

  /// Use an explicit id instead of a generated one.
  #[must_use]
  pub fn id(mut self, id: MessageId) -> Self {
    self.id = Some(id);
    self
  }

  /// Finish the message.
  #[must_use]
  pub fn build(self) -> Message {
    Message {
      id: self.id.unwrap_or_default(),
      payload: self.payload,
      headers: self.headers,
      timestamp: Utc::now(),
    }
  }
}
