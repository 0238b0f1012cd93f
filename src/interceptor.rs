//! # Interceptor Chain
//!
//! Hooks applied to a message right before it is appended to an output channel.
//!
//! Entries are matched against the destination channel name (exact match, or a
//! glob where `*` matches any run of characters and `?` one character) and run
//! in registration order. Interceptors receive the message by value and return
//! the message to publish; the message they were given is never modified in
//! place. Input channels are never intercepted: only the dispatcher, poller and
//! stream bridge publish through the chain.
//!
//! ```rust
//! use streamfn::interceptor::{HeaderInterceptor, InterceptorChain};
//! use streamfn::message::Message;
//!
//! let mut chain = InterceptorChain::new();
//! chain.intercept("reverse-out-0", HeaderInterceptor::new("Interceptor-Header", "Value"))?;
//!
//! let out = chain.apply("reverse-out-0", Message::new("olleH"));
//! assert_eq!(out.header("Interceptor-Header"), Some("Value"));
//! # Ok::<(), streamfn::error::ConfigurationError>(())
//! ```

use crate::error::ConfigurationError;
use crate::message::Message;
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// A hook run on messages about to become visible on an output channel.
pub trait ChannelInterceptor: Send + Sync {
  /// Return the message to publish on `channel` in place of `message`.
  fn pre_send(&self, message: Message, channel: &str) -> Message;
}

impl<F> ChannelInterceptor for F
where
  F: Fn(Message, &str) -> Message + Send + Sync,
{
  fn pre_send(&self, message: Message, channel: &str) -> Message {
    self(message, channel)
  }
}

/// Adds or overwrites one header, keeping payload and other headers.
#[derive(Clone, Debug)]
pub struct HeaderInterceptor {
  name: String,
  value: String,
}

impl HeaderInterceptor {
  /// Interceptor setting `name` to `value`.
  pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      value: value.into(),
    }
  }
}

impl ChannelInterceptor for HeaderInterceptor {
  fn pre_send(&self, message: Message, _channel: &str) -> Message {
    message
      .to_builder()
      .set_header(self.name.clone(), self.value.clone())
      .build()
  }
}

/// An exact channel name or a glob over channel names.
#[derive(Clone)]
pub struct ChannelPattern {
  raw: String,
  glob: Option<Regex>,
}

impl ChannelPattern {
  /// Parse a pattern; names without `*` or `?` match exactly.
  pub fn new(pattern: &str) -> Result<Self, ConfigurationError> {
    if pattern.is_empty() {
      return Err(ConfigurationError::InvalidDestination(pattern.to_string()));
    }
    if !pattern.contains(['*', '?']) {
      return Ok(Self {
        raw: pattern.to_string(),
        glob: None,
      });
    }
    let mut expr = String::from("^");
    for c in pattern.chars() {
      match c {
        '*' => expr.push_str(".*"),
        '?' => expr.push('.'),
        other => expr.push_str(&regex::escape(&other.to_string())),
      }
    }
    expr.push('$');
    let glob =
      Regex::new(&expr).map_err(|_| ConfigurationError::InvalidDestination(pattern.to_string()))?;
    Ok(Self {
      raw: pattern.to_string(),
      glob: Some(glob),
    })
  }

  /// Whether `channel` matches.
  pub fn matches(&self, channel: &str) -> bool {
    match &self.glob {
      Some(glob) => glob.is_match(channel),
      None => self.raw == channel,
    }
  }

  /// The pattern as written.
  pub fn as_str(&self) -> &str {
    &self.raw
  }
}

impl fmt::Debug for ChannelPattern {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("ChannelPattern").field(&self.raw).finish()
  }
}

/// Ordered interceptors keyed by output channel pattern.
#[derive(Clone, Default)]
pub struct InterceptorChain {
  entries: Vec<(ChannelPattern, Arc<dyn ChannelInterceptor>)>,
}

impl InterceptorChain {
  /// An empty chain.
  pub fn new() -> Self {
    Self::default()
  }

  /// Append `interceptor` for output channels matching `pattern`.
  pub fn intercept(
    &mut self,
    pattern: &str,
    interceptor: impl ChannelInterceptor + 'static,
  ) -> Result<&mut Self, ConfigurationError> {
    self.intercept_shared(pattern, Arc::new(interceptor))
  }

  /// Like [`intercept`](Self::intercept) for an already shared interceptor.
  pub fn intercept_shared(
    &mut self,
    pattern: &str,
    interceptor: Arc<dyn ChannelInterceptor>,
  ) -> Result<&mut Self, ConfigurationError> {
    let pattern = ChannelPattern::new(pattern)?;
    self.entries.push((pattern, interceptor));
    Ok(self)
  }

  /// Run every matching interceptor, in registration order.
  pub fn apply(&self, channel: &str, message: Message) -> Message {
    self
      .entries
      .iter()
      .filter(|(pattern, _)| pattern.matches(channel))
      .fold(message, |message, (pattern, interceptor)| {
        trace!(channel = %channel, pattern = %pattern.as_str(), "intercepting");
        interceptor.pre_send(message, channel)
      })
  }

  /// Number of registered interceptors.
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  /// Whether no interceptor is registered.
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

impl fmt::Debug for InterceptorChain {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_list()
      .entries(self.entries.iter().map(|(pattern, _)| pattern))
      .finish()
  }
}
