//! # Binder
//!
//! Maps unit ports to channel names.
//!
//! ## Naming convention
//!
//! Every port of a unit has a binding name `<unit>-in-<index>` or
//! `<unit>-out-<index>` with a 0-based index. When the index suffix is omitted
//! (`uppercase-in`) it defaults to 0. Unless overridden, the destination
//! channel has the same name as the binding.
//!
//! ## Overrides
//!
//! An explicit entry redirects a binding to an arbitrary destination, simulating
//! a mapping onto an external topic or queue:
//!
//! ```rust
//! use streamfn::binding::{Binder, Direction};
//!
//! let binder = Binder::new().with_destination("uppercase-in-0", "my-topic");
//! assert_eq!(binder.bind("uppercase", Direction::In, 0), "my-topic");
//! assert_eq!(binder.bind("uppercase", Direction::Out, 0), "uppercase-out-0");
//! ```
//!
//! ## Input claims
//!
//! Payload shapes are only known once a unit actually decodes, so conflicting
//! consumers of one destination are detected at the first dispatch through
//! [`Binder::claim_input`] rather than at bind time.

use crate::codec::PayloadShape;
use crate::config::StreamConfig;
use crate::error::ConfigurationError;
use crate::retry::RetryPolicy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::{LazyLock, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error};

static BINDING_NAME: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^(?P<unit>.+?)-(?P<direction>in|out)(?:-(?P<index>\d+))?$")
    .unwrap_or_else(|e| unreachable!("binding name pattern is valid: {e}"))
});

/// Which side of a unit a port is on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
  /// The unit consumes from the channel.
  In,
  /// The unit publishes to the channel.
  Out,
}

impl Display for Direction {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self {
      Direction::In => f.write_str("in"),
      Direction::Out => f.write_str("out"),
    }
  }
}

/// A parsed `<unit>-<direction>-<index>` binding name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BindingName {
  unit: String,
  direction: Direction,
  index: usize,
}

impl BindingName {
  /// Binding of input port `index` of `unit`.
  pub fn input(unit: impl Into<String>, index: usize) -> Self {
    Self {
      unit: unit.into(),
      direction: Direction::In,
      index,
    }
  }

  /// Binding of output port `index` of `unit`.
  pub fn output(unit: impl Into<String>, index: usize) -> Self {
    Self {
      unit: unit.into(),
      direction: Direction::Out,
      index,
    }
  }

  /// Unit name.
  pub fn unit(&self) -> &str {
    &self.unit
  }

  /// Port direction.
  pub fn direction(&self) -> Direction {
    self.direction
  }

  /// Port index.
  pub fn index(&self) -> usize {
    self.index
  }
}

impl Display for BindingName {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}-{}", self.unit, self.direction, self.index)
  }
}

impl FromStr for BindingName {
  type Err = ConfigurationError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || ConfigurationError::InvalidBindingName(s.to_string());
    let captures = BINDING_NAME.captures(s).ok_or_else(invalid)?;
    let direction = match &captures["direction"] {
      "in" => Direction::In,
      _ => Direction::Out,
    };
    let index = match captures.name("index") {
      Some(index) => index.as_str().parse().map_err(|_| invalid())?,
      None => 0,
    };
    Ok(Self {
      unit: captures["unit"].to_string(),
      direction,
      index,
    })
  }
}

/// `uppercase-in` and `uppercase-in-0` name the same binding.
fn canonical(binding: String) -> String {
  match binding.parse::<BindingName>() {
    Ok(name) => name.to_string(),
    Err(_) => binding,
  }
}

/// Resolves bindings to channels and holds per-binding settings.
#[derive(Debug, Default)]
pub struct Binder {
  destinations: HashMap<String, String>,
  max_attempts: HashMap<String, u32>,
  poll_delays: HashMap<String, Duration>,
  claims: Mutex<HashMap<String, InputClaim>>,
}

#[derive(Debug, Clone)]
struct InputClaim {
  unit: String,
  shape: PayloadShape,
}

impl Binder {
  /// A binder with no overrides.
  pub fn new() -> Self {
    Self::default()
  }

  /// Build a binder from the `bindings` section of a configuration.
  pub fn from_config(config: &StreamConfig) -> Result<Self, ConfigurationError> {
    let mut binder = Self::new();
    for (binding, settings) in &config.bindings {
      if let Some(destination) = &settings.destination {
        if destination.trim().is_empty() {
          return Err(ConfigurationError::InvalidDestination(binding.clone()));
        }
        binder = binder.with_destination(binding.clone(), destination.clone());
      }
      if let Some(max_attempts) = settings.consumer.as_ref().and_then(|c| c.max_attempts) {
        binder = binder.with_max_attempts(binding.clone(), max_attempts);
      }
      if let Some(delay) = settings
        .producer
        .as_ref()
        .and_then(|p| p.poller.as_ref())
        .and_then(|p| p.fixed_delay_ms)
      {
        binder = binder.with_poll_delay(binding.clone(), Duration::from_millis(delay));
      }
    }
    Ok(binder)
  }

  /// Redirect `binding` to `destination`.
  pub fn with_destination(mut self, binding: impl Into<String>, destination: impl Into<String>) -> Self {
    self
      .destinations
      .insert(canonical(binding.into()), destination.into());
    self
  }

  /// Override the attempt limit for messages consumed through `binding`.
  pub fn with_max_attempts(mut self, binding: impl Into<String>, max_attempts: u32) -> Self {
    self.max_attempts.insert(canonical(binding.into()), max_attempts);
    self
  }

  /// Override the poll period of the source publishing through `binding`.
  pub fn with_poll_delay(mut self, binding: impl Into<String>, delay: Duration) -> Self {
    self.poll_delays.insert(canonical(binding.into()), delay);
    self
  }

  /// Channel name for port `index` of `unit` in `direction`.
  pub fn bind(&self, unit: &str, direction: Direction, index: usize) -> String {
    self.resolve(&BindingName {
      unit: unit.to_string(),
      direction,
      index,
    }
    .to_string())
  }

  /// Channel name for input port `index` of `unit`.
  pub fn input(&self, unit: &str, index: usize) -> String {
    self.bind(unit, Direction::In, index)
  }

  /// Channel name for output port `index` of `unit`.
  pub fn output(&self, unit: &str, index: usize) -> String {
    self.bind(unit, Direction::Out, index)
  }

  /// Channel name for an arbitrary binding name.
  ///
  /// Convention names without an index (`reverse-out`) resolve like index 0;
  /// names outside the convention (`toStream`) resolve to themselves unless
  /// overridden.
  pub fn resolve(&self, binding: &str) -> String {
    let binding = canonical(binding.to_string());
    match self.destinations.get(&binding) {
      Some(destination) => destination.clone(),
      None => binding,
    }
  }

  /// Retry policy for messages consumed on input port `index` of `unit`: the
  /// configured override for that binding, else `declared`.
  pub fn retry_policy(&self, unit: &str, index: usize, declared: Option<RetryPolicy>) -> RetryPolicy {
    match self.max_attempts_override(unit, index) {
      Some(max_attempts) => RetryPolicy::new(max_attempts),
      None => declared.unwrap_or_default(),
    }
  }

  /// Retry policy for a tuple drawn from input ports `0..ports` of `unit`.
  ///
  /// A tuple holds one message per port, so the smallest override among those
  /// ports applies; without any override, `declared`.
  pub fn tuple_retry_policy(&self, unit: &str, ports: usize, declared: Option<RetryPolicy>) -> RetryPolicy {
    match (0..ports)
      .filter_map(|index| self.max_attempts_override(unit, index))
      .min()
    {
      Some(max_attempts) => RetryPolicy::new(max_attempts),
      None => declared.unwrap_or_default(),
    }
  }

  fn max_attempts_override(&self, unit: &str, index: usize) -> Option<u32> {
    self
      .max_attempts
      .get(&BindingName::input(unit, index).to_string())
      .copied()
  }

  /// Poll period override for a source's output port 0.
  pub fn poll_delay(&self, unit: &str) -> Option<Duration> {
    self
      .poll_delays
      .get(&BindingName::output(unit, 0).to_string())
      .copied()
  }

  /// Record that `unit` consumes `channel` expecting `shape`.
  ///
  /// Fails when another unit already consumes the channel with an incompatible
  /// shape. Competing consumers with compatible shapes are allowed.
  pub fn claim_input(
    &self,
    channel: &str,
    unit: &str,
    shape: PayloadShape,
  ) -> Result<(), ConfigurationError> {
    let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
    match claims.get(channel) {
      Some(existing) if existing.unit != unit && !existing.shape.is_compatible_with(shape) => {
        error!(
          channel = %channel,
          existing = %existing.unit,
          unit = %unit,
          "conflicting consumers on one destination"
        );
        Err(ConfigurationError::IncompatibleInputs {
          channel: channel.to_string(),
          existing: existing.unit.clone(),
          existing_shape: existing.shape,
          unit: unit.to_string(),
          shape,
        })
      }
      Some(_) => Ok(()),
      None => {
        debug!(channel = %channel, unit = %unit, shape = %shape, "input claimed");
        claims.insert(
          channel.to_string(),
          InputClaim {
            unit: unit.to_string(),
            shape,
          },
        );
        Ok(())
      }
    }
  }
}
