//! Runtime configuration.
//!
//! Loaded from a JSON document:
//!
//! ```json
//! {
//!   "definition": ["uppercase", "reverse", "uppercase|reverse", "gather"],
//!   "bindings": {
//!     "uppercase-in-0": { "destination": "my-topic" },
//!     "functionWithError-in-0": { "consumer": { "max_attempts": 1 } },
//!     "date-out-0": { "producer": { "poller": { "fixed_delay_ms": 5000 } } }
//!   },
//!   "poller": { "fixed_delay_ms": 1000, "max_messages_per_poll": 1 },
//!   "dynamic_destination_cache_size": 10,
//!   "error_handler_definition": "myErrorHandler",
//!   "ingress": { "destination": "toStream" }
//! }
//! ```
//!
//! Every field is optional.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Default upper bound on dynamically created output bindings.
pub const DEFAULT_DYNAMIC_DESTINATION_CACHE_SIZE: usize = 10;

/// Top-level configuration document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
  /// Active function definitions; `a|b` composes `a` then `b`. Empty activates every unit.
  pub definition: Vec<String>,
  /// Per-binding settings keyed by binding name.
  pub bindings: HashMap<String, BindingConfig>,
  /// Default poller settings for sources.
  pub poller: PollerConfig,
  /// Upper bound on dynamic output bindings kept by the stream bridge.
  pub dynamic_destination_cache_size: usize,
  /// Registered sink used as the global error handler.
  pub error_handler_definition: Option<String>,
  /// Ingress endpoint settings.
  pub ingress: IngressConfig,
}

impl Default for StreamConfig {
  fn default() -> Self {
    Self {
      definition: Vec::new(),
      bindings: HashMap::new(),
      poller: PollerConfig::default(),
      dynamic_destination_cache_size: DEFAULT_DYNAMIC_DESTINATION_CACHE_SIZE,
      error_handler_definition: None,
      ingress: IngressConfig::default(),
    }
  }
}

impl StreamConfig {
  /// Parse a JSON document.
  pub fn from_json_str(json: &str) -> Result<Self, ConfigurationError> {
    let config: StreamConfig = serde_json::from_str(json)?;
    config.validate()?;
    Ok(config)
  }

  /// Read and parse a JSON file.
  pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
    let json = std::fs::read_to_string(path)?;
    Self::from_json_str(&json)
  }

  fn validate(&self) -> Result<(), ConfigurationError> {
    if self.ingress.destination.trim().is_empty() {
      return Err(ConfigurationError::InvalidDestination(
        self.ingress.destination.clone(),
      ));
    }
    if let Some(definition) = self.definition.iter().find(|d| d.trim().is_empty()) {
      return Err(ConfigurationError::InvalidComposition {
        definition: definition.clone(),
        reason: "empty definition".to_string(),
      });
    }
    Ok(())
  }
}

/// Settings for one binding.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BindingConfig {
  /// Destination channel replacing the conventional one.
  pub destination: Option<String>,
  /// Consumer-side settings (input bindings).
  pub consumer: Option<ConsumerConfig>,
  /// Producer-side settings (output bindings).
  pub producer: Option<ProducerConfig>,
}

/// Consumer-side binding settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsumerConfig {
  /// Attempts per message, including the first.
  pub max_attempts: Option<u32>,
}

/// Producer-side binding settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProducerConfig {
  /// Poller override for the source publishing on this binding.
  pub poller: Option<PollerOverride>,
}

/// Per-binding poller override.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollerOverride {
  /// Period between invocations in milliseconds.
  pub fixed_delay_ms: Option<u64>,
}

/// Default poller settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollerConfig {
  /// Period between invocations of single-shot sources, in milliseconds.
  pub fixed_delay_ms: u64,
  /// Maximum invocations per tick; a tick ends early when the source has no value.
  pub max_messages_per_poll: u32,
}

impl Default for PollerConfig {
  fn default() -> Self {
    Self {
      fixed_delay_ms: 1000,
      max_messages_per_poll: 1,
    }
  }
}

impl PollerConfig {
  /// Period between ticks.
  pub fn fixed_delay(&self) -> Duration {
    Duration::from_millis(self.fixed_delay_ms.max(1))
  }
}

/// Ingress endpoint settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngressConfig {
  /// Binding that receives every ingress body.
  pub destination: String,
}

impl Default for IngressConfig {
  fn default() -> Self {
    Self {
      destination: "toStream".to_string(),
    }
  }
}
