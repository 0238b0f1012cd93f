//! Unit registry: the explicit map from unit name to [`Unit`].
//!
//! Built once at startup and shared read-only (behind an `Arc`) by the
//! dispatcher, poller and composer.

use crate::codec::PayloadShape;
use crate::error::ConfigurationError;
use crate::retry::RetryPolicy;
use crate::unit::{SinkFn, TransformFn, Unit, UnitKind};
use std::collections::BTreeMap;
use tracing::debug;

/// Registered units, iterated in name order.
#[derive(Clone, Debug, Default)]
pub struct UnitRegistry {
  units: BTreeMap<String, Unit>,
}

impl UnitRegistry {
  /// An empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a unit. Names must be unique.
  pub fn register(&mut self, unit: Unit) -> Result<&mut Self, ConfigurationError> {
    if self.units.contains_key(unit.name()) {
      return Err(ConfigurationError::DuplicateUnit(unit.name().to_string()));
    }
    debug!(unit = %unit.name(), kind = unit.kind().label(), "registering unit");
    self.units.insert(unit.name().to_string(), unit);
    Ok(self)
  }

  /// Register a message-level transform with an explicit retry policy.
  pub fn register_transform(
    &mut self,
    name: &str,
    function: TransformFn,
    retry: RetryPolicy,
  ) -> Result<&mut Self, ConfigurationError> {
    self.register(
      Unit::from_parts(name, UnitKind::Transform(function), vec![PayloadShape::Bytes])
        .with_retry(retry),
    )
  }

  /// Register a message-level sink with an explicit retry policy.
  pub fn register_sink(
    &mut self,
    name: &str,
    function: SinkFn,
    retry: RetryPolicy,
  ) -> Result<&mut Self, ConfigurationError> {
    self.register(
      Unit::from_parts(name, UnitKind::Sink(function), vec![PayloadShape::Bytes]).with_retry(retry),
    )
  }

  /// Look up a unit.
  pub fn get(&self, name: &str) -> Option<&Unit> {
    self.units.get(name)
  }

  /// Look up a unit or fail with [`ConfigurationError::UnknownUnit`].
  pub fn require(&self, name: &str) -> Result<&Unit, ConfigurationError> {
    self
      .get(name)
      .ok_or_else(|| ConfigurationError::UnknownUnit(name.to_string()))
  }

  /// Whether a unit with this name exists.
  pub fn contains(&self, name: &str) -> bool {
    self.units.contains_key(name)
  }

  /// Every unit, in name order.
  pub fn units(&self) -> impl Iterator<Item = &Unit> {
    self.units.values()
  }

  /// Number of registered units.
  pub fn len(&self) -> usize {
    self.units.len()
  }

  /// Whether nothing is registered.
  pub fn is_empty(&self) -> bool {
    self.units.is_empty()
  }
}
