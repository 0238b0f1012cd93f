//! # Pipeline Composer
//!
//! Chains registered units end-to-end into one unit that is bound under its own
//! name. The composite of `uppercase|reverse` is named `uppercasereverse` and is
//! reachable on `uppercasereverse-in-0` / `uppercasereverse-out-0`; the
//! intermediate result never touches a channel.
//!
//! Each member runs under its own declared retry policy and fully completes
//! before the next member sees its result. A member that exhausts its retries
//! fails the whole composite for that message, so later members are never
//! invoked. The composite itself is not retried again on top of that, and the
//! failure is reported against the member that exhausted its retries.
//!
//! Allowed shapes:
//!
//! | Chain                          | Composite        |
//! |--------------------------------|------------------|
//! | transform, ..., transform      | transform        |
//! | transform, ..., sink           | sink             |
//! | single-shot source, ..., transform | single-shot source |
//!
//! Fan-in units are composed differently: see [`crate::gather`].

use crate::codec::PayloadShape;
use crate::error::{ConfigurationError, ProcessingError};
use crate::message::Message;
use crate::registry::UnitRegistry;
use crate::retry::RetryPolicy;
use crate::unit::{SinkFn, SourceKind, SupplyFn, TransformFn, Unit, UnitKind};
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

/// Separates members of a composite definition.
pub const COMPOSITION_SEPARATOR: char = '|';
/// Separates several definitions written in one entry.
pub const DEFINITION_SEPARATOR: char = ';';

/// Name of the composite of `members`: their names concatenated.
pub fn composite_name<S: AsRef<str>>(members: &[S]) -> String {
  members.iter().map(AsRef::as_ref).collect()
}

/// Flatten `a;b|c` style entries into individual definitions.
pub fn split_definitions<S: AsRef<str>>(entries: &[S]) -> Vec<String> {
  entries
    .iter()
    .flat_map(|entry| entry.as_ref().split(DEFINITION_SEPARATOR))
    .map(str::trim)
    .filter(|definition| !definition.is_empty())
    .map(str::to_string)
    .collect()
}

/// Resolve `definition` (`a` or `a|b|...`) against `registry`.
///
/// A single name returns that unit unchanged.
pub fn compose(registry: &UnitRegistry, definition: &str) -> Result<Unit, ConfigurationError> {
  let names: Vec<&str> = definition
    .split(COMPOSITION_SEPARATOR)
    .map(str::trim)
    .collect();
  if names.iter().any(|name| name.is_empty()) {
    return Err(invalid(definition, "empty member"));
  }
  let members = names
    .iter()
    .map(|name| registry.require(name).cloned())
    .collect::<Result<Vec<_>, _>>()?;
  if let [single] = members.as_slice() {
    return Ok(single.clone());
  }
  compose_units(&composite_name(&names), &members)
    .map_err(|reason| invalid(definition, &reason))
}

fn invalid(definition: &str, reason: &str) -> ConfigurationError {
  ConfigurationError::InvalidComposition {
    definition: definition.to_string(),
    reason: reason.to_string(),
  }
}

#[derive(Clone)]
struct Stage {
  name: String,
  function: TransformFn,
  policy: RetryPolicy,
}

fn run_stages(stages: &[Stage], input: Message) -> Result<Message, ProcessingError> {
  stages.iter().try_fold(input, |message, stage| {
    let payload = stage
      .policy
      .run(&stage.name, |_| (stage.function)(&message))
      .map_err(|e| ProcessingError::Exhausted(Box::new(e)))?;
    Ok(Message::derive(&message, payload))
  })
}

/// Chain `members` in order into a unit named `name`.
pub fn compose_units(name: &str, members: &[Unit]) -> Result<Unit, String> {
  let (first, rest) = members
    .split_first()
    .ok_or_else(|| "nothing to compose".to_string())?;
  let (last, _) = members
    .split_last()
    .ok_or_else(|| "nothing to compose".to_string())?;

  let head: Option<SupplyFn> = match first.kind() {
    UnitKind::Source(SourceKind::SingleShot(supply)) => Some(supply.clone()),
    UnitKind::Source(SourceKind::Continuous(_)) => {
      return Err(format!("continuous source `{}` cannot be composed", first.name()));
    }
    _ => None,
  };
  let tail: Option<(String, SinkFn, RetryPolicy)> = match last.kind() {
    UnitKind::Sink(sink) => Some((
      last.name().to_string(),
      sink.clone(),
      last.retry().unwrap_or_default(),
    )),
    _ => None,
  };
  if head.is_some() && tail.is_some() {
    return Err("a composite needs an input or an output".to_string());
  }

  let middle = if head.is_some() { rest } else { members };
  let middle = if tail.is_some() {
    &middle[..middle.len().saturating_sub(1)]
  } else {
    middle
  };
  let stages = middle
    .iter()
    .map(|unit| match unit.kind() {
      UnitKind::Transform(function) => Ok(Stage {
        name: unit.name().to_string(),
        function: function.clone(),
        policy: unit.retry().unwrap_or_default(),
      }),
      other => Err(format!(
        "`{}` is a {} and cannot be chained here",
        unit.name(),
        other.label()
      )),
    })
    .collect::<Result<Vec<_>, _>>()?;
  let stages: Arc<[Stage]> = stages.into();
  debug!(composite = %name, members = members.len(), "composing units");

  let unit = match (head, tail) {
    (Some(supply), None) => {
      let function: SupplyFn = Arc::new(move || -> Result<Option<Bytes>, ProcessingError> {
        let Some(payload) = supply()? else {
          return Ok(None);
        };
        let output = run_stages(&stages, Message::new(payload))?;
        Ok(Some(output.into_payload()))
      });
      Unit::from_parts(name, UnitKind::Source(SourceKind::SingleShot(function)), Vec::new())
    }
    (None, Some((sink_name, sink, policy))) => {
      let function: SinkFn = Arc::new(move |message: &Message| -> Result<(), ProcessingError> {
        let output = run_stages(&stages, message.clone())?;
        policy
          .run(&sink_name, |_| sink(&output))
          .map_err(|e| ProcessingError::Exhausted(Box::new(e)))
      });
      Unit::from_parts(name, UnitKind::Sink(function), first_shapes(first))
    }
    _ => {
      let function: TransformFn = Arc::new(move |message: &Message| -> Result<Bytes, ProcessingError> {
        run_stages(&stages, message.clone()).map(Message::into_payload)
      });
      Unit::from_parts(name, UnitKind::Transform(function), first_shapes(first))
    }
  };
  let unit = unit.with_retry(RetryPolicy::no_retry());
  Ok(match last.post_process() {
    Some(post_process) => {
      let post_process = post_process.clone();
      unit.with_post_process(move |message| post_process(message))
    }
    None => unit,
  })
}

fn first_shapes(first: &Unit) -> Vec<PayloadShape> {
  (0..first.input_count())
    .filter_map(|index| first.input_shape(index))
    .collect()
}
