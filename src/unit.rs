//! # Processing Units
//!
//! A [`Unit`] is a named function bound to channels. Its [`UnitKind`] decides
//! how it is driven:
//!
//! - **Transform**: one input, one output. Driven by the dispatcher.
//! - **Sink**: one input, no output. Driven by the dispatcher.
//! - **Source**: no input. Driven by the poller, either once per tick
//!   ([`SourceKind::SingleShot`]) or as one long-running stream
//!   ([`SourceKind::Continuous`]). The distinction is fixed by the constructor
//!   used, never inferred at runtime.
//! - **Gather**: several inputs, one output. Driven by the dispatcher's fan-in
//!   machinery, either zipping one message per input
//!   ([`GatherStrategy::Zip`]) or reacting to every arrival
//!   ([`GatherStrategy::Merge`]).
//!
//! Typed constructors decode payloads with [`FromPayload`] and encode results
//! with [`IntoPayload`]; decode failures count as processing failures and are
//! retried like any other.
//!
//! ```rust
//! use streamfn::unit::Unit;
//!
//! let uppercase = Unit::transform("uppercase", |s: String| s.to_uppercase());
//! assert_eq!(uppercase.name(), "uppercase");
//! assert_eq!(uppercase.input_count(), 1);
//! ```

use crate::codec::{FromPayload, IntoPayload, PayloadShape};
use crate::error::ProcessingError;
use crate::message::Message;
use crate::retry::RetryPolicy;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::{BoxStream, Stream};
use std::fmt;
use std::sync::Arc;

/// Message-level transform function.
pub type TransformFn = Arc<dyn Fn(&Message) -> Result<Bytes, ProcessingError> + Send + Sync>;
/// Message-level sink function.
pub type SinkFn = Arc<dyn Fn(&Message) -> Result<(), ProcessingError> + Send + Sync>;
/// Single-shot source: `Ok(None)` means nothing to publish this tick.
pub type SupplyFn = Arc<dyn Fn() -> Result<Option<Bytes>, ProcessingError> + Send + Sync>;
/// Continuous source: invoked once, produces an unbounded stream.
pub type ContinuousFn = Arc<dyn Fn() -> BoxStream<'static, Bytes> + Send + Sync>;
/// Zip combiner: one message per input, in port order.
pub type ZipFn = Arc<dyn Fn(&[Message]) -> Result<Bytes, ProcessingError> + Send + Sync>;
/// Merge combiner: input port index and the message that arrived on it.
pub type MergeFn = Arc<dyn Fn(usize, &Message) -> Result<Bytes, ProcessingError> + Send + Sync>;
/// Callback run with a transform's output after it was appended.
pub type PostProcessFn = Arc<dyn Fn(&Message) + Send + Sync>;

/// How a source produces payloads.
#[derive(Clone)]
pub enum SourceKind {
  /// Invoked once per poller tick.
  SingleShot(SupplyFn),
  /// Invoked once at startup; every element is published as it is produced.
  Continuous(ContinuousFn),
}

/// How a multi-input unit combines its inputs.
#[derive(Clone)]
pub enum GatherStrategy {
  /// One output per complete tuple, pairing inputs in arrival order.
  Zip(ZipFn),
  /// One output per arrival on any input.
  Merge(MergeFn),
}

/// The behavior of a unit.
#[derive(Clone)]
pub enum UnitKind {
  /// One input, one output.
  Transform(TransformFn),
  /// One input, no output.
  Sink(SinkFn),
  /// No input.
  Source(SourceKind),
  /// Several inputs, one output.
  Gather(GatherStrategy),
}

impl UnitKind {
  /// Short label for logs.
  pub fn label(&self) -> &'static str {
    match self {
      UnitKind::Transform(_) => "transform",
      UnitKind::Sink(_) => "sink",
      UnitKind::Source(SourceKind::SingleShot(_)) => "source",
      UnitKind::Source(SourceKind::Continuous(_)) => "continuous-source",
      UnitKind::Gather(GatherStrategy::Zip(_)) => "zip",
      UnitKind::Gather(GatherStrategy::Merge(_)) => "merge",
    }
  }
}

/// A named processing unit and its declared ports.
#[derive(Clone)]
pub struct Unit {
  name: String,
  kind: UnitKind,
  input_shapes: Vec<PayloadShape>,
  outputs: usize,
  retry: Option<RetryPolicy>,
  post_process: Option<PostProcessFn>,
}

impl Unit {
  /// A unit from raw parts.
  ///
  /// `input_shapes` has one entry per input port.
  pub fn from_parts(
    name: impl Into<String>,
    kind: UnitKind,
    input_shapes: Vec<PayloadShape>,
  ) -> Self {
    let outputs = match kind {
      UnitKind::Sink(_) => 0,
      _ => 1,
    };
    Self {
      name: name.into(),
      kind,
      input_shapes,
      outputs,
      retry: None,
      post_process: None,
    }
  }

  /// An infallible typed transform.
  pub fn transform<I, O, F>(name: impl Into<String>, f: F) -> Self
  where
    I: FromPayload,
    O: IntoPayload,
    F: Fn(I) -> O + Send + Sync + 'static,
  {
    Self::try_transform(name, move |input: I| Ok(f(input)))
  }

  /// A fallible typed transform.
  pub fn try_transform<I, O, F>(name: impl Into<String>, f: F) -> Self
  where
    I: FromPayload,
    O: IntoPayload,
    F: Fn(I) -> Result<O, ProcessingError> + Send + Sync + 'static,
  {
    let function: TransformFn = Arc::new(move |message: &Message| -> Result<Bytes, ProcessingError> {
      let input = I::from_payload(message.payload())?;
      f(input)?.into_payload()
    });
    Self::from_parts(name, UnitKind::Transform(function), vec![I::SHAPE])
  }

  /// An infallible typed sink.
  pub fn sink<I, F>(name: impl Into<String>, f: F) -> Self
  where
    I: FromPayload,
    F: Fn(I) + Send + Sync + 'static,
  {
    Self::try_sink(name, move |input: I| {
      f(input);
      Ok(())
    })
  }

  /// A fallible typed sink.
  pub fn try_sink<I, F>(name: impl Into<String>, f: F) -> Self
  where
    I: FromPayload,
    F: Fn(I) -> Result<(), ProcessingError> + Send + Sync + 'static,
  {
    let function: SinkFn = Arc::new(move |message: &Message| -> Result<(), ProcessingError> {
      f(I::from_payload(message.payload())?)
    });
    Self::from_parts(name, UnitKind::Sink(function), vec![I::SHAPE])
  }

  /// A sink receiving whole messages, headers included.
  pub fn message_sink<F>(name: impl Into<String>, f: F) -> Self
  where
    F: Fn(&Message) -> Result<(), ProcessingError> + Send + Sync + 'static,
  {
    Self::from_parts(name, UnitKind::Sink(Arc::new(f)), vec![PayloadShape::Bytes])
  }

  /// A single-shot source polled once per tick; `None` skips the tick.
  pub fn supplier<O, F>(name: impl Into<String>, f: F) -> Self
  where
    O: IntoPayload,
    F: Fn() -> Option<O> + Send + Sync + 'static,
  {
    let function: SupplyFn = Arc::new(move || f().map(IntoPayload::into_payload).transpose());
    Self::from_parts(
      name,
      UnitKind::Source(SourceKind::SingleShot(function)),
      Vec::new(),
    )
  }

  /// A continuous source: `f` is called once and its stream drained forever.
  ///
  /// Elements that fail to encode are skipped.
  pub fn continuous_supplier<O, S, F>(name: impl Into<String>, f: F) -> Self
  where
    O: IntoPayload + Send + 'static,
    S: Stream<Item = O> + Send + 'static,
    F: Fn() -> S + Send + Sync + 'static,
  {
    let function: ContinuousFn = Arc::new(move || {
      f()
        .filter_map(|item| async move { item.into_payload().ok() })
        .boxed()
    });
    Self::from_parts(
      name,
      UnitKind::Source(SourceKind::Continuous(function)),
      Vec::new(),
    )
  }

  /// A two-input unit invoked once per zipped pair.
  pub fn zip2<A, B, O, F>(name: impl Into<String>, f: F) -> Self
  where
    A: FromPayload,
    B: FromPayload,
    O: IntoPayload,
    F: Fn(A, B) -> O + Send + Sync + 'static,
  {
    let function: ZipFn = Arc::new(move |messages: &[Message]| -> Result<Bytes, ProcessingError> {
      let [first, second] = messages else {
        return Err(ProcessingError::new(format!(
          "expected 2 zipped messages, got {}",
          messages.len()
        )));
      };
      let a = A::from_payload(first.payload())?;
      let b = B::from_payload(second.payload())?;
      f(a, b).into_payload()
    });
    Self::from_parts(
      name,
      UnitKind::Gather(GatherStrategy::Zip(function)),
      vec![A::SHAPE, B::SHAPE],
    )
  }

  /// An `inputs`-way merge invoked once per arrival on any input.
  pub fn merge<I, O, F>(name: impl Into<String>, inputs: usize, f: F) -> Self
  where
    I: FromPayload,
    O: IntoPayload,
    F: Fn(usize, I) -> O + Send + Sync + 'static,
  {
    let function: MergeFn = Arc::new(move |index: usize, message: &Message| -> Result<Bytes, ProcessingError> {
      f(index, I::from_payload(message.payload())?).into_payload()
    });
    Self::from_parts(
      name,
      UnitKind::Gather(GatherStrategy::Merge(function)),
      vec![I::SHAPE; inputs.max(1)],
    )
  }

  /// Declare the retry policy used when no binding override exists.
  pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
    self.retry = Some(policy);
    self
  }

  /// Run `f` with each output message after it was appended to the output channel.
  pub fn with_post_process<F>(mut self, f: F) -> Self
  where
    F: Fn(&Message) + Send + Sync + 'static,
  {
    self.post_process = Some(Arc::new(f));
    self
  }

  /// Publish to `outputs` output ports instead of one. Every element goes to every port.
  pub fn with_outputs(mut self, outputs: usize) -> Self {
    if !matches!(self.kind, UnitKind::Sink(_)) {
      self.outputs = outputs.max(1);
    }
    self
  }

  /// Registered name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Behavior.
  pub fn kind(&self) -> &UnitKind {
    &self.kind
  }

  /// Number of input ports.
  pub fn input_count(&self) -> usize {
    self.input_shapes.len()
  }

  /// Payload shape expected on input port `index`.
  pub fn input_shape(&self, index: usize) -> Option<PayloadShape> {
    self.input_shapes.get(index).copied()
  }

  /// Number of output ports.
  pub fn output_count(&self) -> usize {
    self.outputs
  }

  /// Declared retry policy, if any.
  pub fn retry(&self) -> Option<RetryPolicy> {
    self.retry
  }

  /// Post-processing callback, if any.
  pub fn post_process(&self) -> Option<&PostProcessFn> {
    self.post_process.as_ref()
  }

  /// Whether this unit has no input and is driven by the poller.
  pub fn is_source(&self) -> bool {
    matches!(self.kind, UnitKind::Source(_))
  }
}

impl fmt::Debug for Unit {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Unit")
      .field("name", &self.name)
      .field("kind", &self.kind.label())
      .field("input_shapes", &self.input_shapes)
      .field("outputs", &self.outputs)
      .field("retry", &self.retry)
      .finish()
  }
}
