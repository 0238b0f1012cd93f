//! # streamfn
//!
//! A small message-driven runtime for binding plain functions to named channels.
//!
//! Units (transforms, sinks, sources and fan-in gathers) are registered once at
//! startup. The runtime resolves their binding names (`<unit>-in-0`,
//! `<unit>-out-0`) to in-memory channels, drives each unit on its own task,
//! retries failures, runs interceptors before every append and routes exhausted
//! messages to an error handler.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use streamfn::message::Message;
//! use streamfn::runtime::StreamRuntimeBuilder;
//! use streamfn::unit::Unit;
//!
//! # async fn demo() -> streamfn::error::Result<()> {
//! let runtime = StreamRuntimeBuilder::new()
//!     .unit(Unit::transform("uppercase", |s: String| s.to_uppercase()))
//!     .build()?;
//! runtime.start();
//! runtime.input_destination().send(Message::new("hello"), "uppercase-in-0");
//! let out = runtime
//!     .output_destination()
//!     .receive(Duration::from_secs(1), "uppercase-out-0")
//!     .await;
//! assert_eq!(out.map(|m| m.payload().clone()), Some("HELLO".into()));
//! runtime.shutdown().await?;
//! # Ok(())
//! # }
//! ```

// Documentation enforcement - treat missing docs as errors
#![deny(missing_docs)]

/// Demo units and wiring.
pub mod app;
/// Binding names and their resolution to channels.
pub mod binding;
/// Publishing to arbitrary output bindings from outside a unit.
pub mod bridge;
/// In-memory FIFO channels.
pub mod channel;
/// Payload encoding and decoding.
pub mod codec;
/// `a|b` function composition.
pub mod composer;
/// Runtime configuration.
pub mod config;
/// Test binder endpoints.
pub mod destination;
/// Dispatch loops for units with inputs.
pub mod dispatcher;
/// Error types.
pub mod error;
/// Handling of messages whose retries are exhausted.
pub mod error_handler;
mod gather;
/// HTTP ingress.
pub mod ingress;
/// Channel interceptors.
pub mod interceptor;
/// Messages and headers.
pub mod message;
/// Interception followed by append.
pub mod outbound;
/// Scheduling of source units.
pub mod poller;
/// Registered units.
pub mod registry;
/// Retry policies.
pub mod retry;
/// Runtime assembly and lifecycle.
pub mod runtime;
/// Processing units.
pub mod unit;

#[cfg(test)]
mod codec_test;
#[cfg(test)]
mod dispatcher_test;
#[cfg(test)]
mod error_handler_test;
#[cfg(test)]
mod gather_test;
#[cfg(test)]
mod ingress_test;
