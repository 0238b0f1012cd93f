//! Demo application: the units and wiring run by the `streamfn` binary.
//!
//! | Unit                              | Kind                | Behavior                                  |
//! |-----------------------------------|---------------------|-------------------------------------------|
//! | `uppercase`                       | transform           | upper-cases text                          |
//! | `reverse`                         | transform           | reverses text                             |
//! | `sink`                            | sink                | logs each message                         |
//! | `date`                            | single-shot source  | the instant 12345 ms after the epoch      |
//! | `stringSupplier`                  | continuous source   | `Hello from Supplier` every second        |
//! | `gather`                          | zip                 | text from port 0 + integer from port 1    |
//! | `interleave`                      | merge               | tags each arrival with its port           |
//! | `concat`                          | transform           | joins a JSON list of strings              |
//! | `uppercasePostProcessingFunction` | transform           | upper-cases, then logs after publishing   |
//! | `myErrorHandler`                  | sink                | receives exhausted messages               |
//! | `functionWithError`               | transform           | always fails                              |

use crate::config::StreamConfig;
use crate::error::ProcessingError;
use crate::interceptor::HeaderInterceptor;
use crate::runtime::StreamRuntimeBuilder;
use crate::unit::Unit;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::{Instant, interval_at};
use tracing::info;

/// Channel whose messages get the demo interceptor header.
pub const INTERCEPTED_CHANNEL: &str = "reverse-out-0";
/// Header added by the demo interceptor.
pub const INTERCEPTOR_HEADER: &str = "Interceptor-Header";
/// Error handler unit named by [`demo_config`].
pub const ERROR_HANDLER: &str = "myErrorHandler";

/// Every demo unit.
pub fn demo_units() -> Vec<Unit> {
  vec![
    Unit::transform("uppercase", |input: String| input.to_uppercase()),
    Unit::sink("sink", |input: String| info!(payload = %input, "sink received")),
    Unit::supplier("date", || DateTime::<Utc>::from_timestamp_millis(12345)),
    Unit::transform("reverse", |input: String| input.chars().rev().collect::<String>()),
    Unit::continuous_supplier("stringSupplier", || {
      async_stream::stream! {
        let period = Duration::from_secs(1);
        let mut ticks = interval_at(Instant::now() + period, period);
        loop {
          ticks.tick().await;
          yield "Hello from Supplier";
        }
      }
    }),
    Unit::zip2("gather", |text: String, number: i64| format!("{text}{number}")),
    Unit::merge("interleave", 2, |index: usize, input: String| format!("{index}:{input}")),
    Unit::transform("concat", |inputs: Vec<String>| inputs.concat()),
    Unit::transform("uppercasePostProcessingFunction", |input: String| input.to_uppercase())
      .with_post_process(|_| info!("Post processing...")),
    Unit::sink(ERROR_HANDLER, |_: bytes::Bytes| info!("Error detected!")),
    Unit::try_transform("functionWithError", |_: String| -> Result<String, ProcessingError> {
      Err(ProcessingError::new("functionWithError always fails"))
    }),
  ]
}

/// A builder with every demo unit and the demo interceptor.
pub fn demo_builder() -> StreamRuntimeBuilder {
  StreamRuntimeBuilder::new()
    .units(demo_units())
    .interceptor(
      INTERCEPTED_CHANNEL,
      HeaderInterceptor::new(INTERCEPTOR_HEADER, "Value"),
    )
}

/// The configuration the binary uses when no file is given.
pub fn demo_config() -> StreamConfig {
  StreamConfig {
    definition: [
      "uppercase",
      "reverse",
      "uppercase|reverse",
      "gather",
      "concat",
      "uppercasePostProcessingFunction",
      "functionWithError",
      "date",
      "stringSupplier",
    ]
    .into_iter()
    .map(str::to_string)
    .collect(),
    error_handler_definition: Some(ERROR_HANDLER.to_string()),
    ..StreamConfig::default()
  }
}
