//! `switchbot-listener` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup and
//! process exit codes. The core “business logic” lives in [`crate::app`] where it
//! can be tested deterministically with an injected scanner and a local listener.
//!
//! Data flows one way: a [`scanner`] backend yields raw advertisements, the
//! [`listener`] decodes them into the [`registry`], and the [`exporter`] reads
//! the registry back through the observable instruments set up by
//! [`instrumentation`] whenever `/metrics` is scraped.

pub mod advertisement;
pub mod app;
pub mod decoder;
pub mod duration;
pub mod exporter;
pub mod instrumentation;
pub mod listener;
pub mod output;
pub mod registry;
pub mod scanner;
pub mod server;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use advertisement::Advertisement;
pub use decoder::{DecodeError, DecodedReading, decode_switchbot_data};
pub use duration::parse_duration;
pub use exporter::PrometheusExporter;
pub use instrumentation::{
    InstrumentationOptions, Measurement, Meter, add_switchbot_instrumentation,
};
pub use output::ExpositionFormatter;
pub use output::prometheus::PrometheusFormatter;
pub use registry::{Observation, SensorReading, SensorRegistry};
pub use scanner::{Backend, ScanError};
