//! Output formatters for instrument measurements.
//!
//! A formatter turns the measurements one instrument produced during a scrape
//! into the text a metrics backend expects. Prometheus text exposition is the
//! only format served today.

pub mod prometheus;

use crate::instrumentation::{InstrumentDescriptor, Measurement};

/// Trait for formatting the measurements of one instrument.
pub trait ExpositionFormatter: Send + Sync {
    /// Append the formatted `measurements` of `descriptor` to `out`.
    fn format(
        &self,
        descriptor: &InstrumentDescriptor,
        measurements: &[Measurement],
        out: &mut String,
    );
}
