//! In-process pull exporter.
//!
//! Holds the observable instruments registered against it and renders all of
//! them, freshly observed, whenever a scrape asks for it.

use crate::instrumentation::{InstrumentDescriptor, Meter, ObservableCallback};
use crate::output::ExpositionFormatter;
use crate::output::prometheus::PrometheusFormatter;

pub struct PrometheusExporter {
    formatter: Box<dyn ExpositionFormatter>,
    instruments: Vec<(InstrumentDescriptor, ObservableCallback)>,
}

impl Default for PrometheusExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl PrometheusExporter {
    pub fn new() -> Self {
        Self::with_formatter(Box::new(PrometheusFormatter))
    }

    pub fn with_formatter(formatter: Box<dyn ExpositionFormatter>) -> Self {
        PrometheusExporter {
            formatter,
            instruments: Vec::new(),
        }
    }

    /// Names of the registered instruments, in registration order.
    pub fn instrument_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.instruments.iter().map(|(d, _)| d.name)
    }

    /// Observe every instrument and render the result.
    ///
    /// Instruments are observed one after another; each callback takes its own
    /// registry snapshot.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (descriptor, callback) in &self.instruments {
            let measurements = callback();
            self.formatter.format(descriptor, &measurements, &mut out);
        }
        out
    }
}

impl Meter for PrometheusExporter {
    fn register_observable(
        &mut self,
        descriptor: InstrumentDescriptor,
        callback: ObservableCallback,
    ) {
        tracing::debug!(instrument = descriptor.name, "registered observable instrument");
        self.instruments.push((descriptor, callback));
    }
}

impl std::fmt::Debug for PrometheusExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusExporter")
            .field("instruments", &self.instrument_names().collect::<Vec<_>>())
            .finish()
    }
}
