//! Pull-based metric instruments backed by the [`SensorRegistry`].
//!
//! Every exported metric is a projection of the registry: a predicate choosing
//! which readings take part and a converter extracting the value. A pull takes
//! a registry snapshot (evicting stale devices as a side effect) and maps the
//! surviving readings to [`Measurement`]s tagged with the device id.

use crate::registry::{SensorReading, SensorRegistry};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Value of the `type` tag on every measurement.
pub const SOURCE_TYPE: &str = "switchbot";

/// Staleness threshold used when none is configured.
pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(60);

pub const RSSI_METRIC: &str = "sensor.rssi";
pub const TEMPERATURE_METRIC: &str = "sensor.temperature";
pub const HUMIDITY_METRIC: &str = "sensor.humidity";
pub const CO2_METRIC: &str = "sensor.co2";

/// Settings for the SwitchBot instrumentation, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentationOptions {
    /// Devices silent for longer than this are dropped
    pub stale_threshold: Duration,
}

impl Default for InstrumentationOptions {
    fn default() -> Self {
        InstrumentationOptions {
            stale_threshold: DEFAULT_STALE_THRESHOLD,
        }
    }
}

/// One observed value with its tag set.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub value: f64,
    /// `type` tag
    pub source_type: &'static str,
    /// `device` tag
    pub device: String,
}

impl Measurement {
    /// Tags as `(key, value)` pairs in export order.
    pub fn tags(&self) -> [(&'static str, &str); 2] {
        [("type", self.source_type), ("device", &self.device)]
    }
}

/// Name, help text and unit of an observable instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub unit: &'static str,
}

/// Callback producing the current measurements of one instrument.
///
/// May be invoked at any time, repeatedly and concurrently with registry writes.
pub type ObservableCallback = Arc<dyn Fn() -> Vec<Measurement> + Send + Sync>;

/// A metrics backend that polls observable instruments on its own schedule.
pub trait Meter {
    fn register_observable(
        &mut self,
        descriptor: InstrumentDescriptor,
        callback: ObservableCallback,
    );
}

/// A metric defined as a filter plus a value extraction over registry readings.
///
/// The predicate alone decides which readings are exported; the converter is
/// only ever applied to readings the predicate accepted.
#[derive(Debug, Clone, Copy)]
pub struct Projection {
    pub descriptor: InstrumentDescriptor,
    predicate: fn(&SensorReading) -> bool,
    converter: fn(&SensorReading) -> f64,
}

impl Projection {
    fn measure(&self, reading: &SensorReading) -> Measurement {
        Measurement {
            value: (self.converter)(reading),
            source_type: SOURCE_TYPE,
            device: reading.id.clone(),
        }
    }
}

/// The four SwitchBot instruments.
pub const PROJECTIONS: [Projection; 4] = [
    Projection {
        descriptor: InstrumentDescriptor {
            name: RSSI_METRIC,
            description: "Received signal strength of the last advertisement",
            unit: "dBm",
        },
        predicate: |_| true,
        converter: |r| r.rssi,
    },
    Projection {
        descriptor: InstrumentDescriptor {
            name: TEMPERATURE_METRIC,
            description: "Temperature reported by the sensor",
            unit: "Cel",
        },
        predicate: |_| true,
        converter: |r| r.temperature,
    },
    Projection {
        descriptor: InstrumentDescriptor {
            name: HUMIDITY_METRIC,
            description: "Relative humidity reported by the sensor",
            unit: "%",
        },
        predicate: |_| true,
        converter: |r| r.humidity,
    },
    Projection {
        descriptor: InstrumentDescriptor {
            name: CO2_METRIC,
            description: "CO2 concentration reported by the sensor",
            unit: "ppm",
        },
        predicate: |r| r.co2.is_some(),
        // The predicate only admits readings that carry a value
        converter: |r| r.co2.unwrap_or(f64::NAN),
    },
];

/// Bridges registry snapshots to observable instrument callbacks.
#[derive(Debug, Clone)]
pub struct SensorMetrics {
    registry: Arc<SensorRegistry>,
}

impl SensorMetrics {
    pub fn new(registry: Arc<SensorRegistry>) -> Self {
        SensorMetrics { registry }
    }

    /// Measurements of `projection` as of `now`, evicting stale devices on the way.
    pub fn gather(&self, projection: &Projection, now: SystemTime) -> Vec<Measurement> {
        self.registry
            .snapshot(projection.predicate, now)
            .iter()
            .map(|reading| projection.measure(reading))
            .collect()
    }

    /// Measurements of the instrument called `name`, or `None` for an unknown name.
    pub fn gather_by_name(&self, name: &str, now: SystemTime) -> Option<Vec<Measurement>> {
        PROJECTIONS
            .iter()
            .find(|p| p.descriptor.name == name)
            .map(|p| self.gather(p, now))
    }

    /// Register one observable instrument per projection on `meter`.
    pub fn register(&self, meter: &mut dyn Meter) {
        for projection in PROJECTIONS {
            let metrics = self.clone();
            meter.register_observable(
                projection.descriptor,
                Arc::new(move || metrics.gather(&projection, SystemTime::now())),
            );
        }
    }
}

/// Create a registry, register the SwitchBot instruments against `meter` and
/// return the registry for the advertisement listener to write into.
pub fn add_switchbot_instrumentation(
    meter: &mut dyn Meter,
    options: InstrumentationOptions,
) -> Arc<SensorRegistry> {
    let registry = Arc::new(SensorRegistry::new(options.stale_threshold));
    SensorMetrics::new(Arc::clone(&registry)).register(meter);
    registry
}
