//! Prometheus text exposition format (version 0.0.4).

use crate::instrumentation::{InstrumentDescriptor, Measurement};
use crate::output::ExpositionFormatter;
use std::fmt;
use std::fmt::Write;

/// Content type served alongside the exposition text.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Sample value, rendered with Prometheus spelling for non-finite numbers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleValue(pub f64);

impl fmt::Display for SampleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        if v.is_nan() {
            write!(f, "NaN")
        } else if v == f64::INFINITY {
            write!(f, "+Inf")
        } else if v == f64::NEG_INFINITY {
            write!(f, "-Inf")
        } else {
            write!(f, "{v}")
        }
    }
}

/// One exposition line: `name{k="v",...} value`
#[derive(Debug)]
pub struct Sample<'a> {
    pub name: &'a str,
    pub labels: [(&'static str, &'a str); 2],
    pub value: SampleValue,
}

fn fmt_labels(sample: &Sample<'_>, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "{{")?;
    for (i, (key, value)) in sample.labels.iter().enumerate() {
        if i > 0 {
            write!(fmt, ",")?;
        }
        write!(fmt, "{}=\"{}\"", key, escape_label_value(value))?;
    }
    write!(fmt, "}}")
}

impl fmt::Display for Sample<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.name)?;
        fmt_labels(self, fmt)?;
        write!(fmt, " {}", self.value)
    }
}

/// Map an instrument name onto the Prometheus metric name alphabet.
///
/// Characters outside `[a-zA-Z0-9_:]` become `_`, and a leading digit gets a
/// `_` prefix, so `sensor.rssi` is exported as `sensor_rssi`.
pub fn metric_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 1);
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        out.push('_');
    }
    out.extend(name.chars().map(|c| {
        if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
            c
        } else {
            '_'
        }
    }));
    out
}

fn escape_label_value(v: &str) -> String {
    v.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn escape_help(v: &str) -> String {
    v.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Prometheus text formatter. Every instrument is exposed as a gauge.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusFormatter;

impl ExpositionFormatter for PrometheusFormatter {
    fn format(
        &self,
        descriptor: &InstrumentDescriptor,
        measurements: &[Measurement],
        out: &mut String,
    ) {
        let name = metric_name(descriptor.name);
        // Writing into a String cannot fail
        let _ = writeln!(
            out,
            "# HELP {} {} ({})",
            name,
            escape_help(descriptor.description),
            escape_help(descriptor.unit)
        );
        let _ = writeln!(out, "# TYPE {} gauge", name);
        for measurement in measurements {
            let sample = Sample {
                name: &name,
                labels: measurement.tags(),
                value: SampleValue(measurement.value),
            };
            let _ = writeln!(out, "{sample}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrumentation::{CO2_METRIC, SOURCE_TYPE, TEMPERATURE_METRIC};

    fn measurement(device: &str, value: f64) -> Measurement {
        Measurement {
            value,
            source_type: SOURCE_TYPE,
            device: device.to_string(),
        }
    }

    fn descriptor(name: &'static str) -> InstrumentDescriptor {
        InstrumentDescriptor {
            name,
            description: "Temperature reported by the sensor",
            unit: "Cel",
        }
    }

    #[test]
    fn test_sample_value_display() {
        assert_eq!(format!("{}", SampleValue(-24.5)), "-24.5");
        assert_eq!(format!("{}", SampleValue(50.0)), "50");
        assert_eq!(format!("{}", SampleValue(f64::NAN)), "NaN");
        assert_eq!(format!("{}", SampleValue(f64::INFINITY)), "+Inf");
        assert_eq!(format!("{}", SampleValue(f64::NEG_INFINITY)), "-Inf");
    }

    #[test]
    fn test_metric_name() {
        assert_eq!(metric_name("sensor.rssi"), "sensor_rssi");
        assert_eq!(metric_name("sensor-co2 ppm"), "sensor_co2_ppm");
        assert_eq!(metric_name("9lives"), "_9lives");
        assert_eq!(metric_name("ns:metric_total"), "ns:metric_total");
    }

    #[test]
    fn test_sample_format() {
        let sample = Sample {
            name: "sensor_temperature",
            labels: [("type", "switchbot"), ("device", "AA:BB:CC:DD:EE:FF")],
            value: SampleValue(21.3),
        };
        assert_eq!(
            format!("{}", sample),
            "sensor_temperature{type=\"switchbot\",device=\"AA:BB:CC:DD:EE:FF\"} 21.3"
        );
    }

    #[test]
    fn test_label_values_are_escaped() {
        let sample = Sample {
            name: "m",
            labels: [("type", "a\"b"), ("device", "c\\d\ne")],
            value: SampleValue(1.0),
        };
        assert_eq!(
            format!("{}", sample),
            "m{type=\"a\\\"b\",device=\"c\\\\d\\ne\"} 1"
        );
    }

    #[test]
    fn test_formatter_output() {
        let mut out = String::new();
        PrometheusFormatter.format(
            &descriptor(TEMPERATURE_METRIC),
            &[measurement("A", -24.5), measurement("B", 19.0)],
            &mut out,
        );

        assert_eq!(
            out,
            "# HELP sensor_temperature Temperature reported by the sensor (Cel)\n\
             # TYPE sensor_temperature gauge\n\
             sensor_temperature{type=\"switchbot\",device=\"A\"} -24.5\n\
             sensor_temperature{type=\"switchbot\",device=\"B\"} 19\n"
        );
    }

    #[test]
    fn test_formatter_empty_instrument_keeps_metadata() {
        let mut out = String::new();
        PrometheusFormatter.format(&descriptor(CO2_METRIC), &[], &mut out);

        assert_eq!(out.lines().count(), 2);
        assert!(out.contains("# TYPE sensor_co2 gauge\n"));
        assert!(!out.contains("sensor_co2{"));
    }
}
