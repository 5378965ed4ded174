//! Human-readable durations for command line options.

use std::time::Duration;

// Longest suffix first so "ms" wins over "s" and "m".
const UNITS: [(&str, &str, u64); 4] = [
    ("ms", "milliseconds", 1),
    ("h", "hours", 3_600_000),
    ("m", "minutes", 60_000),
    ("s", "seconds", 1_000),
];

/// Parse a duration such as `60`, `90s`, `5m`, `1h` or `500ms`.
///
/// A bare number is taken as seconds, matching how the staleness threshold
/// has always been configured.
///
/// # Examples
/// ```
/// use switchbot_listener::duration::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("60").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();
    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    let (num, unit, millis_per_unit) = UNITS
        .iter()
        .find_map(|&(suffix, unit, factor)| {
            src.strip_suffix(suffix).map(|num| (num.trim(), unit, factor))
        })
        .unwrap_or((src, "seconds", 1_000));

    let value: u64 = num
        .parse()
        .map_err(|_| format!("invalid {unit}: {num}"))?;
    value
        .checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration too large: {src}"))
}
