//! Payload and advertisement builders shared by the unit tests.

use crate::advertisement::Advertisement;
use crate::decoder::{MIN_PAYLOAD_LEN, SWITCHBOT_MANUFACTURER_ID};
use std::collections::HashMap;
use std::time::SystemTime;

/// A stable device id for unit tests.
pub const TEST_DEVICE: &str = "AA:BB:CC:DD:EE:FF";

/// Encode a temperature/humidity pair the way a SwitchBot meter broadcasts it.
///
/// Only valid for `|temperature| < 128` with one decimal and `0 <= humidity <= 127`.
pub fn switchbot_payload(temperature: f64, humidity: f64) -> Vec<u8> {
    let magnitude = temperature.abs();
    let integer = magnitude.trunc();
    let fraction = ((magnitude - integer) * 10.0).round() as u8;
    let sign = if temperature >= 0.0 { 0x80 } else { 0x00 };

    let mut data = vec![0u8; MIN_PAYLOAD_LEN + 1];
    data[8] = fraction & 0x0f;
    data[9] = sign | (integer as u8 & 0x7f);
    data[10] = humidity as u8 & 0x7f;
    data
}

/// Build an advertisement carrying `payload` under the SwitchBot company id.
pub fn advertisement(device_id: &str, rssi: f64, payload: Vec<u8>) -> Advertisement {
    let mut manufacturer_data = HashMap::new();
    manufacturer_data.insert(SWITCHBOT_MANUFACTURER_ID, payload);
    Advertisement {
        device_id: device_id.to_string(),
        rssi,
        manufacturer_data,
        timestamp: SystemTime::now(),
    }
}
