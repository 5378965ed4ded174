//! SwitchBot manufacturer data decoding.
//!
//! SwitchBot thermo-hygrometers (Meter, Meter Plus, Outdoor Meter) broadcast
//! their current reading inside the manufacturer-specific data of every
//! advertisement. Only temperature and humidity are carried there; RSSI and the
//! device address come from the advertisement envelope.

use crate::advertisement::Advertisement;
use thiserror::Error;

/// SwitchBot (Wonder Labs) Bluetooth SIG company identifier.
pub const SWITCHBOT_MANUFACTURER_ID: u16 = 0x0969;

/// Little-endian byte form of [`SWITCHBOT_MANUFACTURER_ID`], as it appears on air.
pub const SWITCHBOT_MANUFACTURER_ID_BYTES: [u8; 2] = [0x69, 0x09];

/// Shortest manufacturer data buffer that still contains the humidity byte.
pub const MIN_PAYLOAD_LEN: usize = 11;

const TEMPERATURE_FRACTION_OFFSET: usize = 8;
const TEMPERATURE_INTEGER_OFFSET: usize = 9;
const HUMIDITY_OFFSET: usize = 10;

/// Temperature and humidity decoded from one advertisement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedReading {
    /// Degrees Celsius, 0.1 resolution
    pub temperature: f64,
    /// Relative humidity in percent. Not clamped: the 7-bit field allows 0-127.
    pub humidity: f64,
}

/// Reasons a manufacturer data buffer cannot be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload too short: {len} bytes (need at least {min})", min = MIN_PAYLOAD_LEN)]
    TooShort { len: usize },
}

/// Decode a SwitchBot manufacturer data buffer (company id already stripped).
///
/// Byte 8 carries tenths of a degree in its low nibble, byte 9 the integer
/// degrees in its low 7 bits with bit 7 set for positive values, and byte 10
/// the humidity in its low 7 bits.
pub fn decode_switchbot_data(data: &[u8]) -> Result<DecodedReading, DecodeError> {
    if data.len() < MIN_PAYLOAD_LEN {
        return Err(DecodeError::TooShort { len: data.len() });
    }

    let fraction = f64::from(data[TEMPERATURE_FRACTION_OFFSET] & 0x0f) / 10.0;
    let integer = f64::from(data[TEMPERATURE_INTEGER_OFFSET] & 0x7f);
    let sign = if data[TEMPERATURE_INTEGER_OFFSET] & 0x80 != 0 {
        1.0
    } else {
        -1.0
    };

    Ok(DecodedReading {
        temperature: (fraction + integer) * sign,
        humidity: f64::from(data[HUMIDITY_OFFSET] & 0x7f),
    })
}

/// Decode the SwitchBot payload of an advertisement, if it carries a usable one.
///
/// Advertisements from other vendors and undersized buffers both yield `None`.
pub fn decode_advertisement(advertisement: &Advertisement) -> Option<DecodedReading> {
    advertisement
        .manufacturer_data
        .get(&SWITCHBOT_MANUFACTURER_ID)
        .and_then(|data| decode_switchbot_data(data).ok())
}
