//! Raw BLE advertisement event as delivered by a scanner backend.

use std::collections::HashMap;
use std::time::SystemTime;

/// One received advertisement.
///
/// Scanner backends fill this from the advertising report (HCI) or from the
/// device properties BlueZ caches for the advertiser (D-Bus).
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    /// Advertiser address formatted as `AA:BB:CC:DD:EE:FF`
    pub device_id: String,
    /// Received signal strength in dBm
    pub rssi: f64,
    /// Manufacturer-specific data keyed by company identifier, company id bytes stripped
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    /// When the advertisement was received
    pub timestamp: SystemTime,
}
