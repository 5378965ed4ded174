//! Advertisement listener: feeds decoded SwitchBot readings into the registry.

use crate::advertisement::Advertisement;
use crate::decoder::decode_advertisement;
use crate::registry::{Observation, SensorRegistry};
use tokio::sync::mpsc;

/// Decode one advertisement and record it.
///
/// Returns `true` when the advertisement carried a decodable SwitchBot payload.
/// Anything else is dropped without a trace: foreign advertisements are
/// normal radio traffic, and a missed packet is replaced by the next one.
pub fn handle_advertisement(registry: &SensorRegistry, advertisement: &Advertisement) -> bool {
    let Some(reading) = decode_advertisement(advertisement) else {
        return false;
    };

    registry.upsert(
        &advertisement.device_id,
        Observation {
            rssi: advertisement.rssi,
            temperature: reading.temperature,
            humidity: reading.humidity,
            co2: None,
        },
        advertisement.timestamp,
    );
    true
}

/// Drain `advertisements` into `registry` until the scanner closes the channel.
///
/// Returns the number of advertisements that were recorded.
pub async fn listen(
    registry: &SensorRegistry,
    mut advertisements: mpsc::Receiver<Advertisement>,
) -> u64 {
    let mut recorded = 0;
    while let Some(advertisement) = advertisements.recv().await {
        if handle_advertisement(registry, &advertisement) {
            recorded += 1;
        }
    }
    tracing::warn!(recorded, "advertisement stream closed");
    recorded
}
