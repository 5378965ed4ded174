//! Last-known reading per SwitchBot device.
//!
//! The registry is written from the advertisement path and read from the
//! metrics scrape path. Both go through one mutex that covers the whole
//! find-or-create-then-mutate of an upsert and the whole
//! iterate-mark-remove of a snapshot, so a device can never be evicted while
//! a concurrent upsert for it is half applied.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

/// Last observed values for one device.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    /// Device identifier, never changes after the entry is created
    pub id: String,
    /// Time of the most recent successful decode
    pub last_update: SystemTime,
    /// Received signal strength in dBm
    pub rssi: f64,
    /// Degrees Celsius
    pub temperature: f64,
    /// Relative humidity in percent (not range checked)
    pub humidity: f64,
    /// CO2 concentration in ppm, when the device reports one
    pub co2: Option<f64>,
}

/// The values carried by one decoded advertisement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub rssi: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub co2: Option<f64>,
}

impl SensorReading {
    fn new(id: &str, observation: Observation, observed_at: SystemTime) -> Self {
        let mut reading = SensorReading {
            id: id.to_string(),
            last_update: observed_at,
            rssi: 0.0,
            temperature: 0.0,
            humidity: 0.0,
            co2: None,
        };
        reading.apply(observation, observed_at);
        reading
    }

    fn apply(&mut self, observation: Observation, observed_at: SystemTime) {
        self.last_update = observed_at;
        self.rssi = observation.rssi;
        self.temperature = observation.temperature;
        self.humidity = observation.humidity;
        self.co2 = observation.co2;
    }

    /// Whether the reading is older than `threshold` at `now`.
    ///
    /// A reading stamped later than `now` is treated as fresh.
    pub fn is_stale(&self, now: SystemTime, threshold: Duration) -> bool {
        now.duration_since(self.last_update)
            .is_ok_and(|age| age > threshold)
    }
}

/// Concurrent, self-expiring store of [`SensorReading`]s keyed by device id.
#[derive(Debug)]
pub struct SensorRegistry {
    stale_threshold: Duration,
    readings: Mutex<BTreeMap<String, SensorReading>>,
}

impl SensorRegistry {
    /// Create an empty registry evicting devices silent for longer than `stale_threshold`.
    pub fn new(stale_threshold: Duration) -> Self {
        SensorRegistry {
            stale_threshold,
            readings: Mutex::new(BTreeMap::new()),
        }
    }

    /// Age beyond which a reading is evicted.
    pub fn stale_threshold(&self) -> Duration {
        self.stale_threshold
    }

    // Entries are plain values that are never left half written, so a panic
    // in another holder does not invalidate the map.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, SensorReading>> {
        self.readings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an observation for `id`, creating the entry on first sighting and
    /// overwriting it in place afterwards. Never fails and never validates values.
    pub fn upsert(&self, id: &str, observation: Observation, observed_at: SystemTime) {
        let mut readings = self.lock();
        match readings.get_mut(id) {
            Some(reading) => reading.apply(observation, observed_at),
            None => {
                tracing::info!(device = id, "new sensor");
                readings.insert(
                    id.to_string(),
                    SensorReading::new(id, observation, observed_at),
                );
            }
        }
    }

    /// Return every live reading matching `predicate`, ordered by device id,
    /// and evict every reading that is stale at `observed_at`.
    ///
    /// Stale readings are never returned, whether or not they match.
    pub fn snapshot<P>(&self, predicate: P, observed_at: SystemTime) -> Vec<SensorReading>
    where
        P: Fn(&SensorReading) -> bool,
    {
        let mut readings = self.lock();
        let mut stale = Vec::new();
        let mut live = Vec::new();

        for (id, reading) in readings.iter() {
            if reading.is_stale(observed_at, self.stale_threshold) {
                stale.push(id.clone());
            } else if predicate(reading) {
                live.push(reading.clone());
            }
        }

        for id in stale {
            tracing::debug!(device = %id, "evicting stale sensor");
            readings.remove(&id);
        }

        live
    }

    /// Number of tracked devices, stale or not.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const THRESHOLD: Duration = Duration::from_secs(60);

    fn observation(temperature: f64) -> Observation {
        Observation {
            rssi: -70.0,
            temperature,
            humidity: 45.0,
            co2: None,
        }
    }

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_new_registry_is_empty() {
        let registry = SensorRegistry::new(THRESHOLD);
        assert!(registry.is_empty());
        assert_eq!(registry.stale_threshold(), THRESHOLD);
        assert!(registry.snapshot(|_| true, at(1000)).is_empty());
    }

    #[test]
    fn test_upsert_is_last_write_wins() {
        let registry = SensorRegistry::new(THRESHOLD);
        registry.upsert("A", observation(20.0), at(1000));
        registry.upsert("A", observation(21.5), at(1001));

        let snapshot = registry.snapshot(|_| true, at(1002));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "A");
        assert_eq!(snapshot[0].temperature, 21.5);
        assert_eq!(snapshot[0].last_update, at(1001));
    }

    #[test]
    fn test_upsert_overwrites_every_field() {
        let registry = SensorRegistry::new(THRESHOLD);
        registry.upsert(
            "A",
            Observation {
                rssi: -50.0,
                temperature: 1.0,
                humidity: 2.0,
                co2: Some(400.0),
            },
            at(1000),
        );
        registry.upsert(
            "A",
            Observation {
                rssi: -90.0,
                temperature: -3.5,
                humidity: 120.0,
                co2: None,
            },
            at(1010),
        );

        let reading = registry.snapshot(|_| true, at(1010)).remove(0);
        assert_eq!(reading.rssi, -90.0);
        assert_eq!(reading.temperature, -3.5);
        assert_eq!(reading.humidity, 120.0);
        assert_eq!(reading.co2, None);
    }

    #[test]
    fn test_snapshot_is_sorted_by_device_id() {
        let registry = SensorRegistry::new(THRESHOLD);
        for id in ["C", "A", "B"] {
            registry.upsert(id, observation(20.0), at(1000));
        }

        let ids: Vec<String> = registry
            .snapshot(|_| true, at(1000))
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, ["A", "B", "C"]);
    }

    #[test]
    fn test_snapshot_applies_predicate_without_evicting() {
        let registry = SensorRegistry::new(THRESHOLD);
        registry.upsert("A", observation(10.0), at(1000));
        registry.upsert("B", observation(30.0), at(1000));

        let warm = registry.snapshot(|r| r.temperature > 20.0, at(1000));
        assert_eq!(warm.len(), 1);
        assert_eq!(warm[0].id, "B");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_stale_entry_is_evicted() {
        let registry = SensorRegistry::new(THRESHOLD);
        registry.upsert("A", observation(20.0), at(1000));
        registry.upsert("B", observation(20.0), at(1030));

        let snapshot = registry.snapshot(|_| true, at(1061));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "B");
        assert_eq!(registry.len(), 1);

        // Gone for good, even for a later snapshot at the same instant
        assert!(
            registry
                .snapshot(|_| true, at(1061))
                .iter()
                .all(|r| r.id != "A")
        );
    }

    #[test]
    fn test_stale_entry_is_evicted_even_when_predicate_rejects_it() {
        let registry = SensorRegistry::new(THRESHOLD);
        registry.upsert("A", observation(20.0), at(1000));

        assert!(registry.snapshot(|_| false, at(1100)).is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_entry_exactly_at_threshold_is_retained() {
        let registry = SensorRegistry::new(THRESHOLD);
        registry.upsert("A", observation(20.0), at(1000));

        assert_eq!(registry.snapshot(|_| true, at(1060)).len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_entry_from_the_future_is_fresh() {
        let registry = SensorRegistry::new(THRESHOLD);
        registry.upsert("A", observation(20.0), at(5000));

        assert_eq!(registry.snapshot(|_| true, at(1000)).len(), 1);
    }

    #[test]
    fn test_upsert_after_eviction_recreates_entry() {
        let registry = SensorRegistry::new(THRESHOLD);
        registry.upsert("A", observation(20.0), at(1000));
        assert!(registry.snapshot(|_| true, at(2000)).is_empty());

        registry.upsert("A", observation(22.0), at(2001));
        let snapshot = registry.snapshot(|_| true, at(2002));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].temperature, 22.0);
    }

    #[test]
    fn test_poisoned_lock_is_recovered() {
        let registry = Arc::new(SensorRegistry::new(THRESHOLD));
        registry.upsert("A", observation(20.0), at(1000));

        let poisoner = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                let _guard = registry.readings.lock().unwrap();
                panic!("panic while holding the registry lock");
            })
        };
        assert!(poisoner.join().is_err());
        assert!(registry.readings.is_poisoned());

        registry.upsert("B", observation(21.0), at(1001));
        let ids: Vec<String> = registry
            .snapshot(|_| true, at(1002))
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, ["A", "B"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_concurrent_upserts_are_not_lost() {
        let registry = Arc::new(SensorRegistry::new(THRESHOLD));
        let now = SystemTime::now();

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let id = format!("DEV-{i:02}");
                    for round in 0..50 {
                        registry.upsert(&id, observation(f64::from(i * 100 + round)), now);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = registry.snapshot(|_| true, now);
        assert_eq!(snapshot.len(), 32);
        for (i, reading) in snapshot.iter().enumerate() {
            assert_eq!(reading.id, format!("DEV-{i:02}"));
            assert_eq!(reading.temperature, f64::from(i as u32 * 100 + 49));
        }
    }

    #[test]
    fn test_concurrent_snapshots_and_upserts() {
        let registry = Arc::new(SensorRegistry::new(THRESHOLD));
        let now = SystemTime::now();

        let writer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for i in 0..500u32 {
                    registry.upsert(&format!("DEV-{}", i % 10), observation(f64::from(i)), now);
                }
            })
        };
        let reader = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for _ in 0..500 {
                    let snapshot = registry.snapshot(|_| true, now);
                    assert!(snapshot.len() <= 10);
                    assert!(snapshot.windows(2).all(|w| w[0].id < w[1].id));
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();

        assert_eq!(registry.snapshot(|_| true, now).len(), 10);
    }
}
