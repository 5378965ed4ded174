//! BlueZ D-Bus backend for SwitchBot scanning.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.
//!
//! An advertisement monitor filters for the SwitchBot company id. BlueZ reports
//! each matching device once, so every found device also gets one property
//! watcher. BlueZ only signals properties whose value changed: a meter with a
//! steady reading still updates its RSSI with nearly every broadcast, so RSSI
//! changes refresh the reading as well as manufacturer data changes.

use super::{ADVERTISEMENT_CHANNEL_BUFFER_SIZE, ScanError, device_id};
use crate::advertisement::Advertisement;
use crate::decoder::SWITCHBOT_MANUFACTURER_ID_BYTES;
use bluer::monitor::{Monitor, MonitorEvent, Pattern};
use bluer::{Adapter, Address, DeviceEvent, DeviceProperty, Session};
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Bluetooth manufacturer-specific data type (AD type 0xFF)
const MANUFACTURER_DATA_TYPE: u8 = 0xff;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Start scanning for SwitchBot devices using the BlueZ D-Bus backend.
///
/// Initializes the default adapter and registers a passive advertisement
/// monitor. Runs until the monitor stream ends.
pub async fn start_scan() -> Result<mpsc::Receiver<Advertisement>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    tracing::debug!(adapter = adapter.name(), "bluetooth adapter powered");

    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

    let pattern = Pattern {
        data_type: MANUFACTURER_DATA_TYPE,
        start_position: 0,
        content: SWITCHBOT_MANUFACTURER_ID_BYTES.to_vec(),
    };

    let monitor_manager = adapter.monitor().await?;
    let mut monitor_handle = monitor_manager
        .register(Monitor {
            patterns: Some(vec![pattern]),
            ..Default::default()
        })
        .await?;

    // The task owns all Bluetooth state for as long as the scan runs
    tokio::spawn(async move {
        let _session = session;
        let _monitor_manager = monitor_manager;

        let mut watchers = DeviceWatchers::default();

        while let Some(event) = monitor_handle.next().await {
            match event {
                MonitorEvent::DeviceFound(device) => {
                    let address = device.device;
                    if let Err(e) = forward_device(&adapter, address, &tx).await {
                        tracing::debug!(device = %address, error = %e, "failed to read device");
                    }
                    watchers.watch(address, watch_device(adapter.clone(), address, tx.clone()));
                }
                MonitorEvent::DeviceLost(device) => watchers.forget(device.device),
                _ => {}
            }
        }
        tracing::warn!("advertisement monitor stream ended");
        watchers.clear();
    });

    Ok(rx)
}

/// At most one running property watcher per device.
#[derive(Debug, Default)]
struct DeviceWatchers {
    tasks: HashMap<Address, JoinHandle<()>>,
}

impl DeviceWatchers {
    /// Spawn `watcher` for `address` unless a watcher for it is still running.
    ///
    /// Returns whether a new task was spawned.
    fn watch<F>(&mut self, address: Address, watcher: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tasks.get(&address).is_some_and(|task| !task.is_finished()) {
            return false;
        }
        self.tasks.insert(address, tokio::spawn(watcher));
        true
    }

    /// Stop watching `address`.
    fn forget(&mut self, address: Address) {
        if let Some(task) = self.tasks.remove(&address) {
            tracing::debug!(device = %address, "device lost");
            task.abort();
        }
    }

    fn clear(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.tasks.len()
    }
}

/// Whether a changed property means the device just advertised again.
fn refreshes_reading(property: &DeviceProperty) -> bool {
    matches!(
        property,
        DeviceProperty::ManufacturerData(_) | DeviceProperty::Rssi(_)
    )
}

/// Forward the readings of `address` on every new advertisement until the device goes away.
async fn watch_device(adapter: Adapter, address: Address, tx: mpsc::Sender<Advertisement>) {
    let events = match adapter.device(address) {
        Ok(device) => device.events().await,
        Err(e) => Err(e),
    };
    let mut events = match events {
        Ok(events) => Box::pin(events),
        Err(e) => {
            tracing::debug!(device = %address, error = %e, "cannot watch device");
            return;
        }
    };

    while let Some(DeviceEvent::PropertyChanged(property)) = events.next().await {
        if refreshes_reading(&property)
            && let Err(e) = forward_device(&adapter, address, &tx).await
        {
            tracing::debug!(device = %address, error = %e, "failed to read device");
        }
        if tx.is_closed() {
            break;
        }
    }
}

/// Read the current RSSI and manufacturer data of `address` and send them on.
///
/// Devices without an RSSI or without manufacturer data are skipped.
async fn forward_device(
    adapter: &Adapter,
    address: Address,
    tx: &mpsc::Sender<Advertisement>,
) -> Result<(), ScanError> {
    let device = adapter.device(address)?;

    let Some(rssi) = device.rssi().await? else {
        return Ok(());
    };
    let Some(manufacturer_data) = device.manufacturer_data().await? else {
        return Ok(());
    };

    let advertisement = Advertisement {
        device_id: device_id(address.0),
        rssi: f64::from(rssi),
        manufacturer_data,
        timestamp: SystemTime::now(),
    };
    let _ = tx.send(advertisement).await;

    Ok(())
}
