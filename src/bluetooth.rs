// Bluetooth adapter discovery using the bluer crate
//
// BlueZ tells us which controllers exist, their addresses and whether they are
// powered. Commands themselves go over the raw HCI channel.

use bluer::{Adapter, AdapterEvent, AdapterProperty, Session};
use futures::{pin_mut, StreamExt};
use log::{debug, info, warn};
use thiserror::Error;

use crate::config::BluetoothConfig;
use crate::session::AdapterHandle;
use crate::worker::AdapterWorker;

#[derive(Debug, Error)]
pub enum BluetoothError {
    #[error("BlueZ error: {0}")]
    Bluez(#[from] bluer::Error),
    #[error("unexpected adapter name {0:?}")]
    BadName(String),
}

/// Controller index from a BlueZ adapter name such as `hci0`.
pub fn parse_index(name: &str) -> Option<u16> {
    let digits = name.strip_prefix("hci")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

pub struct BleAdapter {
    adapter: Adapter,
    handle: AdapterHandle,
}

impl BleAdapter {
    async fn new(session: &Session, name: &str, power_on: bool) -> Result<Self, BluetoothError> {
        let index = parse_index(name).ok_or_else(|| BluetoothError::BadName(name.to_string()))?;
        let adapter = session.adapter(name)?;

        info!("Using Bluetooth adapter: {}", name);

        if power_on {
            adapter.set_powered(true).await?;
        }

        let address = adapter.address().await?;
        debug!("Adapter {} has address {}", name, address);

        Ok(BleAdapter {
            adapter,
            handle: AdapterHandle::new(index, address),
        })
    }

    pub fn handle(&self) -> &AdapterHandle {
        &self.handle
    }

    pub async fn is_powered(&self) -> Result<bool, BluetoothError> {
        Ok(self.adapter.is_powered().await?)
    }

    /// Forwards power changes to the worker until the worker or the
    /// adapter goes away.
    pub async fn watch_power(self, worker: AdapterWorker) -> Result<(), BluetoothError> {
        let name = self.handle.name();
        let events = self.adapter.events().await?;
        pin_mut!(events);

        while let Some(event) = events.next().await {
            if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) = event {
                debug!("{name} powered: {powered}");
                if worker.set_up(powered).is_err() {
                    break;
                }
            }
        }
        info!("Stopped watching {name}");
        Ok(())
    }
}

/// Every adapter BlueZ knows that passes the configured filter. Adapters
/// that can't be opened are skipped.
pub async fn enumerate(
    session: &Session,
    config: &BluetoothConfig,
) -> Result<Vec<BleAdapter>, BluetoothError> {
    let mut adapters = Vec::new();
    for name in session.adapter_names().await? {
        if !config.serves(&name) {
            debug!("Skipping adapter {name}");
            continue;
        }
        match BleAdapter::new(session, &name, config.power_on).await {
            Ok(adapter) => adapters.push(adapter),
            Err(e) => warn!("Can't use adapter {name}: {e}"),
        }
    }
    Ok(adapters)
}
