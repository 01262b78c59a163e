//! Fixed set of configured inverters
//!
//! Built once from configuration and never mutated structurally. Each device
//! carries its own I/O lock so a query and an apply against the same unit
//! never overlap, while different units proceed independently.

use crate::config::InverterConfig;
use crate::protocol::AttributeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};

/// One configured aircon unit
#[derive(Debug)]
pub struct Device {
    pub name: String,
    pub address: String,
    last_state: RwLock<Option<AttributeSet>>,
    io_lock: Mutex<()>,
}

impl Device {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            last_state: RwLock::new(None),
            io_lock: Mutex::new(()),
        }
    }

    /// State from the most recent successful poll
    pub async fn last_state(&self) -> Option<AttributeSet> {
        self.last_state.read().await.clone()
    }

    pub async fn record_state(&self, state: AttributeSet) {
        *self.last_state.write().await = Some(state);
    }

    /// Serialize gateway operations against this unit
    pub async fn lock_io(&self) -> MutexGuard<'_, ()> {
        self.io_lock.lock().await
    }
}

/// Registry of devices in configuration order
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<Arc<Device>>,
}

impl DeviceRegistry {
    pub fn new(devices: Vec<Device>) -> Self {
        Self {
            devices: devices.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn from_config(inverters: &[InverterConfig]) -> Self {
        Self::new(
            inverters
                .iter()
                .map(|inverter| Device::new(&inverter.name, &inverter.address))
                .collect(),
        )
    }

    /// Devices in registry order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.devices.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Device>> {
        self.devices.iter().find(|device| device.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.devices.iter().map(|device| device.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> DeviceRegistry {
        DeviceRegistry::from_config(&[
            InverterConfig {
                name: "Lounge".to_string(),
                address: "10.0.0.1".to_string(),
            },
            InverterConfig {
                name: "Office".to_string(),
                address: "10.0.0.2".to_string(),
            },
        ])
    }

    #[test]
    fn test_lookup_and_order() {
        let registry = registry();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["Lounge", "Office"]);
        assert_eq!(registry.get("Office").unwrap().address, "10.0.0.2");
        assert!(registry.get("Kitchen").is_none());
        assert!(registry.get("lounge").is_none());
    }

    #[tokio::test]
    async fn test_record_state() {
        let registry = registry();
        let device = registry.get("Lounge").unwrap();
        assert!(device.last_state().await.is_none());

        let state = AttributeSet {
            power: Some(true),
            ..Default::default()
        };
        device.record_state(state.clone()).await;
        assert_eq!(device.last_state().await, Some(state));
    }

    #[tokio::test]
    async fn test_io_lock_is_per_device() {
        let registry = registry();
        let lounge = registry.get("Lounge").unwrap();
        let office = registry.get("Office").unwrap();

        let _held = lounge.lock_io().await;
        assert!(lounge.io_lock.try_lock().is_err());
        assert!(office.io_lock.try_lock().is_ok());
    }
}
