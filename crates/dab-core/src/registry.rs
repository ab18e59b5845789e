//! Device instance registry.
//!
//! Drivers are probed in declared order; the first one whose
//! `is_compatible` accepts the device address constructs the instance. The
//! registry is normally populated before the session connects and is
//! read-only afterwards.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{DabError, RegistryError};
use crate::instance::{DeviceInstance, Publisher};

/// One selectable implementation class.
///
/// `is_compatible` must be a short probe against the target (or a constant);
/// `connect` builds the instance with its full handler table.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Short identifier used in logs.
    fn kind(&self) -> &'static str;

    /// Whether this driver can manage the device at `device_address`.
    async fn is_compatible(&self, device_address: &str) -> bool;

    /// Construct the instance for `(device_id, device_address)`.
    async fn connect(
        &self,
        device_id: &str,
        device_address: &str,
    ) -> Result<DeviceInstance, DabError>;
}

/// Holds every device instance the broker serves.
pub struct DeviceRegistry {
    drivers: Vec<Box<dyn DeviceDriver>>,
    instances: RwLock<HashMap<String, Arc<DeviceInstance>>>,
    publisher: OnceLock<Publisher>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            drivers: Vec::new(),
            instances: RwLock::new(HashMap::new()),
            publisher: OnceLock::new(),
        }
    }

    /// Append a driver; declaration order is selection order.
    pub fn with_driver(mut self, driver: impl DeviceDriver + 'static) -> Self {
        self.drivers.push(Box::new(driver));
        self
    }

    /// Probe the drivers and register an instance for `device_id`.
    pub async fn make_device_instance(
        &self,
        device_id: &str,
        device_address: &str,
    ) -> Result<Arc<DeviceInstance>, RegistryError> {
        if self.instances.read().await.contains_key(device_id) {
            return Err(RegistryError::DuplicateDevice(device_id.to_owned()));
        }

        for driver in &self.drivers {
            if !driver.is_compatible(device_address).await {
                debug!("driver {} rejected {}", driver.kind(), device_address);
                continue;
            }

            let instance = Arc::new(driver.connect(device_id, device_address).await?);

            let mut instances = self.instances.write().await;
            if instances.contains_key(device_id) {
                return Err(RegistryError::DuplicateDevice(device_id.to_owned()));
            }
            if let Some(publisher) = self.publisher.get() {
                instance.set_publisher(publisher.clone());
            }
            instances.insert(device_id.to_owned(), instance.clone());
            info!(
                "device {} registered with {} driver for {}",
                device_id,
                driver.kind(),
                device_address
            );
            return Ok(instance);
        }

        Err(RegistryError::NoCompatibleImplementation(
            device_address.to_owned(),
        ))
    }

    pub async fn lookup(&self, device_id: &str) -> Option<Arc<DeviceInstance>> {
        self.instances.read().await.get(device_id).cloned()
    }

    /// Union of every instance's request topics.
    pub async fn subscription_topics(&self) -> Vec<String> {
        let instances = self.instances.read().await;
        let mut topics: Vec<String> = instances
            .values()
            .flat_map(|instance| instance.subscription_topics())
            .collect();
        topics.sort();
        topics.dedup();
        topics
    }

    /// Fan the unsolicited publish function out to every instance.
    ///
    /// Idempotent: the first publisher sticks, later calls re-fan the same
    /// one. Instances registered afterwards receive it at insert time.
    pub async fn set_publish_callback(&self, publisher: Publisher) {
        let publisher = self.publisher.get_or_init(|| publisher).clone();
        let instances = self.instances.read().await;
        for instance in instances.values() {
            instance.set_publisher(publisher.clone());
        }
    }

    pub async fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.instances.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instances.read().await.is_empty()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
