//! Driver capability registry
//!
//! Provides a registry pattern for driver factories, enabling single-point
//! extension when adding new protocols (OPC UA, DTU gateways, etc.).
//!
//! Registration happens once, synchronously, before any session starts. The
//! first successful `resolve` (or an explicit `seal`) freezes the registered
//! set; afterwards the registry is read-only and shared across tasks without
//! synchronization. Registering a duplicate `driver_type` is a configuration
//! error, never a silent override.
//!
//! ## Usage
//!
//! Adding a new driver requires only 2 changes:
//! 1. Implement `DriverFactory` for the new driver
//! 2. Register it in `create_default_registry()`

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::DeviceProfile;
use crate::drivers::DeviceDriver;
use crate::error::{AcqSrvError, Result};

/// Normalize a driver type for case-insensitive lookup
pub fn normalize_driver_type(driver_type: &str) -> String {
    driver_type.trim().to_lowercase()
}

/// Registry record of one driver capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverDescriptor {
    /// Unique type key (e.g. "modbus_tcp")
    pub driver_type: String,
    /// Human-readable name
    pub name: String,
    /// Short description
    pub description: String,
}

impl DriverDescriptor {
    pub fn new(
        driver_type: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Driver factory trait for creating driver instances
///
/// Each driver implementation provides a factory that declares its
/// descriptor and builds configured driver instances for a device.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    /// Capability record announced at registration
    fn descriptor(&self) -> DriverDescriptor;

    /// Create a new driver instance for the given device
    async fn create(&self, profile: &DeviceProfile) -> Result<Box<dyn DeviceDriver>>;
}

/// Sealed driver registry
///
/// Two-phase: registrations accumulate under a mutex, sealing moves the map
/// into a `OnceLock` so post-seal resolution takes no lock at all.
pub struct DriverRegistry {
    staging: Mutex<HashMap<String, Arc<dyn DriverFactory>>>,
    sealed: OnceLock<HashMap<String, Arc<dyn DriverFactory>>>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            staging: Mutex::new(HashMap::new()),
            sealed: OnceLock::new(),
        }
    }

    /// Register a driver factory
    ///
    /// Fails with a registry error if the type is already present or the
    /// registry has been sealed.
    pub fn register(&self, factory: Arc<dyn DriverFactory>) -> Result<()> {
        let descriptor = factory.descriptor();
        let key = normalize_driver_type(&descriptor.driver_type);

        if self.sealed.get().is_some() {
            return Err(AcqSrvError::registry(format!(
                "Registry is sealed, registration rejected for: {}",
                descriptor.driver_type
            )));
        }

        let mut staging = self
            .staging
            .lock()
            .map_err(|_| AcqSrvError::internal("registry staging lock poisoned"))?;

        if staging.contains_key(&key) {
            return Err(AcqSrvError::duplicate_driver_type(&descriptor.driver_type));
        }

        staging.insert(key, factory);
        Ok(())
    }

    /// Seal the registry explicitly
    ///
    /// Idempotent; after sealing no further registrations are accepted.
    pub fn seal(&self) {
        let _ = self.sealed.get_or_init(|| {
            self.staging
                .lock()
                .map(|mut staging| std::mem::take(&mut *staging))
                .unwrap_or_default()
        });
    }

    /// Resolve a factory by driver type
    ///
    /// The first call seals the registry. Fails with an unknown-type error
    /// if the type was never registered.
    pub fn resolve(&self, driver_type: &str) -> Result<Arc<dyn DriverFactory>> {
        self.seal();
        let key = normalize_driver_type(driver_type);
        self.sealed
            .get()
            .and_then(|factories| factories.get(&key).cloned())
            .ok_or_else(|| AcqSrvError::unknown_driver_type(driver_type))
    }

    /// Whether the registry has been sealed
    pub fn is_sealed(&self) -> bool {
        self.sealed.get().is_some()
    }

    /// Check if a driver type is registered
    pub fn is_registered(&self, driver_type: &str) -> bool {
        let key = normalize_driver_type(driver_type);
        if let Some(factories) = self.sealed.get() {
            return factories.contains_key(&key);
        }
        self.staging
            .lock()
            .map(|staging| staging.contains_key(&key))
            .unwrap_or(false)
    }

    /// Descriptors of all registered drivers
    pub fn descriptors(&self) -> Vec<DriverDescriptor> {
        let collect = |map: &HashMap<String, Arc<dyn DriverFactory>>| {
            let mut descriptors: Vec<_> = map.values().map(|f| f.descriptor()).collect();
            descriptors.sort_by(|a, b| a.driver_type.cmp(&b.driver_type));
            descriptors
        };
        if let Some(factories) = self.sealed.get() {
            return collect(factories);
        }
        self.staging
            .lock()
            .map(|staging| collect(&staging))
            .unwrap_or_default()
    }
}

/// Create a registry with all default drivers registered
///
/// This is the single point where new drivers should be added.
pub fn create_default_registry() -> Result<DriverRegistry> {
    let registry = DriverRegistry::new();

    registry.register(Arc::new(crate::drivers::modbus::ModbusTcpFactory))?;
    registry.register(Arc::new(crate::drivers::virt::VirtualFactory))?;

    Ok(registry)
}
