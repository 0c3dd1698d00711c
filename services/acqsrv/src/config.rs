//! Acquisition service configuration
//!
//! Configuration is layered: a YAML file provides the base, `ACQSRV_`-prefixed
//! environment variables override individual keys. Register mapping sets ride
//! along in the same file as the configuration boundary's seed data; at
//! runtime the mapping store API is the programmatic form of the same
//! boundary.

use std::collections::HashSet;
use std::time::Duration;

use dashmap::DashMap;
use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use fieldgate_codec::RegisterMapping;

use crate::error::{AcqSrvError, Result};

/// One configured device and its transport parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Stable device identifier
    pub device_id: String,
    /// External device name used in log entries
    pub device_key: String,
    /// Product (thing model) the device belongs to
    pub product_id: String,
    /// Driver type resolved through the capability registry
    pub driver_type: String,
    /// Transport host, absent for drivers without a network endpoint
    #[serde(default)]
    pub host: Option<String>,
    /// Transport port
    #[serde(default)]
    pub port: Option<u16>,
    /// Protocol unit/slave identifier
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    /// Poll cycle interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Per-request transport timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Disabled devices are not started
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_unit_id() -> u8 {
    1
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl DeviceProfile {
    /// Transport endpoint as `host:port`
    pub fn endpoint(&self) -> Result<String> {
        let host = self
            .host
            .as_deref()
            .ok_or_else(|| AcqSrvError::config(format!("Device {}: missing host", self.device_id)))?;
        let port = self
            .port
            .ok_or_else(|| AcqSrvError::config(format!("Device {}: missing port", self.device_id)))?;
        Ok(format!("{}:{}", host, port))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Validate invariants that do not depend on the driver implementation
    pub fn validate(&self) -> Result<()> {
        if self.device_id.is_empty() {
            return Err(AcqSrvError::config("device_id must not be empty"));
        }
        if self.driver_type.is_empty() {
            return Err(AcqSrvError::config(format!(
                "Device {}: driver_type must not be empty",
                self.device_id
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(AcqSrvError::config(format!(
                "Device {}: poll_interval_ms must be positive",
                self.device_id
            )));
        }
        if self.timeout_ms == 0 {
            return Err(AcqSrvError::config(format!(
                "Device {}: timeout_ms must be positive",
                self.device_id
            )));
        }
        Ok(())
    }
}

/// Runtime limits and thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Bounded DataPoint channel capacity; the session blocks when full
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
    /// Decode errors within the sliding window that trip the ERROR state
    #[serde(default = "default_decode_error_threshold")]
    pub decode_error_threshold: u32,
    /// Sliding window length for the decode error counter, in seconds
    #[serde(default = "default_decode_error_window_secs")]
    pub decode_error_window_secs: u64,
    /// Maximum registers covered by one batched read
    #[serde(default = "default_max_batch_registers")]
    pub max_batch_registers: u16,
    /// Retained driver log entries
    #[serde(default = "default_log_ring_capacity")]
    pub log_ring_capacity: usize,
}

fn default_event_queue_capacity() -> usize {
    1024
}

fn default_decode_error_threshold() -> u32 {
    10
}

fn default_decode_error_window_secs() -> u64 {
    60
}

fn default_max_batch_registers() -> u16 {
    120
}

fn default_log_ring_capacity() -> usize {
    512
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: default_event_queue_capacity(),
            decode_error_threshold: default_decode_error_threshold(),
            decode_error_window_secs: default_decode_error_window_secs(),
            max_batch_registers: default_max_batch_registers(),
            log_ring_capacity: default_log_ring_capacity(),
        }
    }
}

/// Reconnect/backoff policy values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Maximum retry attempts before a session stays in ERROR (0 = unlimited)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

/// Product-level mapping seed set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductMappingSet {
    pub product_id: String,
    pub mappings: Vec<RegisterMapping>,
}

/// Device-level mapping override seed set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceMappingSet {
    pub device_id: String,
    pub mappings: Vec<RegisterMapping>,
}

/// Top-level acquisition service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcqSrvConfig {
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub devices: Vec<DeviceProfile>,
    #[serde(default)]
    pub product_mappings: Vec<ProductMappingSet>,
    #[serde(default)]
    pub device_mappings: Vec<DeviceMappingSet>,
}

impl AcqSrvConfig {
    /// Load from a YAML file with `ACQSRV_` environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let config: AcqSrvConfig = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("ACQSRV_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate device records; mapping sets are validated when loaded into
    /// the store.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for device in &self.devices {
            device.validate()?;
            if !seen.insert(device.device_id.as_str()) {
                return Err(AcqSrvError::config(format!(
                    "Duplicate device_id: {}",
                    device.device_id
                )));
            }
        }
        Ok(())
    }
}

/// Shared lookup of configured devices
///
/// Read-mostly: populated at startup from configuration, queried by the
/// resolver (device -> product) and the session manager (driver selection).
#[derive(Debug, Default)]
pub struct DeviceDirectory {
    devices: DashMap<String, DeviceProfile>,
}

impl DeviceDirectory {
    pub fn new() -> Self {
        Self {
            devices: DashMap::new(),
        }
    }

    pub fn from_profiles(profiles: impl IntoIterator<Item = DeviceProfile>) -> Self {
        let directory = Self::new();
        for profile in profiles {
            directory.insert(profile);
        }
        directory
    }

    pub fn insert(&self, profile: DeviceProfile) {
        self.devices.insert(profile.device_id.clone(), profile);
    }

    pub fn get(&self, device_id: &str) -> Option<DeviceProfile> {
        self.devices.get(device_id).map(|entry| entry.clone())
    }

    pub fn remove(&self, device_id: &str) -> Option<DeviceProfile> {
        self.devices.remove(device_id).map(|(_, profile)| profile)
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.devices.iter().map(|entry| entry.key().clone()).collect()
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

    fn profile(id: &str) -> DeviceProfile {
        DeviceProfile {
            device_id: id.to_string(),
            device_key: format!("{}-key", id),
            product_id: "product-1".to_string(),
            driver_type: "virtual".to_string(),
            host: None,
            port: None,
            unit_id: 1,
            poll_interval_ms: 100,
            timeout_ms: 1000,
            enabled: true,
        }
    }

    #[test]
    fn test_profile_validation() {
        assert!(profile("dev-1").validate().is_ok());

        let mut bad = profile("dev-1");
        bad.poll_interval_ms = 0;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_endpoint_requires_host_and_port() {
        let mut p = profile("dev-1");
        assert!(p.endpoint().is_err());
        p.host = Some("10.0.0.5".to_string());
        p.port = Some(502);
        assert_eq!(p.endpoint().unwrap(), "10.0.0.5:502");
    }

    #[test]
    fn test_duplicate_device_id_rejected() {
        let config = AcqSrvConfig {
            devices: vec![profile("dev-1"), profile("dev-1")],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_parsing_with_defaults() {
        let yaml = r#"
devices:
  - device_id: dev-1
    device_key: meter-a
    product_id: product-1
    driver_type: modbus_tcp
    host: 192.168.1.10
    port: 502
"#;
        let config: AcqSrvConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.devices.len(), 1);
        assert_eq!(config.devices[0].unit_id, 1);
        assert_eq!(config.devices[0].poll_interval_ms, 1000);
        assert_eq!(config.limits.event_queue_capacity, 1024);
        assert_eq!(config.reconnect.max_attempts, 3);
    }

    #[test]
    fn test_directory_lookup() {
        let directory = DeviceDirectory::from_profiles(vec![profile("dev-1"), profile("dev-2")]);
        assert_eq!(directory.len(), 2);
        assert!(directory.get("dev-1").is_some());
        assert!(directory.get("dev-3").is_none());
    }
}
