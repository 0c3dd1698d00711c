//! Virtual driver implementation
//!
//! Provides an in-memory device for testing and bring-up without requiring
//! actual hardware. Banks are shared per device through the factory, so
//! tests can seed raw registers and observe writes.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use fieldgate_codec::{EncodedWrite, FunctionCode, RawFrame};

use crate::config::DeviceProfile;
use crate::drivers::DeviceDriver;
use crate::error::{AcqSrvError, Result};
use crate::registry::{DriverDescriptor, DriverFactory};

pub const DRIVER_TYPE: &str = "virtual";

/// Shared register/coil bank of one virtual device
#[derive(Debug, Clone, Default)]
pub struct VirtualBank {
    registers: Arc<DashMap<u16, u16>>,
    coils: Arc<DashMap<u16, bool>>,
}

impl VirtualBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_register(&self, address: u16, value: u16) {
        self.registers.insert(address, value);
    }

    /// Seed a contiguous register run
    pub fn set_registers(&self, start_address: u16, values: &[u16]) {
        for (offset, value) in values.iter().enumerate() {
            self.registers.insert(start_address + offset as u16, *value);
        }
    }

    pub fn register(&self, address: u16) -> u16 {
        self.registers.get(&address).map(|v| *v).unwrap_or(0)
    }

    pub fn set_coil(&self, address: u16, value: bool) {
        self.coils.insert(address, value);
    }

    pub fn coil(&self, address: u16) -> bool {
        self.coils.get(&address).map(|v| *v).unwrap_or(false)
    }
}

/// Virtual driver serving frames from an in-memory bank
pub struct VirtualDriver {
    device_id: String,
    connected: bool,
    bank: VirtualBank,
}

impl VirtualDriver {
    pub fn new(profile: &DeviceProfile, bank: VirtualBank) -> Self {
        Self {
            device_id: profile.device_id.clone(),
            connected: false,
            bank,
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(AcqSrvError::not_connected())
        }
    }
}

#[async_trait]
impl DeviceDriver for VirtualDriver {
    fn driver_type(&self) -> &str {
        DRIVER_TYPE
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<()> {
        self.connected = true;
        debug!(device_id = %self.device_id, "virtual driver connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        debug!(device_id = %self.device_id, "virtual driver disconnected");
        Ok(())
    }

    async fn read_frame(
        &mut self,
        function_code: FunctionCode,
        start_address: u16,
        count: u16,
    ) -> Result<RawFrame> {
        self.ensure_connected()?;

        match function_code {
            FunctionCode::Read01 | FunctionCode::Read02 => {
                let bits = (0..count)
                    .map(|offset| self.bank.coil(start_address + offset))
                    .collect();
                Ok(RawFrame::from_coils(start_address, bits))
            },
            FunctionCode::Read03 | FunctionCode::Read04 => {
                let words: Vec<u16> = (0..count)
                    .map(|offset| self.bank.register(start_address + offset))
                    .collect();
                Ok(RawFrame::from_registers(start_address, &words))
            },
            other => Err(AcqSrvError::validation(format!(
                "Function code {} is not readable",
                other
            ))),
        }
    }

    async fn write(
        &mut self,
        function_code: FunctionCode,
        address: u16,
        payload: &EncodedWrite,
    ) -> Result<()> {
        self.ensure_connected()?;

        match (function_code, payload) {
            (FunctionCode::Write05 | FunctionCode::Write0F, EncodedWrite::Coil(value)) => {
                self.bank.set_coil(address, *value);
                Ok(())
            },
            (FunctionCode::Write06 | FunctionCode::Write10, EncodedWrite::Registers(words)) => {
                self.bank.set_registers(address, words);
                Ok(())
            },
            (other, _) => Err(AcqSrvError::validation(format!(
                "Function code {} does not match payload kind",
                other
            ))),
        }
    }
}

/// Virtual driver factory (always available)
///
/// Banks live in the factory keyed by device id, so the same device gets
/// the same bank across session restarts and tests can seed data before a
/// session starts.
#[derive(Debug, Default)]
pub struct VirtualFactory {
    banks: DashMap<String, VirtualBank>,
}

impl VirtualFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bank for a device, created on first access
    pub fn bank(&self, device_id: &str) -> VirtualBank {
        self.banks
            .entry(device_id.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl DriverFactory for VirtualFactory {
    fn descriptor(&self) -> DriverDescriptor {
        DriverDescriptor::new(
            DRIVER_TYPE,
            "Virtual Device",
            "In-memory simulated device for testing and bring-up",
        )
    }

    async fn create(&self, profile: &DeviceProfile) -> Result<Box<dyn DeviceDriver>> {
        let bank = self.bank(&profile.device_id);
        Ok(Box::new(VirtualDriver::new(profile, bank)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> DeviceProfile {
        DeviceProfile {
            device_id: "virt-1".to_string(),
            device_key: "virt-1".to_string(),
            product_id: "product-1".to_string(),
            driver_type: DRIVER_TYPE.to_string(),
            host: None,
            port: None,
            unit_id: 1,
            poll_interval_ms: 100,
            timeout_ms: 1000,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_read_requires_connection() {
        let factory = VirtualFactory::new();
        let mut driver = factory.create(&profile()).await.unwrap();
        assert!(!driver.is_connected());
        assert!(driver
            .read_frame(FunctionCode::Read03, 0, 4)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_register_read_reflects_bank() {
        let factory = VirtualFactory::new();
        factory.bank("virt-1").set_registers(10, &[7, 8, 9]);

        let mut driver = factory.create(&profile()).await.unwrap();
        driver.connect().await.unwrap();

        let frame = driver
            .read_frame(FunctionCode::Read03, 10, 3)
            .await
            .unwrap();
        assert_eq!(frame.register_at(10), Some(7));
        assert_eq!(frame.register_at(12), Some(9));
    }

    #[tokio::test]
    async fn test_write_round_trip() {
        let factory = VirtualFactory::new();
        let mut driver = factory.create(&profile()).await.unwrap();
        driver.connect().await.unwrap();

        driver
            .write(
                FunctionCode::Write06,
                5,
                &EncodedWrite::Registers(vec![650]),
            )
            .await
            .unwrap();
        assert_eq!(factory.bank("virt-1").register(5), 650);

        driver
            .write(FunctionCode::Write05, 2, &EncodedWrite::Coil(true))
            .await
            .unwrap();
        assert!(factory.bank("virt-1").coil(2));
    }

    #[tokio::test]
    async fn test_unseeded_addresses_read_zero() {
        let factory = VirtualFactory::new();
        let mut driver = factory.create(&profile()).await.unwrap();
        driver.connect().await.unwrap();

        let frame = driver
            .read_frame(FunctionCode::Read03, 1000, 2)
            .await
            .unwrap();
        assert_eq!(frame.register_at(1000), Some(0));
        assert_eq!(frame.register_at(1001), Some(0));
    }
}
