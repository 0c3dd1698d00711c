//! Modbus TCP driver
//!
//! Wraps the TCP client behind the `DeviceDriver` surface: read function
//! codes become raw frame windows, encoded writes become single/multiple
//! register or coil writes.

pub mod client;
pub mod pdu;

use async_trait::async_trait;

use fieldgate_codec::{EncodedWrite, FunctionCode, RawFrame};

use crate::config::DeviceProfile;
use crate::drivers::modbus::client::ModbusTcpClient;
use crate::drivers::DeviceDriver;
use crate::error::{AcqSrvError, Result};
use crate::registry::{DriverDescriptor, DriverFactory};

pub const DRIVER_TYPE: &str = "modbus_tcp";

/// Modbus TCP device driver
pub struct ModbusTcpDriver {
    client: ModbusTcpClient,
}

impl ModbusTcpDriver {
    pub fn from_profile(profile: &DeviceProfile) -> Result<Self> {
        let endpoint = profile.endpoint()?;
        Ok(Self {
            client: ModbusTcpClient::new(endpoint, profile.unit_id, profile.timeout()),
        })
    }
}

#[async_trait]
impl DeviceDriver for ModbusTcpDriver {
    fn driver_type(&self) -> &str {
        DRIVER_TYPE
    }

    fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    async fn connect(&mut self) -> Result<()> {
        self.client.connect().await
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.client.disconnect().await
    }

    async fn read_frame(
        &mut self,
        function_code: FunctionCode,
        start_address: u16,
        count: u16,
    ) -> Result<RawFrame> {
        match function_code {
            FunctionCode::Read01 | FunctionCode::Read02 => {
                let bits = self
                    .client
                    .read_bits(function_code.as_u8(), start_address, count)
                    .await?;
                Ok(RawFrame::from_coils(start_address, bits))
            },
            FunctionCode::Read03 | FunctionCode::Read04 => {
                let words = self
                    .client
                    .read_registers(function_code.as_u8(), start_address, count)
                    .await?;
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
        match (function_code, payload) {
            (FunctionCode::Write05, EncodedWrite::Coil(value)) => {
                self.client.write_single_coil(address, *value).await
            },
            (FunctionCode::Write0F, EncodedWrite::Coil(value)) => {
                self.client.write_multiple_coils(address, &[*value]).await
            },
            (FunctionCode::Write06, EncodedWrite::Registers(words)) => match words.as_slice() {
                [word] => self.client.write_single_register(address, *word).await,
                _ => Err(AcqSrvError::validation(
                    "Write06 carries exactly one register",
                )),
            },
            (FunctionCode::Write10, EncodedWrite::Registers(words)) => {
                self.client.write_multiple_registers(address, words).await
            },
            (other, _) => Err(AcqSrvError::validation(format!(
                "Function code {} does not match payload kind",
                other
            ))),
        }
    }
}

/// Modbus TCP driver factory
pub struct ModbusTcpFactory;

#[async_trait]
impl DriverFactory for ModbusTcpFactory {
    fn descriptor(&self) -> DriverDescriptor {
        DriverDescriptor::new(
            DRIVER_TYPE,
            "Modbus TCP",
            "Polls register/coil data from Modbus TCP devices and gateways",
        )
    }

    async fn create(&self, profile: &DeviceProfile) -> Result<Box<dyn DeviceDriver>> {
        Ok(Box::new(ModbusTcpDriver::from_profile(profile)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(host: Option<&str>, port: Option<u16>) -> DeviceProfile {
        DeviceProfile {
            device_id: "meter-1".to_string(),
            device_key: "meter-1".to_string(),
            product_id: "product-1".to_string(),
            driver_type: DRIVER_TYPE.to_string(),
            host: host.map(str::to_string),
            port,
            unit_id: 1,
            poll_interval_ms: 1000,
            timeout_ms: 1000,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_factory_requires_endpoint() {
        let factory = ModbusTcpFactory;
        assert!(factory.create(&profile(None, None)).await.is_err());
        assert!(factory
            .create(&profile(Some("127.0.0.1"), Some(502)))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_read_frame_rejects_write_codes() {
        let mut driver = ModbusTcpDriver::from_profile(&profile(Some("127.0.0.1"), Some(502)))
            .expect("profile is complete");
        assert!(driver
            .read_frame(FunctionCode::Write06, 0, 1)
            .await
            .is_err());
    }
}
