//! Device driver implementations
//!
//! A driver owns one transport session to one device and exposes the
//! frame-oriented surface the runtime needs: acquire raw windows for read
//! function codes, push encoded payloads for write function codes. Drivers
//! are produced by factories resolved through the capability registry.

pub mod modbus;
pub mod virt;

use async_trait::async_trait;

use fieldgate_codec::{EncodedWrite, FunctionCode, RawFrame};

use crate::error::Result;

/// Transport driver for one device session
///
/// The session task owns the driver exclusively; within one session all
/// operations are sequential, so implementations never see concurrent calls
/// against the same transport handle.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Driver type string as registered in the capability registry
    fn driver_type(&self) -> &str;

    /// Check connection status
    fn is_connected(&self) -> bool;

    /// Connect to the device
    async fn connect(&mut self) -> Result<()>;

    /// Disconnect and release the transport handle
    async fn disconnect(&mut self) -> Result<()>;

    /// Acquire one contiguous raw window for a read function code
    async fn read_frame(
        &mut self,
        function_code: FunctionCode,
        start_address: u16,
        count: u16,
    ) -> Result<RawFrame>;

    /// Write an encoded payload produced by the codec
    async fn write(
        &mut self,
        function_code: FunctionCode,
        address: u16,
        payload: &EncodedWrite,
    ) -> Result<()>;
}
