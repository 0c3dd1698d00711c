//! Modbus PDU (Protocol Data Unit) handling
//!
//! Builds request PDUs and parses response PDUs for the standard function
//! codes the driver uses. Framing (MBAP header, transaction management)
//! lives in the TCP client; this module is pure byte work.

use crate::error::{AcqSrvError, Result};

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModbusExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    SlaveDeviceFailure = 0x04,
    Acknowledge = 0x05,
    SlaveDeviceBusy = 0x06,
    NegativeAcknowledge = 0x07,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetDeviceFailedToRespond = 0x0B,
    Unknown = 0xFF,
}

impl From<u8> for ModbusExceptionCode {
    fn from(code: u8) -> Self {
        match code {
            0x01 => Self::IllegalFunction,
            0x02 => Self::IllegalDataAddress,
            0x03 => Self::IllegalDataValue,
            0x04 => Self::SlaveDeviceFailure,
            0x05 => Self::Acknowledge,
            0x06 => Self::SlaveDeviceBusy,
            0x07 => Self::NegativeAcknowledge,
            0x08 => Self::MemoryParityError,
            0x0A => Self::GatewayPathUnavailable,
            0x0B => Self::GatewayTargetDeviceFailedToRespond,
            _ => Self::Unknown,
        }
    }
}

impl ModbusExceptionCode {
    /// Human-readable exception description
    pub fn description(&self) -> &'static str {
        match self {
            Self::IllegalFunction => "Illegal function",
            Self::IllegalDataAddress => "Illegal data address",
            Self::IllegalDataValue => "Illegal data value",
            Self::SlaveDeviceFailure => "Slave device failure",
            Self::Acknowledge => "Acknowledge",
            Self::SlaveDeviceBusy => "Slave device busy",
            Self::NegativeAcknowledge => "Negative acknowledge",
            Self::MemoryParityError => "Memory parity error",
            Self::GatewayPathUnavailable => "Gateway path unavailable",
            Self::GatewayTargetDeviceFailedToRespond => "Gateway target device failed to respond",
            Self::Unknown => "Unknown exception",
        }
    }
}

/// Parsed response PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePdu {
    /// Unpacked bit data from 0x01/0x02 (may carry padding bits)
    ReadBits(Vec<bool>),
    /// Register data from 0x03/0x04
    ReadRegisters(Vec<u16>),
    /// Echo of a single write (0x05/0x06)
    WriteSingleAck { address: u16, value: u16 },
    /// Acknowledgement of a multiple write (0x0F/0x10)
    WriteMultipleAck { address: u16, quantity: u16 },
}

// ============================================================================
// Request building
// ============================================================================

/// Build a read request PDU (0x01-0x04)
pub fn build_read_request(function_code: u8, start_address: u16, quantity: u16) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(5);
    pdu.push(function_code);
    pdu.extend_from_slice(&start_address.to_be_bytes());
    pdu.extend_from_slice(&quantity.to_be_bytes());
    pdu
}

/// Build a Write Single Coil request PDU (0x05)
pub fn build_write_single_coil(address: u16, value: bool) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(5);
    pdu.push(0x05);
    pdu.extend_from_slice(&address.to_be_bytes());
    pdu.extend_from_slice(if value { &[0xFF, 0x00] } else { &[0x00, 0x00] });
    pdu
}

/// Build a Write Single Register request PDU (0x06)
pub fn build_write_single_register(address: u16, value: u16) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(5);
    pdu.push(0x06);
    pdu.extend_from_slice(&address.to_be_bytes());
    pdu.extend_from_slice(&value.to_be_bytes());
    pdu
}

/// Build a Write Multiple Coils request PDU (0x0F)
pub fn build_write_multiple_coils(start_address: u16, values: &[bool]) -> Vec<u8> {
    let byte_count = values.len().div_ceil(8);
    let mut pdu = Vec::with_capacity(6 + byte_count);
    pdu.push(0x0F);
    pdu.extend_from_slice(&start_address.to_be_bytes());
    pdu.extend_from_slice(&(values.len() as u16).to_be_bytes());
    pdu.push(byte_count as u8);

    let mut packed = vec![0u8; byte_count];
    for (i, value) in values.iter().enumerate() {
        if *value {
            packed[i / 8] |= 1 << (i % 8);
        }
    }
    pdu.extend_from_slice(&packed);
    pdu
}

/// Build a Write Multiple Registers request PDU (0x10)
pub fn build_write_multiple_registers(start_address: u16, values: &[u16]) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(6 + values.len() * 2);
    pdu.push(0x10);
    pdu.extend_from_slice(&start_address.to_be_bytes());
    pdu.extend_from_slice(&(values.len() as u16).to_be_bytes());
    pdu.push((values.len() * 2) as u8);
    for value in values {
        pdu.extend_from_slice(&value.to_be_bytes());
    }
    pdu
}

// ============================================================================
// Response parsing
// ============================================================================

/// Parse a response PDU, mapping exception responses to protocol errors
pub fn parse_response(pdu: &[u8]) -> Result<ResponsePdu> {
    if pdu.is_empty() {
        return Err(AcqSrvError::protocol("Empty response PDU"));
    }

    let function_code = pdu[0];

    // Exception responses set the high bit of the function code
    if function_code & 0x80 != 0 {
        let exception = pdu
            .get(1)
            .map(|code| ModbusExceptionCode::from(*code))
            .unwrap_or(ModbusExceptionCode::Unknown);
        return Err(AcqSrvError::protocol(format!(
            "Exception for function 0x{:02X}: {} (0x{:02X})",
            function_code & 0x7F,
            exception.description(),
            exception as u8
        )));
    }

    match function_code {
        0x01 | 0x02 => {
            let byte_count = *pdu
                .get(1)
                .ok_or_else(|| AcqSrvError::protocol("Truncated bit response"))? as usize;
            let data = pdu
                .get(2..2 + byte_count)
                .ok_or_else(|| AcqSrvError::protocol("Bit response shorter than byte count"))?;
            let mut bits = Vec::with_capacity(byte_count * 8);
            for byte in data {
                for bit in 0..8 {
                    bits.push(byte & (1 << bit) != 0);
                }
            }
            Ok(ResponsePdu::ReadBits(bits))
        },
        0x03 | 0x04 => {
            let byte_count = *pdu
                .get(1)
                .ok_or_else(|| AcqSrvError::protocol("Truncated register response"))?
                as usize;
            let data = pdu.get(2..2 + byte_count).ok_or_else(|| {
                AcqSrvError::protocol("Register response shorter than byte count")
            })?;
            if byte_count % 2 != 0 {
                return Err(AcqSrvError::protocol("Odd byte count in register response"));
            }
            let words = data
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            Ok(ResponsePdu::ReadRegisters(words))
        },
        0x05 | 0x06 => {
            let body = pdu
                .get(1..5)
                .ok_or_else(|| AcqSrvError::protocol("Truncated write echo"))?;
            Ok(ResponsePdu::WriteSingleAck {
                address: u16::from_be_bytes([body[0], body[1]]),
                value: u16::from_be_bytes([body[2], body[3]]),
            })
        },
        0x0F | 0x10 => {
            let body = pdu
                .get(1..5)
                .ok_or_else(|| AcqSrvError::protocol("Truncated write acknowledgement"))?;
            Ok(ResponsePdu::WriteMultipleAck {
                address: u16::from_be_bytes([body[0], body[1]]),
                quantity: u16::from_be_bytes([body[2], body[3]]),
            })
        },
        other => Err(AcqSrvError::protocol(format!(
            "Unexpected function code in response: 0x{:02X}",
            other
        ))),
    }
}
