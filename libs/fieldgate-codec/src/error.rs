//! Error types for the register codec
//!
//! Configuration problems are caught when a mapping is validated;
//! decode/encode problems are local to one mapping and one frame.

use thiserror::Error;

/// Codec error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The frame window does not cover the mapping's register span
    #[error(
        "Insufficient data: address {address} needs {needed} register(s), frame covers {start}..{end}"
    )]
    InsufficientData {
        address: u16,
        needed: u16,
        start: u16,
        end: u16,
    },

    /// Bit index outside the assembled register width
    #[error("Bit index {bit_index} out of range (0-{max})")]
    BitIndexOutOfRange { bit_index: u8, max: u8 },

    /// De-scaled value does not fit the mapping's target width
    #[error("Value {value} out of range for {data_type} encode")]
    ValueOutOfRange { value: String, data_type: String },

    /// Encode attempted against a read function code
    #[error("Mapping '{identifier}' uses read-only function code 0x{function_code:02X}")]
    ReadOnlyMapping {
        identifier: String,
        function_code: u8,
    },

    /// Mapping violates a configuration invariant
    #[error("Invalid mapping '{identifier}': {reason}")]
    InvalidMapping { identifier: String, reason: String },

    /// Frame kind (coils vs registers) does not match the function code
    #[error("Frame kind mismatch for function code 0x{function_code:02X}")]
    FrameMismatch { function_code: u8 },

    /// IEEE-754 payload decoded to NaN or infinity
    #[error("Non-finite float payload at address {0}")]
    NonFiniteFloat(u16),

    /// Supplied value type does not match the mapping's data type
    #[error("Type mismatch: mapping '{identifier}' is {expected}, got {actual}")]
    TypeMismatch {
        identifier: String,
        expected: String,
        actual: String,
    },
}

impl CodecError {
    /// Configuration errors are rejected at mapping-save time; everything
    /// else is a per-cycle decode/encode failure.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::InvalidMapping { .. })
    }
}

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;
