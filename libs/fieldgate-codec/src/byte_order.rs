//! Byte order handling for multi-register values
//!
//! A single flag governs register assembly: there are no independent
//! word-order and byte-order fields. Modbus-style transports always put the
//! two bytes of one register on the wire most-significant first, so the flag
//! is significant only when a value spans more than one register:
//! `BigEndian` places the most significant register first, `LittleEndian`
//! places the least significant register first.

use serde::{Deserialize, Serialize};

/// Register order for values spanning multiple 16-bit registers
///
/// For the 32-bit value `0x00010002` held in registers:
/// - `BigEndian`: `[0x0001, 0x0002]`
/// - `LittleEndian`: `[0x0002, 0x0001]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ByteOrder {
    /// Most significant register first (network order)
    #[default]
    BigEndian,
    /// Least significant register first
    LittleEndian,
}

impl ByteOrder {
    /// Convert from common string spellings
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        let normalized = s.to_uppercase().replace('-', "_");
        match normalized.as_str() {
            "BIG_ENDIAN" | "BIGENDIAN" | "BE" => Some(Self::BigEndian),
            "LITTLE_ENDIAN" | "LITTLEENDIAN" | "LE" => Some(Self::LittleEndian),
            _ => None,
        }
    }

    /// Get canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BigEndian => "BIG_ENDIAN",
            Self::LittleEndian => "LITTLE_ENDIAN",
        }
    }

    /// Assemble two registers into a 32-bit value
    pub fn assemble_u32(&self, words: [u16; 2]) -> u32 {
        match self {
            Self::BigEndian => ((words[0] as u32) << 16) | words[1] as u32,
            Self::LittleEndian => ((words[1] as u32) << 16) | words[0] as u32,
        }
    }

    /// Split a 32-bit value into two registers (inverse of `assemble_u32`)
    pub fn split_u32(&self, value: u32) -> [u16; 2] {
        let high = (value >> 16) as u16;
        let low = value as u16;
        match self {
            Self::BigEndian => [high, low],
            Self::LittleEndian => [low, high],
        }
    }
}

impl std::fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
