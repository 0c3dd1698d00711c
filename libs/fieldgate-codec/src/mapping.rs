//! Register mapping model
//!
//! A `RegisterMapping` describes one decodable/encodable field of a device:
//! where it lives (function code + register address), how to interpret the
//! raw bits (data type, byte order, optional bit index) and how to scale the
//! result into an engineering value. Mappings are created by the external
//! configuration service and are read-only to the codec and the runtime.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::byte_order::ByteOrder;
use crate::error::{CodecError, Result};

/// Modbus-style function codes with intuitive naming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum FunctionCode {
    /// Read Coils (0x01)
    Read01,
    /// Read Discrete Inputs (0x02)
    Read02,
    /// Read Holding Registers (0x03)
    Read03,
    /// Read Input Registers (0x04)
    Read04,
    /// Write Single Coil (0x05)
    Write05,
    /// Write Single Register (0x06)
    Write06,
    /// Write Multiple Coils (0x0F)
    Write0F,
    /// Write Multiple Registers (0x10)
    Write10,
}

impl TryFrom<u8> for FunctionCode {
    type Error = String;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        match code {
            0x01 => Ok(Self::Read01),
            0x02 => Ok(Self::Read02),
            0x03 => Ok(Self::Read03),
            0x04 => Ok(Self::Read04),
            0x05 => Ok(Self::Write05),
            0x06 => Ok(Self::Write06),
            0x0F => Ok(Self::Write0F),
            0x10 => Ok(Self::Write10),
            other => Err(format!("Unsupported function code: 0x{:02X}", other)),
        }
    }
}

impl From<FunctionCode> for u8 {
    fn from(code: FunctionCode) -> Self {
        match code {
            FunctionCode::Read01 => 0x01,
            FunctionCode::Read02 => 0x02,
            FunctionCode::Read03 => 0x03,
            FunctionCode::Read04 => 0x04,
            FunctionCode::Write05 => 0x05,
            FunctionCode::Write06 => 0x06,
            FunctionCode::Write0F => 0x0F,
            FunctionCode::Write10 => 0x10,
        }
    }
}

impl FunctionCode {
    /// Raw opcode value
    pub fn as_u8(&self) -> u8 {
        (*self).into()
    }

    /// Read opcodes (0x01-0x04)
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Read01 | Self::Read02 | Self::Read03 | Self::Read04)
    }

    /// Write opcodes (0x05, 0x06, 0x0F, 0x10)
    pub fn is_write(&self) -> bool {
        !self.is_read()
    }

    /// Bit-addressed opcodes operate on coils/discrete inputs (1 bit per address)
    pub fn is_bit_addressed(&self) -> bool {
        matches!(self, Self::Read01 | Self::Read02 | Self::Write05 | Self::Write0F)
    }

    /// Word-addressed opcodes operate on 16-bit registers
    pub fn is_word_addressed(&self) -> bool {
        !self.is_bit_addressed()
    }
}

impl std::fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:02X}", self.as_u8())
    }
}

/// Engineering data types a mapping can decode to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Bool,
    Int,
    Float,
}

impl DataType {
    /// Number of 16-bit registers this data type occupies on word-addressed reads
    pub fn register_count(&self) -> u16 {
        match self {
            DataType::Bool | DataType::Int => 1,
            DataType::Float => 2,
        }
    }

    /// Lowercase name matching the configuration format
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Int => "int",
            DataType::Float => "float",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn default_scale_factor() -> Decimal {
    Decimal::ONE
}

fn default_enabled() -> bool {
    true
}

/// Register mapping for one device property
///
/// `device_id = None` marks a product (thing-model) level default; a device
/// with any enabled device-level mapping shadows the whole product-level set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterMapping {
    /// Owning device, absent for product-level defaults
    #[serde(default)]
    pub device_id: Option<String>,
    /// Thing model this property belongs to
    pub thing_model_id: String,
    /// Property identifier, unique within its scope
    pub identifier: String,
    /// Register address
    pub register_address: u16,
    /// Function code used to acquire/write this property
    pub function_code: FunctionCode,
    /// Engineering data type
    pub data_type: DataType,
    /// Scale factor applied as `value = raw * scale_factor + offset`
    #[serde(default = "default_scale_factor")]
    pub scale_factor: Decimal,
    /// Offset applied after scaling
    #[serde(default)]
    pub offset: Decimal,
    /// Bit position for booleans packed inside a wider register (0 = LSB)
    #[serde(default)]
    pub bit_index: Option<u8>,
    /// Register order for multi-register values
    #[serde(default)]
    pub byte_order: ByteOrder,
    /// Disabled mappings are ignored at resolution time
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Resolution ordering key (ascending, ties broken by identifier)
    #[serde(default)]
    pub sort_code: i32,
    /// Free-text operator note
    #[serde(default)]
    pub remark: Option<String>,
}

impl RegisterMapping {
    /// Create a new mapping with defaults (scale 1, offset 0, big-endian, enabled)
    pub fn new(
        identifier: impl Into<String>,
        register_address: u16,
        function_code: FunctionCode,
        data_type: DataType,
    ) -> Self {
        Self {
            device_id: None,
            thing_model_id: String::new(),
            identifier: identifier.into(),
            register_address,
            function_code,
            data_type,
            scale_factor: Decimal::ONE,
            offset: Decimal::ZERO,
            bit_index: None,
            byte_order: ByteOrder::default(),
            enabled: true,
            sort_code: 0,
            remark: None,
        }
    }

    /// Bind the mapping to a device (device-level override)
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Set the owning thing model
    pub fn with_thing_model(mut self, thing_model_id: impl Into<String>) -> Self {
        self.thing_model_id = thing_model_id.into();
        self
    }

    /// Set scale factor and offset
    pub fn with_scaling(mut self, scale_factor: Decimal, offset: Decimal) -> Self {
        self.scale_factor = scale_factor;
        self.offset = offset;
        self
    }

    /// Set the bit index for packed booleans
    pub fn with_bit_index(mut self, bit_index: u8) -> Self {
        self.bit_index = Some(bit_index);
        self
    }

    /// Set register order
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    /// Set resolution ordering key
    pub fn with_sort_code(mut self, sort_code: i32) -> Self {
        self.sort_code = sort_code;
        self
    }

    /// Enable or disable the mapping
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Number of registers this mapping occupies
    pub fn register_count(&self) -> u16 {
        if self.function_code.is_bit_addressed() {
            1
        } else {
            self.data_type.register_count()
        }
    }

    /// Last address this mapping occupies
    pub fn end_address(&self) -> u16 {
        self.register_address
            .saturating_add(self.register_count() - 1)
    }

    /// Whether the function code permits writes
    pub fn is_writable(&self) -> bool {
        self.function_code.is_write()
    }

    /// Validate configuration invariants
    ///
    /// Rejections here happen at configuration-write time, never silently
    /// coerced at decode time.
    pub fn validate(&self) -> Result<()> {
        if self.identifier.is_empty() {
            return Err(self.invalid("identifier must not be empty"));
        }

        if self.scale_factor.is_zero() {
            return Err(self.invalid("scale factor must not be zero"));
        }

        if let Some(bit_index) = self.bit_index {
            if self.data_type != DataType::Bool {
                return Err(self.invalid(format!(
                    "bit index is only valid for bool data type, found {}",
                    self.data_type
                )));
            }
            if bit_index > 15 {
                return Err(self.invalid(format!("bit index {} out of range (0-15)", bit_index)));
            }
        }

        if self.function_code.is_bit_addressed() {
            if self.data_type != DataType::Bool {
                return Err(self.invalid(format!(
                    "function code {} is bit-addressed and requires bool, found {}",
                    self.function_code, self.data_type
                )));
            }
            if self.bit_index.is_some() {
                return Err(self.invalid("bit index is not applicable to coil function codes"));
            }
        }

        // Address span must stay inside the 16-bit register space
        let end = self.register_address as u32 + self.register_count() as u32 - 1;
        if end > u16::MAX as u32 {
            return Err(self.invalid(format!(
                "address range {}..={} exceeds maximum register address {}",
                self.register_address,
                end,
                u16::MAX
            )));
        }

        Ok(())
    }

    fn invalid(&self, reason: impl Into<String>) -> CodecError {
        CodecError::InvalidMapping {
            identifier: self.identifier.clone(),
            reason: reason.into(),
        }
    }
}
