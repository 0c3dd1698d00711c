//! Pure decode/encode engine
//!
//! Transforms one raw frame window plus one mapping into a typed engineering
//! value, and the inverse for writes. Scaling runs in decimal arithmetic so
//! repeated scale/offset round-trips do not accumulate binary float drift.
//!
//! Register widths are engine-defined per function code: coil opcodes carry
//! one bit per address, word opcodes carry 16-bit registers, and `float`
//! values span two registers reassembled per the mapping's byte order.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{CodecError, Result};
use crate::frame::RawFrame;
use crate::mapping::{DataType, RegisterMapping};
use crate::point::EngValue;

/// Encoded result of a write transform, ready for the transport layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedWrite {
    /// Single coil value (bit-addressed write opcodes)
    Coil(bool),
    /// Register words in wire order (word-addressed write opcodes)
    Registers(Vec<u16>),
}

impl EncodedWrite {
    /// Register view, `None` for coil writes
    pub fn registers(&self) -> Option<&[u16]> {
        match self {
            Self::Registers(words) => Some(words),
            Self::Coil(_) => None,
        }
    }

    /// Coil view, `None` for register writes
    pub fn coil(&self) -> Option<bool> {
        match self {
            Self::Coil(b) => Some(*b),
            Self::Registers(_) => None,
        }
    }
}

/// Decode one mapping out of a raw frame window
///
/// A failure here is local to this mapping: callers decode the remaining
/// mappings of the cycle regardless.
pub fn decode(frame: &RawFrame, mapping: &RegisterMapping) -> Result<EngValue> {
    if mapping.function_code.is_bit_addressed() {
        return decode_coil(frame, mapping);
    }

    if !matches!(frame, RawFrame::Registers { .. }) {
        return Err(CodecError::FrameMismatch {
            function_code: mapping.function_code.as_u8(),
        });
    }

    let needed = mapping.register_count();
    if !frame.covers(mapping.register_address, needed) {
        return Err(insufficient(frame, mapping, needed));
    }

    match mapping.data_type {
        DataType::Bool => {
            let word = word_at(frame, mapping, mapping.register_address)?;
            match mapping.bit_index {
                Some(bit_index) if bit_index > 15 => Err(CodecError::BitIndexOutOfRange {
                    bit_index,
                    max: 15,
                }),
                Some(bit_index) => Ok(EngValue::Bool((word >> bit_index) & 1 == 1)),
                None => Ok(EngValue::Bool(word != 0)),
            }
        },
        DataType::Int => {
            let raw = word_at(frame, mapping, mapping.register_address)? as i16 as i64;
            if is_trivial_scaling(mapping) {
                Ok(EngValue::Int(raw))
            } else {
                Ok(EngValue::Decimal(apply_scaling(Decimal::from(raw), mapping)))
            }
        },
        DataType::Float => {
            let low_address = mapping
                .register_address
                .checked_add(1)
                .ok_or_else(|| insufficient(frame, mapping, 2))?;
            let high = word_at(frame, mapping, mapping.register_address)?;
            let low = word_at(frame, mapping, low_address)?;
            let bits = mapping.byte_order.assemble_u32([high, low]);
            let value = f32::from_bits(bits);
            if !value.is_finite() {
                return Err(CodecError::NonFiniteFloat(mapping.register_address));
            }
            let raw = Decimal::from_f32(value)
                .ok_or(CodecError::NonFiniteFloat(mapping.register_address))?;
            Ok(EngValue::Decimal(apply_scaling(raw, mapping)))
        },
    }
}

/// Encode an engineering value for a write mapping
///
/// Inverse transform of `decode`: subtract offset, divide by scale factor,
/// truncate/round per data type, re-pack per byte order.
pub fn encode(value: &EngValue, mapping: &RegisterMapping) -> Result<EncodedWrite> {
    if mapping.function_code.is_read() {
        return Err(CodecError::ReadOnlyMapping {
            identifier: mapping.identifier.clone(),
            function_code: mapping.function_code.as_u8(),
        });
    }

    match mapping.data_type {
        DataType::Bool => {
            let EngValue::Bool(b) = value else {
                return Err(type_mismatch(mapping, value));
            };
            if mapping.function_code.is_bit_addressed() {
                Ok(EncodedWrite::Coil(*b))
            } else if mapping.bit_index.is_some() {
                // A packed bit inside a shared register needs read-modify-write,
                // which only the transport layer can do.
                Err(CodecError::InvalidMapping {
                    identifier: mapping.identifier.clone(),
                    reason: "packed bool cannot be written as a standalone register".into(),
                })
            } else {
                Ok(EncodedWrite::Registers(vec![u16::from(*b)]))
            }
        },
        DataType::Int => {
            let numeric = value.as_decimal().ok_or_else(|| type_mismatch(mapping, value))?;
            let descaled = remove_scaling(numeric, mapping)?;
            let rounded =
                descaled.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
            let raw = rounded
                .to_i64()
                .filter(|i| (i16::MIN as i64..=i16::MAX as i64).contains(i))
                .ok_or_else(|| out_of_range(mapping, value))?;
            Ok(EncodedWrite::Registers(vec![raw as i16 as u16]))
        },
        DataType::Float => {
            let numeric = value.as_decimal().ok_or_else(|| type_mismatch(mapping, value))?;
            let descaled = remove_scaling(numeric, mapping)?;
            let raw = descaled
                .to_f32()
                .filter(|f| f.is_finite())
                .ok_or_else(|| out_of_range(mapping, value))?;
            let words = mapping.byte_order.split_u32(raw.to_bits());
            Ok(EncodedWrite::Registers(words.to_vec()))
        },
    }
}

fn decode_coil(frame: &RawFrame, mapping: &RegisterMapping) -> Result<EngValue> {
    match frame {
        RawFrame::Coils { .. } => frame
            .coil_at(mapping.register_address)
            .map(EngValue::Bool)
            .ok_or_else(|| insufficient(frame, mapping, 1)),
        RawFrame::Registers { .. } => Err(CodecError::FrameMismatch {
            function_code: mapping.function_code.as_u8(),
        }),
    }
}

fn word_at(frame: &RawFrame, mapping: &RegisterMapping, address: u16) -> Result<u16> {
    frame
        .register_at(address)
        .ok_or_else(|| insufficient(frame, mapping, mapping.register_count()))
}

fn is_trivial_scaling(mapping: &RegisterMapping) -> bool {
    mapping.scale_factor == Decimal::ONE && mapping.offset.is_zero()
}

fn apply_scaling(raw: Decimal, mapping: &RegisterMapping) -> Decimal {
    raw * mapping.scale_factor + mapping.offset
}

fn remove_scaling(value: Decimal, mapping: &RegisterMapping) -> Result<Decimal> {
    (value - mapping.offset)
        .checked_div(mapping.scale_factor)
        .ok_or_else(|| CodecError::InvalidMapping {
            identifier: mapping.identifier.clone(),
            reason: "scale factor must not be zero".into(),
        })
}

fn insufficient(frame: &RawFrame, mapping: &RegisterMapping, needed: u16) -> CodecError {
    CodecError::InsufficientData {
        address: mapping.register_address,
        needed,
        start: frame.start_address(),
        end: frame.end_address(),
    }
}

fn type_mismatch(mapping: &RegisterMapping, value: &EngValue) -> CodecError {
    CodecError::TypeMismatch {
        identifier: mapping.identifier.clone(),
        expected: mapping.data_type.as_str().to_string(),
        actual: value.type_name().to_string(),
    }
}

fn out_of_range(mapping: &RegisterMapping, value: &EngValue) -> CodecError {
    CodecError::ValueOutOfRange {
        value: value.to_string(),
        data_type: mapping.data_type.as_str().to_string(),
    }
}
