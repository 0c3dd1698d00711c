//! Pure register mapping and decode/encode engine for FieldGate
//!
//! This crate owns the data model shared by drivers and the runtime:
//! register mappings, byte order, raw frame windows, engineering values and
//! emitted data points. The codec itself is pure and stateless - no I/O,
//! no async, no clocks - so the same transformation can be exercised from
//! unit tests, drivers and the write path alike.

pub mod byte_order;
pub mod codec;
pub mod error;
pub mod frame;
pub mod mapping;
pub mod point;

pub use byte_order::ByteOrder;
pub use codec::{decode, encode, EncodedWrite};
pub use error::{CodecError, Result};
pub use frame::RawFrame;
pub use mapping::{DataType, FunctionCode, RegisterMapping};
pub use point::{DataPoint, EngValue};
