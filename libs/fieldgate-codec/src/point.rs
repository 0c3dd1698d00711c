//! Engineering values and emitted data points

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::mapping::FunctionCode;

/// A decoded, scaled engineering value
///
/// Integer raws with trivial scaling stay `Int`; anything that went through
/// a non-trivial scale/offset carries the exact decimal result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EngValue {
    Bool(bool),
    Int(i64),
    Decimal(Decimal),
}

impl EngValue {
    /// Convert to f64 (booleans map to 0/1)
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            },
            Self::Int(i) => *i as f64,
            Self::Decimal(d) => d.to_f64().unwrap_or(f64::NAN),
        }
    }

    /// Convert to bool (non-zero numerics are true)
    pub fn as_bool(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Decimal(d) => !d.is_zero(),
        }
    }

    /// Numeric view as decimal; `None` for booleans
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Bool(_) => None,
            Self::Int(i) => Some(Decimal::from(*i)),
            Self::Decimal(d) => Some(*d),
        }
    }

    /// Short type name for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Decimal(_) => "decimal",
        }
    }
}

impl std::fmt::Display for EngValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Decimal(d) => write!(f, "{}", d),
        }
    }
}

impl From<bool> for EngValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for EngValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<Decimal> for EngValue {
    fn from(d: Decimal) -> Self {
        Self::Decimal(d)
    }
}

/// One normalized data-point event emitted by a driver session
///
/// `register_address` and `function_code` are provenance for audit and
/// debugging; consumers key on `(device_id, identifier)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPoint {
    pub device_id: String,
    pub identifier: String,
    pub value: EngValue,
    pub timestamp: DateTime<Utc>,
    pub register_address: u16,
    pub function_code: FunctionCode,
}

impl DataPoint {
    pub fn new(
        device_id: impl Into<String>,
        identifier: impl Into<String>,
        value: EngValue,
        register_address: u16,
        function_code: FunctionCode,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            identifier: identifier.into(),
            value,
            timestamp: Utc::now(),
            register_address,
            function_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_value_conversions() {
        assert_eq!(EngValue::Bool(true).as_f64(), 1.0);
        assert_eq!(EngValue::Int(42).as_f64(), 42.0);
        assert!(EngValue::Int(1).as_bool());
        assert!(!EngValue::Int(0).as_bool());
        assert_eq!(
            EngValue::Decimal(Decimal::from_str("25.0").unwrap()).as_decimal(),
            Some(Decimal::from_str("25.0").unwrap())
        );
        assert_eq!(EngValue::Bool(false).as_decimal(), None);
    }

    #[test]
    fn test_data_point_serialization() {
        let point = DataPoint::new(
            "device-1",
            "temperature",
            EngValue::Decimal(Decimal::from_str("25.5").unwrap()),
            100,
            FunctionCode::Read03,
        );
        let json = serde_json::to_value(&point).unwrap();
        assert_eq!(json["device_id"], "device-1");
        assert_eq!(json["identifier"], "temperature");
        assert_eq!(json["register_address"], 100);
        assert_eq!(json["function_code"], 3);
    }
}
