//! Error handling for the Acquisition Service
//!
//! This module provides error type definitions and conversions for the
//! acquisition service. Configuration-class errors are rejected at write or
//! registration time; decode-class errors stay local to one mapping/cycle;
//! transport-class errors drive session state transitions.

use errors::FieldError;
use fieldgate_codec::CodecError;
use thiserror::Error;

/// Acquisition Service Error Type
#[derive(Error, Debug, Clone)]
pub enum AcqSrvError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Input/Output operation errors
    #[error("IO error: {0}")]
    IoError(String),

    /// Protocol communication errors (includes Modbus)
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Connection establishment and maintenance errors
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Decode/encode errors (local to one mapping and one cycle)
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Operation timeout errors
    #[error("Timeout error: {0}")]
    TimeoutError(String),

    /// Capability registry errors (duplicate type, unknown type, sealed)
    #[error("Registry error: {0}")]
    RegistryError(String),

    /// Mapping resolution and store errors
    #[error("Mapping error: {0}")]
    MappingError(String),

    /// Device errors (not found, misconfigured)
    #[error("Device error: {0}")]
    DeviceError(String),

    /// Session lifecycle errors
    #[error("Session error: {0}")]
    SessionError(String),

    /// Validation errors (invalid parameter, operation not supported)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias for the Acquisition Service
pub type Result<T> = std::result::Result<T, AcqSrvError>;

impl AcqSrvError {
    pub fn config(msg: impl Into<String>) -> Self {
        AcqSrvError::ConfigError(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        AcqSrvError::IoError(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        AcqSrvError::ProtocolError(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        AcqSrvError::ConnectionError(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        AcqSrvError::DecodeError(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        AcqSrvError::TimeoutError(msg.into())
    }

    pub fn registry(msg: impl Into<String>) -> Self {
        AcqSrvError::RegistryError(msg.into())
    }

    pub fn mapping(msg: impl Into<String>) -> Self {
        AcqSrvError::MappingError(msg.into())
    }

    pub fn device(msg: impl Into<String>) -> Self {
        AcqSrvError::DeviceError(msg.into())
    }

    pub fn session(msg: impl Into<String>) -> Self {
        AcqSrvError::SessionError(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AcqSrvError::ValidationError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AcqSrvError::InternalError(msg.into())
    }

    // Convenience constructors for specific cases
    pub fn device_not_found(id: impl std::fmt::Display) -> Self {
        AcqSrvError::DeviceError(format!("Device not found: {}", id))
    }

    pub fn session_not_found(id: impl std::fmt::Display) -> Self {
        AcqSrvError::SessionError(format!("Session not found: {}", id))
    }

    pub fn unknown_driver_type(driver_type: impl std::fmt::Display) -> Self {
        AcqSrvError::RegistryError(format!("Unknown driver type: {}", driver_type))
    }

    pub fn duplicate_driver_type(driver_type: impl std::fmt::Display) -> Self {
        AcqSrvError::RegistryError(format!("Driver type already registered: {}", driver_type))
    }

    pub fn not_connected() -> Self {
        AcqSrvError::ConnectionError("Not connected".to_string())
    }

    /// Whether this error class should trigger a reconnect attempt
    pub fn needs_reconnect(&self) -> bool {
        match self {
            AcqSrvError::IoError(msg) => {
                msg.contains("Broken pipe")
                    || msg.contains("Connection reset")
                    || msg.contains("Connection refused")
                    || msg.contains("Connection aborted")
                    || msg.contains("Network is unreachable")
            },
            AcqSrvError::ConnectionError(_) | AcqSrvError::TimeoutError(_) => true,
            _ => false,
        }
    }
}

// ============================================================================
// From implementations for external error types
// ============================================================================

impl From<std::io::Error> for AcqSrvError {
    fn from(err: std::io::Error) -> Self {
        AcqSrvError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for AcqSrvError {
    fn from(err: serde_json::Error) -> Self {
        AcqSrvError::ConfigError(format!("JSON: {err}"))
    }
}

impl From<serde_yaml::Error> for AcqSrvError {
    fn from(err: serde_yaml::Error) -> Self {
        AcqSrvError::ConfigError(format!("YAML: {err}"))
    }
}

impl From<figment::Error> for AcqSrvError {
    fn from(err: figment::Error) -> Self {
        AcqSrvError::ConfigError(format!("Figment: {err}"))
    }
}

impl From<CodecError> for AcqSrvError {
    fn from(err: CodecError) -> Self {
        if err.is_configuration() {
            AcqSrvError::MappingError(err.to_string())
        } else {
            AcqSrvError::DecodeError(err.to_string())
        }
    }
}

// ============================================================================
// Extension trait for adding context to errors
// ============================================================================

/// Extension trait for adding context to errors
pub trait ErrorExt<T> {
    fn config_error(self, msg: &str) -> Result<T>;
    fn io_error(self, msg: &str) -> Result<T>;
    fn protocol_error(self, msg: &str) -> Result<T>;
    fn connection_error(self, msg: &str) -> Result<T>;
    fn context(self, msg: &str) -> Result<T>;
}

impl<T, E> ErrorExt<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn config_error(self, msg: &str) -> Result<T> {
        self.map_err(|e| AcqSrvError::ConfigError(format!("{msg}: {e}")))
    }

    fn io_error(self, msg: &str) -> Result<T> {
        self.map_err(|e| AcqSrvError::IoError(format!("{msg}: {e}")))
    }

    fn protocol_error(self, msg: &str) -> Result<T> {
        self.map_err(|e| AcqSrvError::ProtocolError(format!("{msg}: {e}")))
    }

    fn connection_error(self, msg: &str) -> Result<T> {
        self.map_err(|e| AcqSrvError::ConnectionError(format!("{msg}: {e}")))
    }

    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| AcqSrvError::InternalError(format!("{msg}: {e}")))
    }
}

// ============================================================================
// Conversion to FieldError for process boundaries
// ============================================================================

impl From<AcqSrvError> for FieldError {
    fn from(err: AcqSrvError) -> Self {
        match err {
            AcqSrvError::ConfigError(msg) => FieldError::Configuration(msg),
            AcqSrvError::IoError(msg) => FieldError::Io(std::io::Error::other(msg)),
            AcqSrvError::ProtocolError(msg) => FieldError::Protocol {
                protocol: "acqsrv".to_string(),
                message: msg,
            },
            AcqSrvError::ConnectionError(msg) => FieldError::Communication(msg),
            AcqSrvError::DecodeError(msg) => FieldError::Decode(msg),
            AcqSrvError::TimeoutError(msg) => FieldError::Timeout(msg),
            AcqSrvError::RegistryError(msg) => {
                if msg.contains("already registered") {
                    FieldError::DuplicateDriverType(msg)
                } else if msg.contains("Unknown driver type") {
                    FieldError::UnknownDriverType(msg)
                } else {
                    FieldError::Runtime(msg)
                }
            },
            AcqSrvError::MappingError(msg) => {
                if msg.contains("Duplicate identifier") {
                    FieldError::DuplicateIdentifier(msg)
                } else {
                    FieldError::Validation(msg)
                }
            },
            AcqSrvError::DeviceError(msg) => FieldError::DeviceNotFound(msg),
            AcqSrvError::SessionError(msg) => FieldError::Runtime(msg),
            AcqSrvError::ValidationError(msg) => FieldError::Validation(msg),
            AcqSrvError::InternalError(msg) => FieldError::Internal(msg),
        }
    }
}

// ============================================================================
// AcqSrvError implements FieldErrorTrait
// ============================================================================

use errors::{ErrorCategory, FieldErrorTrait};

impl FieldErrorTrait for AcqSrvError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) => "ACQSRV_CONFIG_ERROR",
            Self::IoError(_) => "ACQSRV_IO_ERROR",
            Self::ProtocolError(_) => "ACQSRV_PROTOCOL_ERROR",
            Self::ConnectionError(_) => "ACQSRV_CONNECTION_ERROR",
            Self::DecodeError(_) => "ACQSRV_DECODE_ERROR",
            Self::TimeoutError(_) => "ACQSRV_TIMEOUT",
            Self::RegistryError(_) => "ACQSRV_REGISTRY_ERROR",
            Self::MappingError(_) => "ACQSRV_MAPPING_ERROR",
            Self::DeviceError(_) => "ACQSRV_DEVICE_ERROR",
            Self::SessionError(_) => "ACQSRV_SESSION_ERROR",
            Self::ValidationError(_) => "ACQSRV_VALIDATION_ERROR",
            Self::InternalError(_) => "ACQSRV_INTERNAL_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigError(_) => ErrorCategory::Configuration,
            Self::IoError(_) => ErrorCategory::Internal,
            Self::ProtocolError(_) => ErrorCategory::Protocol,
            Self::ConnectionError(_) => ErrorCategory::Connection,
            Self::DecodeError(_) => ErrorCategory::Decode,
            Self::TimeoutError(_) => ErrorCategory::Timeout,
            Self::RegistryError(_) => ErrorCategory::Registry,
            Self::MappingError(_) => ErrorCategory::Mapping,
            Self::DeviceError(_) => ErrorCategory::NotFound,
            Self::SessionError(_) => ErrorCategory::Runtime,
            Self::ValidationError(_) => ErrorCategory::Validation,
            Self::InternalError(_) => ErrorCategory::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_error_classification() {
        let decode_err: AcqSrvError = CodecError::NonFiniteFloat(10).into();
        assert!(matches!(decode_err, AcqSrvError::DecodeError(_)));

        let config_err: AcqSrvError = CodecError::InvalidMapping {
            identifier: "temp".into(),
            reason: "scale factor must not be zero".into(),
        }
        .into();
        assert!(matches!(config_err, AcqSrvError::MappingError(_)));
    }

    #[test]
    fn test_needs_reconnect() {
        assert!(AcqSrvError::timeout("read").needs_reconnect());
        assert!(AcqSrvError::not_connected().needs_reconnect());
        assert!(!AcqSrvError::decode("bad bit").needs_reconnect());
    }

    #[test]
    fn test_field_error_conversion() {
        let err: FieldError = AcqSrvError::unknown_driver_type("OPC_UA").into();
        assert!(matches!(err, FieldError::UnknownDriverType(_)));

        let err: FieldError = AcqSrvError::duplicate_driver_type("MODBUS_TCP").into();
        assert!(matches!(err, FieldError::DuplicateDriverType(_)));
    }
}
