//! Unified error handling for FieldGate services
//!
//! This module provides a comprehensive error system that all services can use,
//! eliminating the need for ad-hoc per-module error types at the process boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// FieldError - Main error type
// ============================================================================

/// Main error type for all FieldGate services
#[derive(Debug, Error)]
pub enum FieldError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    // ======================================
    // Capability Registry Errors
    // ======================================
    #[error("Driver type already registered: {0}")]
    DuplicateDriverType(String),

    #[error("Unknown driver type: {0}")]
    UnknownDriverType(String),

    #[error("Registry is sealed, registration rejected for: {0}")]
    RegistrySealed(String),

    // ======================================
    // Mapping Errors
    // ======================================
    #[error("Duplicate identifier in resolved mapping set: {0}")]
    DuplicateIdentifier(String),

    #[error("Invalid mapping: {identifier}: {reason}")]
    InvalidMapping { identifier: String, reason: String },

    #[error("Mapping not found: {device_id}/{identifier}")]
    MappingNotFound {
        device_id: String,
        identifier: String,
    },

    // ======================================
    // Decode & Encode Errors
    // ======================================
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Out of range: {value} not in [{min}, {max}]")]
    OutOfRange {
        value: String,
        min: String,
        max: String,
    },

    // ======================================
    // Protocol & Communication Errors
    // ======================================
    #[error("Protocol error: {protocol}: {message}")]
    Protocol { protocol: String, message: String },

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Timeout waiting for response from {0}")]
    Timeout(String),

    // ======================================
    // Session & Runtime Errors
    // ======================================
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already running: {0}")]
    SessionAlreadyRunning(String),

    #[error("Service startup failed: {0}")]
    StartupFailed(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // ======================================
    // Validation Errors
    // ======================================
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid parameter: {param}: {reason}")]
    InvalidParameter { param: String, reason: String },

    // ======================================
    // File & I/O Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // ======================================
    // Catch-all for other errors
    // ======================================
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using FieldError
pub type FieldResult<T> = Result<T, FieldError>;

impl FieldError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::Communication(_)
                | Self::ConnectionFailed { .. }
                | Self::Protocol { .. }
        )
    }

    /// Check if this error is a configuration-time rejection
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::InvalidConfig { .. }
                | Self::MissingConfig(_)
                | Self::DuplicateDriverType(_)
                | Self::RegistrySealed(_)
                | Self::DuplicateIdentifier(_)
                | Self::InvalidMapping { .. }
                | Self::Validation(_)
                | Self::InvalidParameter { .. }
        )
    }
}

// Conversion traits for common error types
impl From<serde_json::Error> for FieldError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for FieldError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Deserialization(err.to_string())
    }
}

impl From<std::num::ParseIntError> for FieldError {
    fn from(err: std::num::ParseIntError) -> Self {
        Self::Validation(format!("Invalid integer: {}", err))
    }
}

impl From<std::num::ParseFloatError> for FieldError {
    fn from(err: std::num::ParseFloatError) -> Self {
        Self::Validation(format!("Invalid float: {}", err))
    }
}

// ============================================================================
// ErrorCategory - classification for logging and observability
// ============================================================================

/// Broad error classification used for structured logging and metrics keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    Configuration,
    Registry,
    Mapping,
    Decode,
    Protocol,
    Connection,
    Timeout,
    NotFound,
    Validation,
    Runtime,
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Configuration => "configuration",
            Self::Registry => "registry",
            Self::Mapping => "mapping",
            Self::Decode => "decode",
            Self::Protocol => "protocol",
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::Runtime => "runtime",
            Self::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// FieldErrorTrait - uniform error metadata across service error types
// ============================================================================

/// Uniform metadata interface implemented by service-local error enums
pub trait FieldErrorTrait: std::error::Error {
    /// Stable machine-readable error code
    fn error_code(&self) -> &'static str;

    /// Broad classification for logging/observability
    fn category(&self) -> ErrorCategory;

    /// Whether retrying the failed operation can reasonably succeed
    fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Connection | ErrorCategory::Timeout | ErrorCategory::Protocol
        )
    }
}

impl FieldErrorTrait for FieldError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) | Self::InvalidConfig { .. } | Self::MissingConfig(_) => {
                "FIELD_CONFIG_ERROR"
            },
            Self::DuplicateDriverType(_) => "FIELD_DUPLICATE_DRIVER_TYPE",
            Self::UnknownDriverType(_) => "FIELD_UNKNOWN_DRIVER_TYPE",
            Self::RegistrySealed(_) => "FIELD_REGISTRY_SEALED",
            Self::DuplicateIdentifier(_) => "FIELD_DUPLICATE_IDENTIFIER",
            Self::InvalidMapping { .. } => "FIELD_INVALID_MAPPING",
            Self::MappingNotFound { .. } => "FIELD_MAPPING_NOT_FOUND",
            Self::Decode(_) => "FIELD_DECODE_ERROR",
            Self::Encode(_) => "FIELD_ENCODE_ERROR",
            Self::OutOfRange { .. } => "FIELD_OUT_OF_RANGE",
            Self::Protocol { .. } => "FIELD_PROTOCOL_ERROR",
            Self::Communication(_) => "FIELD_COMMUNICATION_ERROR",
            Self::ConnectionFailed { .. } => "FIELD_CONNECTION_FAILED",
            Self::Timeout(_) => "FIELD_TIMEOUT",
            Self::DeviceNotFound(_) => "FIELD_DEVICE_NOT_FOUND",
            Self::SessionNotFound(_) => "FIELD_SESSION_NOT_FOUND",
            Self::SessionAlreadyRunning(_) => "FIELD_SESSION_ALREADY_RUNNING",
            Self::StartupFailed(_) => "FIELD_STARTUP_FAILED",
            Self::ShutdownError(_) => "FIELD_SHUTDOWN_ERROR",
            Self::Runtime(_) => "FIELD_RUNTIME_ERROR",
            Self::Internal(_) => "FIELD_INTERNAL_ERROR",
            Self::Validation(_) | Self::InvalidParameter { .. } => "FIELD_VALIDATION_ERROR",
            Self::Io(_) => "FIELD_IO_ERROR",
            Self::Serialization(_) => "FIELD_SERIALIZATION_ERROR",
            Self::Deserialization(_) => "FIELD_DESERIALIZATION_ERROR",
            Self::Other(_) => "FIELD_UNKNOWN_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) | Self::InvalidConfig { .. } | Self::MissingConfig(_) => {
                ErrorCategory::Configuration
            },
            Self::DuplicateDriverType(_) | Self::UnknownDriverType(_) | Self::RegistrySealed(_) => {
                ErrorCategory::Registry
            },
            Self::DuplicateIdentifier(_)
            | Self::InvalidMapping { .. }
            | Self::MappingNotFound { .. } => ErrorCategory::Mapping,
            Self::Decode(_) | Self::Encode(_) | Self::OutOfRange { .. } => ErrorCategory::Decode,
            Self::Protocol { .. } => ErrorCategory::Protocol,
            Self::Communication(_) | Self::ConnectionFailed { .. } => ErrorCategory::Connection,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::DeviceNotFound(_) | Self::SessionNotFound(_) => ErrorCategory::NotFound,
            Self::Validation(_) | Self::InvalidParameter { .. } => ErrorCategory::Validation,
            Self::SessionAlreadyRunning(_)
            | Self::StartupFailed(_)
            | Self::ShutdownError(_)
            | Self::Runtime(_) => ErrorCategory::Runtime,
            Self::Internal(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Deserialization(_)
            | Self::Other(_) => ErrorCategory::Internal,
        }
    }
}

// ============================================================================
// Helper macros for creating errors
// ============================================================================

#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::FieldError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::FieldError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! validation_error {
    ($msg:expr) => {
        $crate::FieldError::Validation($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::FieldError::Validation(format!($fmt, $($arg)*))
    };
}
