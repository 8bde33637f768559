//! Error types for gateway operations
//!
//! Errors surface from transport setup, the controller line codec, the mesh
//! frame codec and configuration loading. The gateway's polling operations
//! never return them: a failing message is logged and dropped.

use thiserror::Error;

use crate::message::NodeId;

/// Main error type for gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    // ===== Transport Errors =====
    /// Serial port not found
    #[error("Serial port not found: {0}")]
    PortNotFound(String),

    /// Serial port open failed
    #[error("Failed to open serial port {port}: {reason}")]
    PortOpenFailed {
        /// Port path
        port: String,
        /// Failure reason
        reason: String,
    },

    /// Socket bind failed
    #[error("Failed to bind {addr}: {reason}")]
    BindFailed {
        /// Address that could not be bound
        addr: String,
        /// Failure reason
        reason: String,
    },

    /// Transport used before `begin()`
    #[error("Transport {0} has not been started")]
    NotStarted(String),

    /// Peer side of a link went away
    #[error("Link disconnected")]
    Disconnected,

    // ===== Protocol Errors =====
    /// Controller line could not be parsed
    #[error("Invalid controller line: {0}")]
    InvalidLine(String),

    /// Mesh frame could not be decoded
    #[error("Invalid mesh frame: {0}")]
    InvalidFrame(String),

    /// Command byte outside the known range
    #[error("Unknown command: {0}")]
    UnknownCommand(u8),

    /// Payload exceeds the radio limit
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge {
        /// Actual payload size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// No route to a mesh node
    #[error("No route to node {0}")]
    NoRoute(NodeId),

    // ===== Configuration Errors =====
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid pre-shared signing key
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    // ===== General Errors =====
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Check if this error is recoverable/retriable
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            GatewayError::Disconnected | GatewayError::NoRoute(_) | GatewayError::Io(_)
        )
    }

    /// Check if this is a protocol error (bad data from a peer)
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            GatewayError::InvalidLine(_)
                | GatewayError::InvalidFrame(_)
                | GatewayError::UnknownCommand(_)
                | GatewayError::PayloadTooLarge { .. }
        )
    }

    /// Get an error code for logging/metrics
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::PortNotFound(_) => "PORT_NOT_FOUND",
            GatewayError::PortOpenFailed { .. } => "PORT_OPEN_FAILED",
            GatewayError::BindFailed { .. } => "BIND_FAILED",
            GatewayError::NotStarted(_) => "NOT_STARTED",
            GatewayError::Disconnected => "DISCONNECTED",
            GatewayError::InvalidLine(_) => "INVALID_LINE",
            GatewayError::InvalidFrame(_) => "INVALID_FRAME",
            GatewayError::UnknownCommand(_) => "UNKNOWN_COMMAND",
            GatewayError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            GatewayError::NoRoute(_) => "NO_ROUTE",
            GatewayError::InvalidConfig(_) => "INVALID_CONFIG",
            GatewayError::InvalidKey(_) => "INVALID_KEY",
            GatewayError::Serialization(_) => "SERIALIZATION",
            GatewayError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

impl From<serde_cbor::Error> for GatewayError {
    fn from(err: serde_cbor::Error) -> Self {
        GatewayError::InvalidFrame(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization(err.to_string())
    }
}

// Conversion from serialport error (only when serial feature is enabled)
#[cfg(feature = "serial")]
impl From<serialport::Error> for GatewayError {
    fn from(err: serialport::Error) -> Self {
        match err.kind {
            serialport::ErrorKind::NoDevice => GatewayError::PortNotFound(err.description),
            serialport::ErrorKind::Io(kind) => {
                GatewayError::Io(std::io::Error::new(kind, err.description))
            }
            _ => GatewayError::PortOpenFailed {
                port: String::new(),
                reason: err.description,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = GatewayError::PortNotFound("/dev/ttyUSB0".to_string());
        assert_eq!(err.error_code(), "PORT_NOT_FOUND");
        assert_eq!(GatewayError::NoRoute(7).error_code(), "NO_ROUTE");
    }

    #[test]
    fn test_is_retriable() {
        assert!(GatewayError::Disconnected.is_retriable());
        assert!(GatewayError::NoRoute(3).is_retriable());
        assert!(!GatewayError::InvalidLine("x".to_string()).is_retriable());
    }

    #[test]
    fn test_is_protocol_error() {
        assert!(GatewayError::UnknownCommand(9).is_protocol_error());
        assert!(GatewayError::InvalidFrame("eof".to_string()).is_protocol_error());
        assert!(!GatewayError::Disconnected.is_protocol_error());
    }

    #[test]
    fn test_payload_too_large_message() {
        let err = GatewayError::PayloadTooLarge { size: 40, max: 25 };
        assert!(err.to_string().contains("40"));
        assert!(err.to_string().contains("25"));
    }
}
