//! # Error Types
//!
//! Custom error types for the FlySky link engine using `thiserror`.

use thiserror::Error;

use crate::codec::FramingError;

/// Main error type for the link engine
#[derive(Debug, Error)]
pub enum LinkError {
    /// Frame could not be decoded (checksum, CRC, escape or length problem)
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Frame was valid but does not belong to the outstanding request
    #[error("uncorrelated frame: {0}")]
    Correlation(String),

    /// Payload exceeds what the wire format can carry
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Command queue has no free slot
    #[error("command queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// Request not available for the active protocol variant
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// No usable serial device among the candidates
    #[error("Serial port not found (tried: {0})")]
    SerialPortNotFound(String),

    /// Telemetry record serialization errors
    #[error("Telemetry encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the link engine
pub type Result<T> = std::result::Result<T, LinkError>;
