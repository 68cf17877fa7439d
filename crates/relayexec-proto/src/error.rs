//! Error types for protocol operations

use thiserror::Error;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Payload is not a valid envelope
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    /// Envelope too large
    #[error("Envelope too large: {size} bytes (max: {max})")]
    TooLarge {
        /// Actual envelope size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },
}
