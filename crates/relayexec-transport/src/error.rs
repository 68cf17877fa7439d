//! Transport-specific error types

use relayexec_proto::ProtocolError;
use thiserror::Error;

/// Transport-specific errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection could not be established
    #[error("Connection error: {0}")]
    Connection(String),

    /// Connection attempt timed out
    #[error("Operation timed out")]
    Timeout,

    /// Socket-level failure on an established connection
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// A single message could not be decoded
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] ProtocolError),

    /// The connection's writer has stopped
    #[error("Connection closed")]
    Closed,

    /// Relay address could not be parsed
    #[error("Invalid relay endpoint: {0}")]
    InvalidEndpoint(String),
}

impl TransportError {
    /// Whether the connection is unusable after this error.
    ///
    /// A malformed message only spoils that message; everything else ends
    /// the connection.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Malformed(_))
    }
}
