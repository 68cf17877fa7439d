//! Error types for the client

use relayexec_transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Main error type for client operations
#[derive(Debug, Error)]
pub enum ClientError {
    /// Could not reach or talk to the relay
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// No response arrived in time
    #[error("Timeout: no response received within {} seconds", .duration.as_secs_f32())]
    Timeout {
        /// Duration that was exceeded
        duration: Duration,
    },

    /// The relay answered a submission with an `error` envelope
    #[error("Command failed: {0}")]
    Relay(String),

    /// The relay connection ended before a response arrived
    #[error("Connection to relay closed")]
    ConnectionClosed,
}

impl ClientError {
    /// Whether the session is unusable after this error
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::ConnectionClosed)
    }
}
