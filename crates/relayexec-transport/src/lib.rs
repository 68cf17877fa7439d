//! # Relayexec Transport
//!
//! WebSocket transport layer for relayexec: connecting to a relay and moving
//! [`Envelope`](relayexec_proto::Envelope)s over the resulting socket.

#![warn(missing_docs)]

/// Transport abstraction and the WebSocket implementation
pub mod transport;

/// Split connection halves
pub mod connection;

/// Transport-specific error types
pub mod error;

pub use connection::{Connection, EnvelopeReceiver, EnvelopeSender};
pub use error::TransportError;
pub use transport::{RelayEndpoint, Transport, WsTransport, DEFAULT_RELAY_PORT};
