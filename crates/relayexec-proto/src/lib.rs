//! # Relayexec Protocol
//!
//! Envelope types and codec for the relayexec command-dispatch protocol.
//! Every message exchanged between agent, relay and client is one
//! [`Envelope`], carried as a single JSON object per transport message.

#![warn(missing_docs)]

/// Envelope types
pub mod message;

/// JSON codec for envelopes
pub mod codec;

/// Error types for protocol operations
pub mod error;

pub use codec::EnvelopeCodec;
pub use error::ProtocolError;
pub use message::{timestamp_now, CommandRequest, CommandResponse, Envelope};
