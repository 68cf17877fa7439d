//! # Relayexec
//!
//! Client side of a relay-based remote execution system.
//!
//! Agents behind NAT keep a WebSocket open to a reachable relay. A client
//! connects to the same relay, names an agent and submits a command line; the
//! relay forwards it, the agent runs it in its tracked working directory and
//! the response comes back the same way. [`Session`] owns the connection,
//! [`Router`] correlates each response with the submission that caused it.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use relayexec_proto as proto;

/// Error types for the client
pub mod error;

/// Session management and connection handling
pub mod session;

/// Request/response correlation
pub mod router;

/// Interactive and single-shot front ends
pub mod frontend;

pub use error::ClientError;
pub use frontend::{parse_input, render_response, run_interactive, run_single, InputAction, PROMPT};
pub use router::{PendingTable, Resolution, Router};
pub use session::{ClientConfig, Roster, Session};

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
