//! # Relayexec Agent
//!
//! Agent side of the relayexec protocol: registers an identity with a relay,
//! executes received commands against a persistent working directory and
//! answers each one with exactly one `command_response`.

#![warn(missing_docs)]

/// Connection lifecycle and envelope dispatch
pub mod agent;

/// Command execution and working-directory state
pub mod executor;

/// Agent configuration
pub mod config;

pub use agent::{Agent, AgentState};
pub use config::AgentConfig;
pub use executor::Executor;
