//! Envelope types

use serde::{Deserialize, Serialize};

/// A single message exchanged over a relay connection.
///
/// The wire form is a JSON object whose `type` field selects the variant.
/// Unknown `type` values decode to [`Envelope::Unknown`] so that a newer relay
/// cannot break an older peer's read loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Greeting sent by the relay when a connection is accepted
    Welcome {
        /// Free-form greeting text
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Agent identity registration
    AgentRegister {
        /// Identity the agent answers to
        agent_id: String,
    },

    /// Client registration
    ClientRegister {
        /// Transient client identity
        client_id: String,
    },

    /// Registration acknowledgement from the relay
    RegisterAck {
        /// `success` when the relay accepted the registration
        status: String,
        /// Agents connected at registration time (clients only)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        available_agents: Option<Vec<String>>,
        /// Echo of the registered agent id
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        /// Echo of the registered client id
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Broadcast of the currently connected agents
    AgentListUpdate {
        /// Connected agent identifiers
        #[serde(default)]
        agents: Vec<String>,
    },

    /// Command addressed to an agent
    Command(CommandRequest),

    /// Result of a command, sent back by the agent
    CommandResponse(CommandResponse),

    /// Error reported by the relay
    Error {
        /// Human-readable error message
        message: String,
    },

    /// Liveness probe
    Ping,

    /// Liveness reply
    Pong,

    /// Any `type` this build does not know about
    #[serde(other)]
    Unknown,
}

impl Envelope {
    /// Wire name of this envelope's `type`
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::AgentRegister { .. } => "agent_register",
            Self::ClientRegister { .. } => "client_register",
            Self::RegisterAck { .. } => "register_ack",
            Self::AgentListUpdate { .. } => "agent_list_update",
            Self::Command(_) => "command",
            Self::CommandResponse(_) => "command_response",
            Self::Error { .. } => "error",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Unknown => "unknown",
        }
    }

    /// Command identifier carried by `command` and `command_response`
    pub fn command_id(&self) -> Option<&str> {
        match self {
            Self::Command(req) => req.command_id.as_deref(),
            Self::CommandResponse(resp) => resp.command_id.as_deref(),
            _ => None,
        }
    }

    /// Create an agent registration
    pub fn agent_register(agent_id: impl Into<String>) -> Self {
        Self::AgentRegister {
            agent_id: agent_id.into(),
        }
    }

    /// Create a client registration
    pub fn client_register(client_id: impl Into<String>) -> Self {
        Self::ClientRegister {
            client_id: client_id.into(),
        }
    }

    /// Create a relay error
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Whether this is a successful `register_ack`
    pub fn is_register_success(&self) -> bool {
        matches!(self, Self::RegisterAck { status, .. } if status == "success")
    }
}

/// Body of a `command` envelope.
///
/// The relay strips `agent_id` when forwarding to the agent and fills in
/// `command_id` if the client left it out, so both are optional on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Target agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Raw command line
    pub command: String,
    /// Request identifier for correlation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<String>,
    /// Time the relay forwarded the command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl CommandRequest {
    /// Create a command addressed to `agent_id`
    pub fn new(
        agent_id: impl Into<String>,
        command: impl Into<String>,
        command_id: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            command: command.into(),
            command_id: Some(command_id.into()),
            timestamp: None,
        }
    }
}

/// Body of a `command_response` envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Identifier of the command this answers, echoed verbatim
    #[serde(default)]
    pub command_id: Option<String>,
    /// Agent that ran the command
    #[serde(default)]
    pub agent_id: String,
    /// The command text as received
    #[serde(default)]
    pub command: String,
    /// Textual result of execution
    #[serde(default)]
    pub result: String,
    /// Agent working directory after execution
    #[serde(default)]
    pub current_dir: String,
    /// Local time the response was produced
    #[serde(default)]
    pub timestamp: String,
}

impl CommandResponse {
    /// Create a response stamped with the current local time
    pub fn new(
        command_id: Option<String>,
        agent_id: impl Into<String>,
        command: impl Into<String>,
        result: impl Into<String>,
        current_dir: impl Into<String>,
    ) -> Self {
        Self {
            command_id,
            agent_id: agent_id.into(),
            command: command.into(),
            result: result.into(),
            current_dir: current_dir.into(),
            timestamp: timestamp_now(),
        }
    }
}

/// Current local time as an ISO-8601 string without offset
pub fn timestamp_now() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}
