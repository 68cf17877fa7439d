//! Agent configuration

use crate::executor::DEFAULT_COMMAND_TIMEOUT;
use relayexec_transport::RelayEndpoint;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Relay to register with
    pub endpoint: RelayEndpoint,
    /// Identity announced to the relay
    pub agent_id: String,
    /// Fixed pause between connection attempts
    pub reconnect_delay: Duration,
    /// Period of liveness pings while active
    pub ping_interval: Duration,
    /// Wall-clock limit for a single command
    pub command_timeout: Duration,
    /// Limit on establishing a connection
    pub connect_timeout: Duration,
    /// Initial working directory (defaults to the process directory)
    pub working_dir: Option<PathBuf>,
}

impl AgentConfig {
    /// Configuration with defaults and a freshly generated identity
    pub fn new(endpoint: RelayEndpoint) -> Self {
        Self {
            endpoint,
            agent_id: generate_agent_id(),
            reconnect_delay: Duration::from_secs(5),
            ping_interval: Duration::from_secs(30),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            connect_timeout: Duration::from_secs(10),
            working_dir: None,
        }
    }

    /// Use an operator-supplied identity
    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    /// Set the reconnect delay
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the ping interval
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the command timeout
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Start in `dir` instead of the process directory
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Short random identity: the first eight hex digits of a v4 UUID
pub fn generate_agent_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}
