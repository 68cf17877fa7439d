//! Agent connection lifecycle and envelope dispatch

use crate::config::AgentConfig;
use crate::executor::Executor;
use anyhow::{Context, Result};
use relayexec_proto::{CommandRequest, CommandResponse, Envelope};
use relayexec_transport::{Connection, EnvelopeSender, Transport, WsTransport};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Where the agent is in its connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// No connection; waiting to retry
    Disconnected,
    /// Opening a connection to the relay
    Connecting,
    /// Connected, announcing identity
    Registering,
    /// Serving commands
    Active,
    /// Operator asked to stop
    ShuttingDown,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Registering => "registering",
            Self::Active => "active",
            Self::ShuttingDown => "shutting down",
        };
        f.write_str(name)
    }
}

/// A relay-connected command agent.
///
/// Connection state lives only inside [`Agent::run`]; the identity and the
/// executor's working directory belong to the agent and survive reconnects.
pub struct Agent<T: Transport> {
    /// How to reach the relay
    transport: T,
    /// Identity announced on every connection
    agent_id: String,
    /// Working-directory state and command runner
    executor: Executor,
    /// Pause between connection attempts
    reconnect_delay: Duration,
    /// Liveness ping period
    ping_interval: Duration,
    /// Current lifecycle state
    state: AgentState,
    /// Operator stop signal
    shutdown: CancellationToken,
}

impl Agent<WsTransport> {
    /// Create an agent connecting over WebSocket
    pub fn new(config: AgentConfig) -> Result<Self> {
        let transport = WsTransport::new(config.endpoint.clone())
            .with_connect_timeout(config.connect_timeout);
        Self::with_transport(transport, config)
    }
}

impl<T: Transport> Agent<T> {
    /// Create an agent over a custom transport
    pub fn with_transport(transport: T, config: AgentConfig) -> Result<Self> {
        let working_dir = match config.working_dir {
            Some(dir) => dir,
            None => std::env::current_dir().context("Failed to read current directory")?,
        };

        Ok(Self {
            transport,
            agent_id: config.agent_id,
            executor: Executor::new(working_dir).with_timeout(config.command_timeout),
            reconnect_delay: config.reconnect_delay,
            ping_interval: config.ping_interval,
            state: AgentState::Disconnected,
            shutdown: CancellationToken::new(),
        })
    }

    /// Token that stops the agent when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Identity this agent registers with
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Current lifecycle state
    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Current working-directory state
    pub fn current_dir(&self) -> &Path {
        self.executor.current_dir()
    }

    fn set_state(&mut self, state: AgentState) {
        if self.state != state {
            info!("State {} -> {}", self.state, state);
            self.state = state;
        }
    }

    /// Run until the shutdown token is cancelled.
    ///
    /// Connection failures never end this loop; it waits the reconnect delay
    /// and tries again.
    pub async fn run(&mut self) -> Result<()> {
        let span = info_span!("agent", id = %self.agent_id);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&mut self) -> Result<()> {
        info!("Agent starting");
        info!("Current directory: {}", self.executor.current_dir().display());
        let shutdown = self.shutdown.clone();

        while !shutdown.is_cancelled() {
            self.set_state(AgentState::Connecting);
            info!("Connecting to relay server at {}", self.transport.endpoint().url());

            let connected = tokio::select! {
                _ = shutdown.cancelled() => break,
                connected = self.transport.connect() => connected,
            };

            match connected {
                Ok(connection) => {
                    if let Err(e) = self.run_connection(connection).await {
                        error!("Connection error: {:#}", e);
                    }
                }
                Err(e) => error!("Failed to connect: {}", e),
            }

            self.set_state(AgentState::Disconnected);
            if shutdown.is_cancelled() {
                break;
            }

            info!("Reconnecting in {:?}", self.reconnect_delay);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        self.set_state(AgentState::ShuttingDown);
        info!("Agent stopped");
        Ok(())
    }

    /// Register on a fresh connection and serve it until it ends
    async fn run_connection(&mut self, mut connection: Connection) -> Result<()> {
        let sender = connection.sender();

        self.set_state(AgentState::Registering);
        sender
            .send(Envelope::agent_register(self.agent_id.as_str()))
            .await
            .context("Failed to send registration")?;
        self.set_state(AgentState::Active);

        let ping = tokio::spawn(
            ping_loop(sender.clone(), self.ping_interval, self.shutdown.clone())
                .in_current_span(),
        );

        let result = self.read_loop(&mut connection, &sender).await;

        ping.abort();
        let _ = ping.await;
        drop(sender);
        connection.close().await;

        result
    }

    /// Dispatch envelopes in arrival order until the connection ends.
    ///
    /// Shutdown is only observed between envelopes, so a running command
    /// always finishes and gets its response.
    async fn read_loop(&mut self, connection: &mut Connection, sender: &EnvelopeSender) -> Result<()> {
        let shutdown = self.shutdown.clone();

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, leaving read loop");
                    return Ok(());
                }
                next = connection.recv() => next,
            };

            match next {
                None => {
                    info!("Connection closed by server");
                    return Ok(());
                }
                Some(Err(e)) if !e.is_fatal() => {
                    warn!("Skipping undecodable message: {}", e);
                }
                Some(Err(e)) => return Err(e).context("Connection lost"),
                Some(Ok(envelope)) => {
                    if let Err(e) = self.handle_envelope(envelope, sender).await {
                        error!("Error handling message: {:#}", e);
                    }
                }
            }
        }
    }

    /// Handle one envelope from the relay.
    ///
    /// Returns the response sent when the envelope was a command.
    pub async fn handle_envelope(
        &mut self,
        envelope: Envelope,
        sender: &EnvelopeSender,
    ) -> Result<Option<CommandResponse>> {
        let kind = envelope.kind();
        debug!("Received {} envelope", kind);

        match envelope {
            Envelope::Welcome { .. } => info!("Connected to relay server"),
            Envelope::RegisterAck { status, .. } => {
                if status == "success" {
                    info!("Successfully registered with relay server");
                } else {
                    warn!("Failed to register with relay server: status={}", status);
                }
            }
            Envelope::Command(request) => {
                let response = self.execute(request).await;
                sender
                    .send(Envelope::CommandResponse(response.clone()))
                    .await
                    .context("Failed to send command response")?;
                debug!("Response sent for command {:?}", response.command_id);
                return Ok(Some(response));
            }
            Envelope::Error { message } => warn!("Error from server: {}", message),
            // Not answered; the relay rejects `pong` with an error envelope
            Envelope::Ping | Envelope::Pong => {}
            Envelope::AgentRegister { .. }
            | Envelope::ClientRegister { .. }
            | Envelope::AgentListUpdate { .. }
            | Envelope::CommandResponse(_)
            | Envelope::Unknown => debug!("Ignoring {} envelope", kind),
        }

        Ok(None)
    }

    /// Run a command and build its response; never fails
    async fn execute(&mut self, request: CommandRequest) -> CommandResponse {
        info!("Received command: {} (ID: {:?})", request.command, request.command_id);

        let result = self.executor.execute(&request.command).await;
        info!("Command execution completed. Result length: {}", result.len());

        CommandResponse::new(
            request.command_id,
            self.agent_id.as_str(),
            request.command,
            result,
            self.executor.current_dir().display().to_string(),
        )
    }
}

/// Send a ping every `interval` while the connection is live
async fn ping_loop(sender: EnvelopeSender, interval: Duration, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        if sender.is_closed() {
            return;
        }
        if sender.send(Envelope::Ping).await.is_err() {
            return;
        }
        debug!("Sent ping");
    }
}
