//! Session management and connection handling

use crate::router::DEFAULT_RESPONSE_TIMEOUT;
use crate::{Result, Router};
use relayexec_proto::Envelope;
use relayexec_transport::{EnvelopeReceiver, RelayEndpoint, Transport, WsTransport};
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// How long shutdown waits for the close frame to be flushed
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Session configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay to connect to
    pub endpoint: RelayEndpoint,
    /// Identity sent in `client_register`
    pub client_id: String,
    /// How long a submission waits for its response
    pub response_timeout: Duration,
    /// Pause after registering so the roster can arrive
    pub settle_delay: Duration,
    /// Limit on establishing the connection
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// Configuration with defaults and a freshly generated client id
    pub fn new(endpoint: RelayEndpoint) -> Self {
        let mut client_id = Uuid::new_v4().simple().to_string();
        client_id.truncate(8);

        Self {
            endpoint,
            client_id,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            settle_delay: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Set the response timeout
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the settle delay
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Agents the relay last reported as connected.
///
/// Advisory only; submissions may name agents that are not listed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    agents: Vec<String>,
}

impl Roster {
    /// Create a roster from the relay's list
    pub fn new(agents: Vec<String>) -> Self {
        Self { agents }
    }

    /// Connected agent identifiers
    pub fn agents(&self) -> &[String] {
        &self.agents
    }

    /// Whether the relay listed `agent_id`
    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.iter().any(|a| a == agent_id)
    }

    /// Whether no agents are connected
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl fmt::Display for Roster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.agents.is_empty() {
            f.write_str("No agents currently available")
        } else {
            write!(f, "Available agents: {}", self.agents.join(", "))
        }
    }
}

/// A registered client connection to a relay.
///
/// The client never reconnects. Once the relay goes away every pending
/// submission fails and [`Session::closed`] completes.
pub struct Session {
    /// Identity registered with the relay
    client_id: String,
    /// Relay address
    endpoint: RelayEndpoint,
    /// Submission path
    router: Router,
    /// Latest roster
    roster: watch::Receiver<Roster>,
    /// Cancelled when the connection ends
    closed: CancellationToken,
    /// Incoming envelope dispatcher
    reader: JoinHandle<()>,
    /// Outbound writer; sends the close frame once every sender is gone
    writer: JoinHandle<()>,
}

impl Session {
    /// Connect to the relay over WebSocket
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let transport = WsTransport::new(config.endpoint.clone())
            .with_connect_timeout(config.connect_timeout);
        Self::connect_with(&transport, config).await
    }

    /// Connect through a custom transport
    pub async fn connect_with<T: Transport>(transport: &T, config: ClientConfig) -> Result<Self> {
        info!("Connecting to relay server at {}", transport.endpoint().url());
        let connection = transport.connect().await?;
        let (sender, receiver, writer) = connection.into_parts();

        sender.send(Envelope::client_register(config.client_id.as_str())).await?;

        let router = Router::new(sender, config.response_timeout);
        let closed = router.closed_token();
        let (roster_tx, roster) = watch::channel(Roster::default());

        let span = info_span!("client", id = %config.client_id);
        let reader = tokio::spawn(
            read_loop(receiver, router.clone(), roster_tx).instrument(span),
        );

        tokio::time::sleep(config.settle_delay).await;

        Ok(Self {
            client_id: config.client_id,
            endpoint: config.endpoint,
            router,
            roster,
            closed,
            reader,
            writer,
        })
    }

    /// Identity registered with the relay
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Relay this session is connected to
    pub fn endpoint(&self) -> &RelayEndpoint {
        &self.endpoint
    }

    /// Submission path for this session
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Snapshot of the current roster
    pub fn roster(&self) -> Roster {
        self.roster.borrow().clone()
    }

    /// Receiver that observes every roster replacement
    pub fn roster_watch(&self) -> watch::Receiver<Roster> {
        self.roster.clone()
    }

    /// Whether the connection has ended
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Complete once the connection has ended
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Stop reading, fail pending submissions and close the connection.
    ///
    /// The close frame goes out once the last [`Router`] clone is dropped.
    /// Clones still held elsewhere keep the socket open, and shutdown stops
    /// waiting for it after a short grace period.
    pub async fn shutdown(self) {
        let Self {
            client_id,
            router,
            reader,
            writer,
            ..
        } = self;

        router.shutdown().await;
        if let Err(e) = reader.await {
            warn!("Session reader ended abnormally: {}", e);
        }

        drop(router);
        match tokio::time::timeout(CLOSE_TIMEOUT, writer).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Session writer ended abnormally: {}", e),
            Err(_) => warn!("Connection still in use, not waiting for it to close"),
        }
        debug!("Session {} shut down", client_id);
    }
}

/// Dispatch incoming envelopes until the connection or session ends
async fn read_loop(
    mut receiver: EnvelopeReceiver,
    router: Router,
    roster: watch::Sender<Roster>,
) {
    let closed = router.closed_token();

    loop {
        let next = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            next = receiver.recv() => next,
        };

        match next {
            None => {
                info!("Connection closed");
                break;
            }
            Some(Err(e)) if !e.is_fatal() => warn!("Error handling message: {}", e),
            Some(Err(e)) => {
                error!("Connection lost: {}", e);
                break;
            }
            Some(Ok(envelope)) => dispatch(envelope, &router, &roster).await,
        }
    }

    router.shutdown().await;
}

async fn dispatch(envelope: Envelope, router: &Router, roster: &watch::Sender<Roster>) {
    let kind = envelope.kind();
    debug!("Received {} envelope", kind);

    match envelope {
        Envelope::Welcome { .. } => info!("Connected to relay server"),
        Envelope::RegisterAck {
            status,
            available_agents,
            ..
        } => {
            if status != "success" {
                warn!("Registration rejected: status={}", status);
                return;
            }
            let update = Roster::new(available_agents.unwrap_or_default());
            info!("Registered with relay. {}", update);
            roster.send_replace(update);
        }
        Envelope::AgentListUpdate { agents } => {
            let update = Roster::new(agents);
            info!("Agent list updated. {}", update);
            roster.send_replace(update);
        }
        Envelope::CommandResponse(response) => {
            router.handle_response(response).await;
        }
        Envelope::Error { message } => {
            router.handle_error(&message).await;
        }
        // Not answered; the relay rejects `pong` with an error envelope
        Envelope::Ping | Envelope::Pong => {}
        Envelope::AgentRegister { .. }
        | Envelope::ClientRegister { .. }
        | Envelope::Command(_)
        | Envelope::Unknown => debug!("Ignoring {} envelope", kind),
    }
}
