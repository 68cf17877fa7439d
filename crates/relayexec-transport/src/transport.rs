//! Transport abstraction and implementations

use crate::{Connection, TransportError};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tracing::{debug, info};

/// Port the relay listens on unless told otherwise
pub const DEFAULT_RELAY_PORT: u16 = 8888;

/// Transport abstraction for reaching a relay
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new connection to the relay
    async fn connect(&self) -> Result<Connection, TransportError>;

    /// Relay this transport connects to
    fn endpoint(&self) -> &RelayEndpoint;
}

/// Address of a relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEndpoint {
    /// Relay hostname or IP
    pub host: String,
    /// Relay port
    pub port: u16,
}

impl RelayEndpoint {
    /// Create an endpoint from its parts
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host`, `host:port` or `ws://host:port`
    pub fn parse(target: &str) -> Result<Self, TransportError> {
        let target = target.trim();
        let target = target.strip_prefix("ws://").unwrap_or(target);
        let target = target.trim_end_matches('/');

        if target.is_empty() {
            return Err(TransportError::InvalidEndpoint("empty host".to_string()));
        }

        // Bracketed IPv6, optionally with a port
        if let Some(rest) = target.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| TransportError::InvalidEndpoint(target.to_string()))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => Self::parse_port(port)?,
                None if tail.is_empty() => DEFAULT_RELAY_PORT,
                None => return Err(TransportError::InvalidEndpoint(target.to_string())),
            };
            return Ok(Self::new(host, port));
        }

        match target.split_once(':') {
            Some((host, port)) if !port.contains(':') => {
                if host.is_empty() {
                    return Err(TransportError::InvalidEndpoint(target.to_string()));
                }
                Ok(Self::new(host, Self::parse_port(port)?))
            }
            // Bare IPv6 address
            Some(_) => Ok(Self::new(target, DEFAULT_RELAY_PORT)),
            None => Ok(Self::new(target, DEFAULT_RELAY_PORT)),
        }
    }

    fn parse_port(port: &str) -> Result<u16, TransportError> {
        port.parse::<u16>()
            .map_err(|_| TransportError::InvalidEndpoint(format!("invalid port: {}", port)))
    }

    /// WebSocket URL for this endpoint
    pub fn url(&self) -> String {
        format!("ws://{}", self)
    }
}

impl fmt::Display for RelayEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Plain `ws://` transport
#[derive(Debug, Clone)]
pub struct WsTransport {
    /// Relay address
    endpoint: RelayEndpoint,
    /// Upper bound on the TCP + WebSocket handshake
    connect_timeout: Duration,
}

impl WsTransport {
    /// Create a new WebSocket transport
    pub fn new(endpoint: RelayEndpoint) -> Self {
        Self {
            endpoint,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Set the connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self) -> Result<Connection, TransportError> {
        let url = self.endpoint.url();
        debug!("Opening WebSocket connection to {}", url);

        let (ws, _response) = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        info!("Connected to relay at {}", url);
        Ok(Connection::from_stream(ws))
    }

    fn endpoint(&self) -> &RelayEndpoint {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayexec_proto::Envelope;
    use tokio::net::TcpListener;

    #[test]
    fn test_endpoint_parse() {
        let test_cases = vec![
            ("relay.example.com", ("relay.example.com", DEFAULT_RELAY_PORT)),
            ("relay.example.com:9000", ("relay.example.com", 9000)),
            ("ws://10.0.0.5:3000", ("10.0.0.5", 3000)),
            ("ws://10.0.0.5:3000/", ("10.0.0.5", 3000)),
            ("[::1]:7000", ("::1", 7000)),
            ("[::1]", ("::1", DEFAULT_RELAY_PORT)),
            ("::1", ("::1", DEFAULT_RELAY_PORT)),
        ];

        for (target, (host, port)) in test_cases {
            let endpoint = RelayEndpoint::parse(target).unwrap();
            assert_eq!((endpoint.host.as_str(), endpoint.port), (host, port), "Failed for target: {}", target);
        }
    }

    #[test]
    fn test_endpoint_parse_rejects_garbage() {
        assert!(RelayEndpoint::parse("").is_err());
        assert!(RelayEndpoint::parse("host:notaport").is_err());
        assert!(RelayEndpoint::parse(":8888").is_err());
        assert!(RelayEndpoint::parse("host:70000").is_err());
    }

    #[test]
    fn test_endpoint_url() {
        assert_eq!(RelayEndpoint::new("relay", 8888).url(), "ws://relay:8888");
        assert_eq!(RelayEndpoint::new("::1", 8888).url(), "ws://[::1]:8888");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Grab a free port, then release it so nothing is listening
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = WsTransport::new(RelayEndpoint::new("127.0.0.1", port))
            .with_connect_timeout(Duration::from_secs(2));
        let result = transport.connect().await;

        assert!(matches!(result, Err(TransportError::Connection(_)) | Err(TransportError::Timeout)));
    }

    #[tokio::test]
    async fn test_connect_and_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut conn = Connection::from_stream(ws);
            conn.sender().send(Envelope::Welcome { message: None }).await.unwrap();
            conn.recv().await
        });

        let transport = WsTransport::new(RelayEndpoint::new("127.0.0.1", port));
        let mut conn = transport.connect().await.unwrap();

        let welcome = conn.recv().await.unwrap().unwrap();
        assert_eq!(welcome, Envelope::Welcome { message: None });

        conn.sender().send(Envelope::agent_register("a1")).await.unwrap();
        let received = server.await.unwrap().unwrap().unwrap();
        assert_eq!(received, Envelope::agent_register("a1"));
    }
}
