//! Relay connection split into a sending and a receiving half

use crate::TransportError;
use futures_util::stream::{BoxStream, SplitSink};
use futures_util::{SinkExt, StreamExt};
use relayexec_proto::{Envelope, EnvelopeCodec};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, warn};

/// Outbound queue depth per connection
const OUTBOUND_QUEUE: usize = 64;

/// Live connection to a relay.
///
/// All writes go through one writer task fed by a queue, so any number of
/// [`EnvelopeSender`] clones can send without interleaving partial messages.
pub struct Connection {
    /// Sending half
    sender: EnvelopeSender,
    /// Receiving half
    receiver: EnvelopeReceiver,
    /// Writer task draining the outbound queue
    writer: JoinHandle<()>,
}

impl Connection {
    /// Wrap an established WebSocket
    pub fn from_stream<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let codec = EnvelopeCodec::new();
        let (sink, stream) = ws.split();
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);

        let writer = tokio::spawn(write_loop(sink, rx, codec));

        Self {
            sender: EnvelopeSender { tx },
            receiver: EnvelopeReceiver {
                stream: stream.boxed(),
                codec,
            },
            writer,
        }
    }

    /// Get a sender handle for this connection
    pub fn sender(&self) -> EnvelopeSender {
        self.sender.clone()
    }

    /// Receive the next envelope, see [`EnvelopeReceiver::recv`]
    pub async fn recv(&mut self) -> Option<Result<Envelope, TransportError>> {
        self.receiver.recv().await
    }

    /// Split into independently owned halves plus the writer task.
    ///
    /// The writer keeps running until every sender clone is dropped, then
    /// closes the socket and finishes; await it to know the close frame went
    /// out.
    pub fn into_parts(self) -> (EnvelopeSender, EnvelopeReceiver, JoinHandle<()>) {
        (self.sender, self.receiver, self.writer)
    }

    /// Close the connection, flushing queued envelopes first.
    ///
    /// Waits for the writer only if no other sender clones are alive.
    pub async fn close(self) {
        let Self {
            sender,
            receiver,
            writer,
        } = self;
        drop(sender);
        drop(receiver);

        if let Err(e) = writer.await {
            warn!("Connection writer ended abnormally: {}", e);
        }
    }
}

/// Drain the outbound queue into the socket
async fn write_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut rx: mpsc::Receiver<Envelope>,
    codec: EnvelopeCodec,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    while let Some(envelope) = rx.recv().await {
        let text = match codec.encode(&envelope) {
            Ok(text) => text,
            Err(e) => {
                error!("Dropping {} envelope: {}", envelope.kind(), e);
                continue;
            }
        };

        if let Err(e) = sink.send(Message::Text(text)).await {
            error!("Failed to send {} envelope: {}", envelope.kind(), e);
            return;
        }
        debug!("Sent {} envelope", envelope.kind());
    }

    debug!("All senders dropped, closing socket");
    if let Err(e) = sink.close().await {
        debug!("Error closing socket: {}", e);
    }
}

/// Cloneable handle for sending envelopes over one connection
#[derive(Debug, Clone)]
pub struct EnvelopeSender {
    tx: mpsc::Sender<Envelope>,
}

impl EnvelopeSender {
    /// Create a sender not backed by a socket.
    ///
    /// Envelopes come out of the returned receiver in send order.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue an envelope for sending
    pub async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.tx
            .send(envelope)
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Whether the writer has stopped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of a connection
pub struct EnvelopeReceiver {
    stream: BoxStream<'static, Result<Message, WsError>>,
    codec: EnvelopeCodec,
}

impl EnvelopeReceiver {
    /// Receive the next envelope.
    ///
    /// Returns `None` once the peer closes the connection. A payload that does
    /// not decode yields [`TransportError::Malformed`] and the receiver stays
    /// usable; any other error means the connection is gone.
    pub async fn recv(&mut self) -> Option<Result<Envelope, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => return None,
                Err(e) => return Some(Err(TransportError::WebSocket(e.to_string()))),
            };

            match message {
                Message::Text(text) => {
                    return Some(self.codec.decode(&text).map_err(TransportError::from));
                }
                Message::Binary(data) => {
                    return Some(self.codec.decode_bytes(&data).map_err(TransportError::from));
                }
                Message::Close(frame) => {
                    debug!("Peer closed connection: {:?}", frame);
                    return None;
                }
                // Control frames are answered by tungstenite itself
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }
}
