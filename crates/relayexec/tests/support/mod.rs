//! In-process relay for end-to-end tests

use futures_util::{SinkExt, StreamExt};
use relayexec_proto::{timestamp_now, CommandRequest, Envelope, EnvelopeCodec};
use relayexec_transport::RelayEndpoint;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

type Outbox = mpsc::UnboundedSender<Envelope>;

#[derive(Default)]
struct RelayState {
    agents: HashMap<String, Outbox>,
    clients: HashMap<String, Outbox>,
    /// command id -> client that submitted it
    routes: HashMap<String, Outbox>,
    next_id: u64,
}

impl RelayState {
    fn broadcast_agents(&self) {
        let agents: Vec<String> = self.agents.keys().cloned().collect();
        for client in self.clients.values() {
            let _ = client.send(Envelope::AgentListUpdate { agents: agents.clone() });
        }
    }
}

/// Minimal relay: registers both roles and routes commands and responses
pub struct FakeRelay {
    endpoint: RelayEndpoint,
    state: Arc<Mutex<RelayState>>,
    task: JoinHandle<()>,
}

impl FakeRelay {
    /// Listen on an ephemeral localhost port
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(RelayState::default()));

        let accept_state = state.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, accept_state.clone()));
            }
        });

        Self {
            endpoint: RelayEndpoint::new("127.0.0.1", port),
            state,
            task,
        }
    }

    /// Where the relay listens
    pub fn endpoint(&self) -> RelayEndpoint {
        self.endpoint.clone()
    }

    /// Wait until `agent_id` has registered
    pub async fn wait_for_agent(&self, agent_id: &str) {
        for _ in 0..500 {
            if self.state.lock().unwrap().agents.contains_key(agent_id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("Agent {} never registered", agent_id);
    }
}

impl Drop for FakeRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(stream: TcpStream, state: Arc<Mutex<RelayState>>) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut sink, mut source) = ws.split();
    let (outbox, mut queue) = mpsc::unbounded_channel::<Envelope>();

    let writer = tokio::spawn(async move {
        let codec = EnvelopeCodec::new();
        while let Some(envelope) = queue.recv().await {
            let text = codec.encode(&envelope).unwrap();
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let _ = outbox.send(Envelope::Welcome {
        message: Some("Connected to relay server".to_string()),
    });

    let codec = EnvelopeCodec::new();
    let mut registered_agent = None;

    while let Some(Ok(message)) = source.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(envelope) = codec.decode(&text) else {
            let _ = outbox.send(Envelope::error("Invalid JSON message"));
            continue;
        };

        let mut relay = state.lock().unwrap();
        match envelope {
            Envelope::AgentRegister { agent_id } => {
                relay.agents.insert(agent_id.clone(), outbox.clone());
                let _ = outbox.send(Envelope::RegisterAck {
                    status: "success".to_string(),
                    available_agents: None,
                    agent_id: Some(agent_id.clone()),
                    client_id: None,
                });
                relay.broadcast_agents();
                registered_agent = Some(agent_id);
            }
            Envelope::ClientRegister { client_id } => {
                relay.clients.insert(client_id.clone(), outbox.clone());
                let _ = outbox.send(Envelope::RegisterAck {
                    status: "success".to_string(),
                    available_agents: Some(relay.agents.keys().cloned().collect()),
                    agent_id: None,
                    client_id: Some(client_id),
                });
            }
            Envelope::Command(request) => {
                let agent_id = request.agent_id.clone().unwrap_or_default();
                let Some(agent) = relay.agents.get(&agent_id).cloned() else {
                    let _ = outbox.send(Envelope::error(format!("Agent {} is not available", agent_id)));
                    continue;
                };

                let command_id = match request.command_id {
                    Some(id) => id,
                    None => {
                        relay.next_id += 1;
                        format!("relay-{}", relay.next_id)
                    }
                };
                relay.routes.insert(command_id.clone(), outbox.clone());
                let _ = agent.send(Envelope::Command(CommandRequest {
                    agent_id: None,
                    command: request.command,
                    command_id: Some(command_id),
                    timestamp: Some(timestamp_now()),
                }));
            }
            Envelope::CommandResponse(response) => {
                let route = response
                    .command_id
                    .as_deref()
                    .and_then(|id| relay.routes.remove(id));
                if let Some(client) = route {
                    let _ = client.send(Envelope::CommandResponse(response));
                }
            }
            Envelope::Ping => {
                let _ = outbox.send(Envelope::Pong);
            }
            _ => {}
        }
    }

    if let Some(agent_id) = registered_agent {
        let mut state = state.lock().unwrap();
        state.agents.remove(&agent_id);
        state.broadcast_agents();
    }
    writer.abort();
}
