//! Request/response correlation

use crate::{ClientError, Result};
use relayexec_proto::{CommandRequest, CommandResponse, Envelope};
use relayexec_transport::EnvelopeSender;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default wait for a command response
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// How many resolved, expired or failed identifiers are remembered
const RETIRED_CAPACITY: usize = 1024;

/// Outcome delivered to a waiting submitter
type Outcome = Result<CommandResponse>;

/// A submission still waiting for its outcome
#[derive(Debug)]
struct PendingEntry {
    /// Insertion order, used by the fallback rules
    seq: u64,
    /// Slot the outcome is delivered through
    slot: oneshot::Sender<Outcome>,
}

/// How an incoming message was matched against the pending table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Resolved the record with the same identifier
    Matched(String),
    /// Identifier absent or never issued; resolved the oldest pending record
    Fallback(String),
    /// Nothing was pending, or the identifier was already retired
    Unmatched,
}

/// Outstanding submissions keyed by command identifier.
///
/// Every record is resolved at most once. Identifiers leave the table when
/// they resolve, expire or fail, and a bounded number of the most recent
/// ones are remembered so that a late or duplicate response naming one is
/// dropped instead of completing some other submission.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: HashMap<String, PendingEntry>,
    next_seq: u64,
    /// Identifiers that no longer have a record
    retired: HashSet<String>,
    /// Retirement order, oldest first, for eviction
    retired_order: VecDeque<String>,
}

impl PendingTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a submission and get the receiver its outcome arrives on.
    ///
    /// A record already pending under the same identifier is failed with
    /// [`ClientError::ConnectionClosed`] and replaced.
    pub fn insert(&mut self, command_id: impl Into<String>) -> oneshot::Receiver<Outcome> {
        let (slot, rx) = oneshot::channel();
        let seq = self.next_seq;
        self.next_seq += 1;

        let command_id = command_id.into();
        if let Some(old) = self.entries.insert(command_id.clone(), PendingEntry { seq, slot }) {
            warn!("Replacing pending record for command {}", command_id);
            let _ = old.slot.send(Err(ClientError::ConnectionClosed));
        }
        rx
    }

    /// Number of unresolved records
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `command_id` is still pending
    pub fn contains(&self, command_id: &str) -> bool {
        self.entries.contains_key(command_id)
    }

    /// Whether `command_id` had a record that has since gone
    pub fn is_retired(&self, command_id: &str) -> bool {
        self.retired.contains(command_id)
    }

    /// Pending identifiers, oldest first
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.entries.iter().map(|(id, e)| (e.seq, id.clone())).collect();
        ids.sort_unstable();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Resolve a record with a `command_response`.
    ///
    /// An exact identifier match wins. A retired identifier matches nothing.
    /// Otherwise, when the identifier is absent or was never issued, the
    /// oldest pending record takes the response so that a counterpart which
    /// drops or rewrites identifiers never leaves a submitter hanging.
    pub fn resolve_response(&mut self, response: CommandResponse) -> Resolution {
        let (matched, retired) = match response.command_id.as_deref() {
            Some(id) if self.entries.contains_key(id) => (Some(id.to_owned()), false),
            Some(id) => (None, self.retired.contains(id)),
            None => (None, false),
        };
        if retired {
            return Resolution::Unmatched;
        }

        let (command_id, resolution) = match matched {
            Some(id) => (id.clone(), Resolution::Matched(id)),
            None => match self.oldest() {
                Some(id) => (id.clone(), Resolution::Fallback(id)),
                None => return Resolution::Unmatched,
            },
        };

        self.complete(&command_id, Ok(response));
        resolution
    }

    /// Fail the most recently submitted record with a relay error.
    ///
    /// Returns the identifier that was failed, if any was pending.
    pub fn resolve_error(&mut self, message: impl Into<String>) -> Option<String> {
        let command_id = self.newest()?;
        self.complete(&command_id, Err(ClientError::Relay(message.into())));
        Some(command_id)
    }

    /// Drop a record without resolving it; true if it was still pending
    pub fn remove(&mut self, command_id: &str) -> bool {
        if self.entries.remove(command_id).is_none() {
            return false;
        }
        self.retire(command_id.to_owned());
        true
    }

    /// Fail every pending record with [`ClientError::ConnectionClosed`]
    pub fn fail_all(&mut self) -> usize {
        let drained: Vec<_> = self.entries.drain().collect();
        let count = drained.len();
        for (command_id, entry) in drained {
            let _ = entry.slot.send(Err(ClientError::ConnectionClosed));
            self.retire(command_id);
        }
        count
    }

    fn oldest(&self) -> Option<String> {
        self.entries
            .iter()
            .min_by_key(|(_, e)| e.seq)
            .map(|(id, _)| id.clone())
    }

    fn newest(&self) -> Option<String> {
        self.entries
            .iter()
            .max_by_key(|(_, e)| e.seq)
            .map(|(id, _)| id.clone())
    }

    fn complete(&mut self, command_id: &str, outcome: Outcome) {
        if let Some(entry) = self.entries.remove(command_id) {
            // The submitter may already have given up
            if entry.slot.send(outcome).is_err() {
                debug!("Submitter for command {} no longer waiting", command_id);
            }
            self.retire(command_id.to_owned());
        }
    }

    fn retire(&mut self, command_id: String) {
        if !self.retired.insert(command_id.clone()) {
            return;
        }
        self.retired_order.push_back(command_id);

        if self.retired_order.len() > RETIRED_CAPACITY {
            if let Some(evicted) = self.retired_order.pop_front() {
                self.retired.remove(&evicted);
            }
        }
    }
}

/// Submits commands over a session's connection and correlates responses.
///
/// Cheap to clone; clones share the pending table.
#[derive(Debug, Clone)]
pub struct Router {
    /// Submissions waiting for a response
    pending: Arc<Mutex<PendingTable>>,
    /// Outbound half of the relay connection
    sender: EnvelopeSender,
    /// How long a submission waits
    response_timeout: Duration,
    /// Cancelled once the connection is gone
    closed: CancellationToken,
}

impl Router {
    /// Create a router sending through `sender`
    pub fn new(sender: EnvelopeSender, response_timeout: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(PendingTable::new())),
            sender,
            response_timeout,
            closed: CancellationToken::new(),
        }
    }

    /// Submit `command` to `agent_id` and wait for its outcome
    pub async fn submit(&self, agent_id: &str, command: &str) -> Result<CommandResponse> {
        let command_id = Uuid::new_v4().to_string();

        let response_rx = {
            let mut pending = self.pending.lock().await;
            // Checked under the lock so shutdown cannot miss this record
            if self.closed.is_cancelled() {
                return Err(ClientError::ConnectionClosed);
            }
            pending.insert(command_id.as_str())
        };

        info!("Sending command to agent {}: {} (ID: {})", agent_id, command, command_id);
        let request = CommandRequest::new(agent_id, command, command_id.as_str());
        if let Err(e) = self.sender.send(Envelope::Command(request)).await {
            self.pending.lock().await.remove(&command_id);
            return Err(e.into());
        }
        debug!("Waiting for response to {}", command_id);

        match timeout(self.response_timeout, response_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&command_id);
                warn!("No response for command {} within {:?}", command_id, self.response_timeout);
                Err(ClientError::Timeout {
                    duration: self.response_timeout,
                })
            }
        }
    }

    /// Route a `command_response` to its submitter
    pub async fn handle_response(&self, response: CommandResponse) -> Resolution {
        let response_id = response.command_id.clone();
        let resolution = self.pending.lock().await.resolve_response(response);

        match &resolution {
            Resolution::Matched(id) => debug!("Completed pending command {}", id),
            Resolution::Fallback(id) => warn!(
                "No pending command for response id {:?}, completing oldest pending {}",
                response_id, id
            ),
            Resolution::Unmatched => {
                warn!("Dropping response {:?}: no pending command for it", response_id)
            }
        }
        resolution
    }

    /// Route an `error` envelope to the most recent submitter
    pub async fn handle_error(&self, message: &str) -> Option<String> {
        let failed = self.pending.lock().await.resolve_error(message);

        match &failed {
            Some(id) => warn!("Relay error for command {}: {}", id, message),
            None => warn!("Relay error: {}", message),
        }
        failed
    }

    /// Number of submissions still waiting
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Whether the router has been shut down
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled when the router shuts down
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Refuse further submissions and fail everything still pending
    pub async fn shutdown(&self) {
        self.closed.cancel();
        let failed = self.pending.lock().await.fail_all();
        if failed > 0 {
            info!("Router shutdown failed {} pending command(s)", failed);
        } else {
            debug!("Router shutdown complete");
        }
    }
}
