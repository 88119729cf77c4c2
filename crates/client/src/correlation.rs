//! Request correlation primitives.
//!
//! Every outbound request registers a pending entry under its id; the
//! entry is resolved or rejected by exactly one terminal inbound message.
//! Acknowledgements are non-terminal and leave the entry in place. Each
//! entry carries a deadline so a lost response ends in `Timeout` instead
//! of dangling forever.

use std::time::Duration;

use dashmap::DashMap;
use protocol::messages::Message;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ClientError, Result};
use crate::transport::ConnectionContext;

/// Terminal outcome of a pending request.
pub type RequestOutcome = Result<(Message, ConnectionContext)>;

/// Generates a fresh globally unique message id.
pub(crate) fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

struct PendingRequest {
    created: Instant,
    deadline: Option<Instant>,
    responder: oneshot::Sender<RequestOutcome>,
}

/// Handle returned to the caller of a request; completes on the terminal
/// outcome.
pub struct RequestHandle {
    id: String,
    receiver: oneshot::Receiver<RequestOutcome>,
}

impl RequestHandle {
    /// The message id this handle is waiting on.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Waits for the terminal response, error or timeout.
    pub async fn await_response(self) -> RequestOutcome {
        match self.receiver.await {
            Ok(outcome) => outcome,
            // The engine was reset or destroyed while we waited.
            Err(_) => Err(ClientError::ChannelClosed),
        }
    }
}

/// The open-request table of the correlation engine.
///
/// Process-local and keyed by message id; at most one entry exists per id
/// at any time.
pub struct PendingRequests {
    entries: DashMap<String, PendingRequest>,
    timeout: Option<Duration>,
}

impl PendingRequests {
    /// Creates a table whose entries expire after `timeout` (`None`
    /// disables deadlines).
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            entries: DashMap::new(),
            timeout,
        }
    }

    /// Registers a pending entry under `id` and returns the caller's
    /// handle. Sweeps expired entries on the way in.
    pub fn register(&self, id: &str) -> RequestHandle {
        self.sweep_expired();

        let (responder, receiver) = oneshot::channel();
        let now = Instant::now();
        self.entries.insert(
            id.to_string(),
            PendingRequest {
                created: now,
                deadline: self.timeout.map(|t| now + t),
                responder,
            },
        );

        debug!(id, "registered pending request");
        RequestHandle {
            id: id.to_string(),
            receiver,
        }
    }

    /// Whether an entry exists for `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of open entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves the entry for `id` with a terminal response. Returns
    /// whether an entry existed; a second response for the same id finds
    /// nothing and is dropped by the caller.
    pub fn resolve(&self, id: &str, message: Message, context: ConnectionContext) -> bool {
        match self.entries.remove(id) {
            Some((_, pending)) => {
                debug!(id, elapsed = ?pending.created.elapsed(), "resolving pending request");
                let _ = pending.responder.send(Ok((message, context)));
                true
            }
            None => false,
        }
    }

    /// Rejects the entry for `id` with an error. Returns whether an entry
    /// existed.
    pub fn reject(&self, id: &str, error: ClientError) -> bool {
        match self.entries.remove(id) {
            Some((_, pending)) => {
                let _ = pending.responder.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Rejects every entry whose deadline has passed with `Timeout`.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| matches!(entry.value().deadline, Some(deadline) if deadline <= now))
            .map(|entry| entry.key().clone())
            .collect();

        for id in expired {
            if let Some((_, pending)) = self.entries.remove(&id) {
                warn!(%id, "pending request passed its deadline");
                let _ = pending.responder.send(Err(ClientError::Timeout));
            }
        }
    }

    /// Drops every entry. Outstanding handles complete with
    /// `ChannelClosed`.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Sliding-window rate limiter for outbound requests.
///
/// The check is fail-open recording: the timestamp is pushed even on the
/// call that trips the limit, so the limiter heals by itself once the
/// window has passed.
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    timestamps: std::sync::Mutex<Vec<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            timestamps: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Records the current call and returns `true` when the limit is
    /// exceeded.
    pub fn check(&self) -> bool {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock().expect("rate limiter lock");
        timestamps.retain(|t| *t + self.window > now);
        timestamps.push(now);
        timestamps.len() > self.limit
    }
}
