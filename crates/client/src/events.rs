//! Client event fan-out.
//!
//! A plain publish/subscribe list of handlers, invoked synchronously in
//! registration order. A failing handler is logged and skipped so one
//! subscriber can never starve the others.

use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::error::ClientError;
use crate::transport::TransportKind;

/// Events emitted by a client outside the request/response flow.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A pairing race completed; the given transport is now active.
    PairSuccess { kind: TransportKind },
    /// A non-terminal acknowledgement arrived for an open request.
    AcknowledgeReceived { id: String },
    /// The local rate limit rejected a request before sending.
    RateLimitReached,
    /// The permission check rejected a request before sending.
    NoPermission,
    /// A peer disconnected and its channel was torn down.
    ChannelClosed,
    /// A transport failed to hand a request to the channel.
    SendFailed { description: String },
}

/// Handler invoked for every emitted event.
pub type EventHandler = Arc<dyn Fn(&ClientEvent) -> Result<(), ClientError> + Send + Sync>;

/// Registry of event handlers.
pub struct EventHandlers {
    handlers: Mutex<Vec<EventHandler>>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// Registers a handler. Handlers run in registration order.
    pub fn subscribe(&self, handler: EventHandler) {
        self.handlers.lock().expect("event handler lock").push(handler);
    }

    /// Invokes every handler with the event, logging and continuing past
    /// failures.
    pub fn emit(&self, event: &ClientEvent) {
        let handlers = self.handlers.lock().expect("event handler lock").clone();
        for handler in handlers {
            if let Err(error) = handler(event) {
                warn!(?event, %error, "event handler failed");
            }
        }
    }
}

impl Default for EventHandlers {
    fn default() -> Self {
        Self::new()
    }
}
