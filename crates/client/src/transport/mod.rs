//! Transport abstraction.
//!
//! A transport is one communication channel family: relay-mediated or
//! direct in-process messaging. All kinds share the same contract (peer
//! store, connection-status state machine, pairing listener, encrypted
//! send), expressed as a single trait plus a composed `TransportState`
//! helper instead of an inheritance tower.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use protocol::messages::PairingPayload;
use protocol::open_sealed;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::managers::{PeerManager, PeerRecord};

mod direct;
mod relay;
mod sessions;

pub use direct::{DirectHub, DirectTransport};
pub use relay::RelayTransport;
pub use sessions::SessionStore;

/// The kind of channel a transport runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Relay-mediated, addressed by identity hash on a relay server.
    Relay,
    /// Direct in-process channel (extension / window messaging).
    Direct,
}

/// Connection status of one transport instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportStatus {
    #[default]
    NotConnected,
    /// Listening for an inbound pairing handshake.
    Connecting,
    Connected,
}

/// Context attached to every inbound message.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    /// Which transport the message arrived on.
    pub origin: TransportKind,
    /// Hex public key of the sending peer.
    pub id: String,
}

/// Listener invoked with each decrypted inbound payload.
pub type MessageListener = Arc<dyn Fn(String, ConnectionContext) + Send + Sync>;

/// Hook invoked when a pairing handshake produces a new peer.
pub type NewPeerListener = Arc<dyn Fn(PeerRecord) + Send + Sync>;

/// Common contract of all transports.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The channel family of this transport.
    fn kind(&self) -> TransportKind;

    /// Current connection status.
    fn status(&self) -> TransportStatus;

    /// Connects the transport.
    ///
    /// With an empty peer store this starts listening for an inbound
    /// pairing handshake and the transport stays in `Connecting`; with
    /// known peers it re-registers a decrypt listener per peer and moves
    /// straight to `Connected`.
    async fn connect(&self) -> Result<()>;

    /// Tears down subscriptions and returns to `NotConnected`.
    async fn disconnect(&self) -> Result<()>;

    /// Sends an already-serialized payload.
    ///
    /// With a peer given, encrypts and transmits to that peer only.
    /// Without one, fans out: one independent encryption and transmission
    /// per known peer, since every pair holds distinct session keys.
    async fn send(&self, payload: &str, peer: Option<&PeerRecord>) -> Result<()>;

    /// Registers the live decrypt listener for a peer public key.
    async fn listen(&self, public_key: &str) -> Result<()>;

    /// Returns all peers known to this transport.
    async fn get_peers(&self) -> Result<Vec<PeerRecord>>;

    /// Stores a peer (upsert by public key) and registers its decrypt
    /// listener.
    async fn add_peer(&self, peer: PeerRecord) -> Result<()>;

    /// Removes a peer from the store.
    ///
    /// The crypto listener is unsubscribed even when the store delete
    /// fails; the removal is best effort, not transactional.
    async fn remove_peer(&self, public_key: &str) -> Result<()>;

    /// Removes every peer, unsubscribing all crypto listeners.
    async fn remove_all_peers(&self) -> Result<()>;

    /// The local pairing payload to expose to the remote side (QR or
    /// deeplink display is up to the embedder).
    async fn pairing_request(&self) -> Result<PairingPayload>;

    /// Answers a pairing request: stores nothing, seals the matching
    /// response to the requester and sends it over this channel.
    async fn respond_to_pairing(&self, request: &PairingPayload) -> Result<()>;

    /// Arms the new-peer hook fired when pairing completes.
    fn listen_for_new_peer(&self, listener: NewPeerListener);

    /// Clears the new-peer hook and stops accepting pairing handshakes.
    /// Cooperative and best effort: an in-flight subscription is not torn
    /// down atomically.
    fn stop_listening_for_new_peers(&self);

    /// Registers a listener for decrypted inbound messages. Listeners are
    /// invoked in registration order.
    fn add_listener(&self, listener: MessageListener);
}

/// State shared by every concrete transport: the peer store handle, the
/// message listener registry, the new-peer hook and the status cell.
pub(crate) struct TransportState {
    kind: TransportKind,
    status: Mutex<TransportStatus>,
    peers: PeerManager,
    listeners: Mutex<Vec<MessageListener>>,
    new_peer_listener: Mutex<Option<NewPeerListener>>,
}

impl TransportState {
    pub(crate) fn new(kind: TransportKind, peers: PeerManager) -> Self {
        Self {
            kind,
            status: Mutex::new(TransportStatus::NotConnected),
            peers,
            listeners: Mutex::new(Vec::new()),
            new_peer_listener: Mutex::new(None),
        }
    }

    pub(crate) fn kind(&self) -> TransportKind {
        self.kind
    }

    pub(crate) fn status(&self) -> TransportStatus {
        *self.status.lock().expect("status lock")
    }

    pub(crate) fn set_status(&self, status: TransportStatus) {
        *self.status.lock().expect("status lock") = status;
    }

    pub(crate) fn peers(&self) -> &PeerManager {
        &self.peers
    }

    pub(crate) fn add_listener(&self, listener: MessageListener) {
        self.listeners.lock().expect("listener lock").push(listener);
    }

    /// Notifies message listeners in registration order.
    pub(crate) fn notify(&self, message: String, context: ConnectionContext) {
        let listeners = self.listeners.lock().expect("listener lock").clone();
        if listeners.is_empty() {
            warn!(kind = ?self.kind, "inbound message with no listeners registered");
        }
        for listener in listeners {
            listener(message.clone(), context.clone());
        }
    }

    pub(crate) fn set_new_peer_listener(&self, listener: NewPeerListener) {
        *self.new_peer_listener.lock().expect("new peer lock") = Some(listener);
    }

    pub(crate) fn clear_new_peer_listener(&self) {
        *self.new_peer_listener.lock().expect("new peer lock") = None;
    }

    pub(crate) fn notify_new_peer(&self, peer: PeerRecord) {
        let listener = self.new_peer_listener.lock().expect("new peer lock").clone();
        if let Some(listener) = listener {
            listener(peer);
        }
    }
}

/// Dispatches one raw inbound frame, shared by every transport kind.
///
/// Frames are hex ciphertext. While pairing is armed, a frame may be a
/// sealed pairing response; otherwise it is tried against every registered
/// peer's receive keys. Everything that fails to decode or authenticate
/// was not addressed to us and is dropped silently.
pub(crate) async fn dispatch_frame(
    state: &Arc<TransportState>,
    sessions: &Arc<SessionStore>,
    pairing_armed: &Arc<AtomicBool>,
    content: &str,
) {
    let Ok(bytes) = hex::decode(content.trim()) else {
        return;
    };

    if pairing_armed.load(Ordering::SeqCst) {
        if let Ok(text) = open_sealed(&bytes, sessions.identity()) {
            accept_pairing_response(state, sessions, pairing_armed, &text).await;
            return;
        }
    }

    if let Some((sender, plaintext)) = sessions.try_decrypt(&bytes) {
        let context = ConnectionContext {
            origin: state.kind(),
            id: sender,
        };
        state.notify(plaintext, context);
    }
}

async fn accept_pairing_response(
    state: &Arc<TransportState>,
    sessions: &Arc<SessionStore>,
    pairing_armed: &Arc<AtomicBool>,
    text: &str,
) {
    let payload: PairingPayload = match serde_json::from_str(text) {
        Ok(payload) => payload,
        Err(error) => {
            debug!(%error, "unsealed payload is not a pairing response");
            return;
        }
    };

    let expected_kind = match &payload {
        PairingPayload::RelayPairingRequest(_) | PairingPayload::RelayPairingResponse(_) => {
            TransportKind::Relay
        }
        PairingPayload::DirectPairingRequest(_) | PairingPayload::DirectPairingResponse(_) => {
            TransportKind::Direct
        }
    };
    if expected_kind != state.kind() {
        debug!(kind = ?state.kind(), "pairing payload for a different transport kind");
        return;
    }

    let peer = match PeerRecord::from_pairing(&payload) {
        Ok(peer) => peer,
        Err(error) => {
            warn!(%error, "pairing payload carried an unusable public key");
            return;
        }
    };

    if let Err(error) = sessions.register_peer(&peer.public_key) {
        warn!(%error, "failed to register session listener for new peer");
        return;
    }
    if let Err(error) = state.peers().add_peer(peer.clone()).await {
        warn!(%error, "failed to persist new peer");
    }

    pairing_armed.store(false, Ordering::SeqCst);
    state.set_status(TransportStatus::Connected);
    info!(name = %peer.name, kind = ?state.kind(), "pairing completed");
    state.notify_new_peer(peer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    fn state() -> TransportState {
        let storage: Arc<dyn crate::storage::Storage> = Arc::new(InMemoryStorage::new());
        TransportState::new(TransportKind::Direct, PeerManager::new(storage, "peers"))
    }

    #[test]
    fn test_status_machine() {
        let state = state();
        assert_eq!(state.status(), TransportStatus::NotConnected);

        state.set_status(TransportStatus::Connecting);
        assert_eq!(state.status(), TransportStatus::Connecting);

        state.set_status(TransportStatus::Connected);
        assert_eq!(state.status(), TransportStatus::Connected);
    }

    #[test]
    fn test_listeners_called_in_order() {
        let state = state();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in [1, 2] {
            let order = order.clone();
            state.add_listener(Arc::new(move |_message, _context| {
                order.lock().unwrap().push(tag);
            }));
        }

        state.notify(
            "payload".to_string(),
            ConnectionContext {
                origin: TransportKind::Direct,
                id: "pk".to_string(),
            },
        );
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_new_peer_hook_set_and_clear() {
        let state = state();
        let fired = Arc::new(Mutex::new(0));

        let counter = fired.clone();
        state.set_new_peer_listener(Arc::new(move |_peer| {
            *counter.lock().unwrap() += 1;
        }));

        let peer = PeerRecord {
            name: "wallet".into(),
            public_key: "aa".into(),
            version: "2".into(),
            sender_id: "sid".into(),
            relay_server: None,
            icon: None,
            app_url: None,
        };
        state.notify_new_peer(peer.clone());
        assert_eq!(*fired.lock().unwrap(), 1);

        state.clear_new_peer_listener();
        state.notify_new_peer(peer);
        assert_eq!(*fired.lock().unwrap(), 1);
    }
}
