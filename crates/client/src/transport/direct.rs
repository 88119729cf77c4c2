//! Direct in-process transport.
//!
//! Models the extension/window-messaging channel family: every frame is
//! broadcast to all parties on the hub and each listener keeps only what
//! its keys authenticate. The hub carries hex ciphertext exactly like the
//! relay does, so the crypto path is identical across kinds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use protocol::messages::{DirectPairing, PairingPayload, PROTOCOL_VERSION};
use protocol::{seal, Identity, ProtocolError};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::correlation::generate_id;
use crate::error::{ClientError, Result};
use crate::managers::{PeerManager, PeerRecord};
use crate::storage::Storage;
use crate::transport::{
    dispatch_frame, MessageListener, NewPeerListener, SessionStore, Transport, TransportKind,
    TransportState, TransportStatus,
};

const HUB_CHANNEL_CAPACITY: usize = 256;

/// Shared in-process message bus connecting direct transports.
///
/// Frames are visible to every connected party; confidentiality comes
/// from the session encryption, not the channel.
pub struct DirectHub {
    bus: broadcast::Sender<String>,
}

impl DirectHub {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(HUB_CHANNEL_CAPACITY);
        Self { bus }
    }

    /// Publishes a frame to every connected party.
    pub fn publish(&self, frame: String) {
        // No receivers just means nobody is connected yet.
        let _ = self.bus.send(frame);
    }

    /// Subscribes to all frames on the hub.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.bus.subscribe()
    }
}

impl Default for DirectHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport running over a [`DirectHub`].
pub struct DirectTransport {
    state: Arc<TransportState>,
    sessions: Arc<SessionStore>,
    hub: Arc<DirectHub>,
    name: String,
    icon_url: Option<String>,
    app_url: Option<String>,
    pairing_armed: Arc<AtomicBool>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl DirectTransport {
    pub fn new(
        identity: Arc<Identity>,
        storage: Arc<dyn Storage>,
        hub: Arc<DirectHub>,
        config: &ClientConfig,
        storage_key: &str,
    ) -> Self {
        let peers = PeerManager::new(storage, storage_key);
        Self {
            state: Arc::new(TransportState::new(TransportKind::Direct, peers)),
            sessions: Arc::new(SessionStore::new(identity)),
            hub,
            name: config.name.clone(),
            icon_url: config.icon_url.clone(),
            app_url: config.app_url.clone(),
            pairing_armed: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(None),
        }
    }

    fn send_to_peer(&self, payload: &str, peer: &PeerRecord) -> Result<()> {
        let frame = self.sessions.encrypt_for(&peer.public_key, payload)?;
        self.hub.publish(frame);
        Ok(())
    }
}

#[async_trait]
impl Transport for DirectTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Direct
    }

    fn status(&self) -> TransportStatus {
        self.state.status()
    }

    async fn connect(&self) -> Result<()> {
        if self.state.status() != TransportStatus::NotConnected {
            return Ok(());
        }
        debug!("connect");
        self.state.set_status(TransportStatus::Connecting);

        let token = CancellationToken::new();
        *self.cancel.lock().expect("cancel lock") = Some(token.clone());

        let mut receiver = self.hub.subscribe();
        let state = self.state.clone();
        let sessions = self.sessions.clone();
        let pairing_armed = self.pairing_armed.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = receiver.recv() => match received {
                        Ok(frame) => {
                            dispatch_frame(&state, &sessions, &pairing_armed, &frame).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "direct hub subscription lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });

        let known = self.state.peers().get_peers().await?;
        if known.is_empty() {
            self.pairing_armed.store(true, Ordering::SeqCst);
            debug!("no known peers, listening for pairing");
        } else {
            for peer in &known {
                self.sessions.register_peer(&peer.public_key)?;
            }
            self.pairing_armed.store(false, Ordering::SeqCst);
            self.state.set_status(TransportStatus::Connected);
            debug!(peers = known.len(), "reconnected to known peers");
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        debug!("disconnect");
        if let Some(token) = self.cancel.lock().expect("cancel lock").take() {
            token.cancel();
        }
        self.pairing_armed.store(false, Ordering::SeqCst);
        self.sessions.clear();
        self.state.set_status(TransportStatus::NotConnected);
        Ok(())
    }

    async fn send(&self, payload: &str, peer: Option<&PeerRecord>) -> Result<()> {
        match peer {
            Some(peer) => self.send_to_peer(payload, peer),
            None => {
                for peer in self.state.peers().get_peers().await? {
                    self.send_to_peer(payload, &peer)?;
                }
                Ok(())
            }
        }
    }

    async fn listen(&self, public_key: &str) -> Result<()> {
        self.sessions.register_peer(public_key)
    }

    async fn get_peers(&self) -> Result<Vec<PeerRecord>> {
        self.state.peers().get_peers().await
    }

    async fn add_peer(&self, peer: PeerRecord) -> Result<()> {
        debug!(name = %peer.name, "adding peer");
        self.state.peers().add_peer(peer.clone()).await?;
        self.listen(&peer.public_key).await
    }

    async fn remove_peer(&self, public_key: &str) -> Result<()> {
        debug!("removing peer");
        let result = self.state.peers().remove_peer(public_key).await;
        self.sessions.unregister_peer(public_key);
        result
    }

    async fn remove_all_peers(&self) -> Result<()> {
        debug!("removing all peers");
        let result = self.state.peers().remove_all_peers().await;
        self.sessions.clear();
        result
    }

    async fn pairing_request(&self) -> Result<PairingPayload> {
        Ok(PairingPayload::DirectPairingRequest(DirectPairing {
            id: generate_id(),
            name: self.name.clone(),
            version: PROTOCOL_VERSION.to_string(),
            public_key: self.sessions.identity().public_key_hex(),
            icon: self.icon_url.clone(),
            app_url: self.app_url.clone(),
        }))
    }

    async fn respond_to_pairing(&self, request: &PairingPayload) -> Result<()> {
        let PairingPayload::DirectPairingRequest(request) = request else {
            return Err(ClientError::InvalidPairing(
                "direct transport expects a direct pairing request".into(),
            ));
        };

        let response = PairingPayload::DirectPairingResponse(DirectPairing {
            id: request.id.clone(),
            name: self.name.clone(),
            version: request.version.clone(),
            public_key: self.sessions.identity().public_key_hex(),
            icon: self.icon_url.clone(),
            app_url: self.app_url.clone(),
        });

        let text = serde_json::to_string(&response).map_err(ProtocolError::from)?;
        let sealed = seal(&text, &request.public_key)?;
        self.hub.publish(hex::encode(sealed));
        Ok(())
    }

    fn listen_for_new_peer(&self, listener: NewPeerListener) {
        self.state.set_new_peer_listener(listener);
    }

    fn stop_listening_for_new_peers(&self) {
        debug!("stop listening for new peers");
        self.state.clear_new_peer_listener();
        self.pairing_armed.store(false, Ordering::SeqCst);
    }

    fn add_listener(&self, listener: MessageListener) {
        self.state.add_listener(listener);
    }
}
