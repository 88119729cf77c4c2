//! Relay-mediated transport.
//!
//! Subscribes on the local identity-hash address across the selector's
//! relay set and addresses outbound frames to the recipient's set. The
//! first pairing message travels as a sealed box because no session
//! exists yet; everything after runs on derived session keys.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use protocol::crypto::identity_hash_from_hex;
use protocol::messages::{PairingPayload, RelayPairing, PROTOCOL_VERSION};
use protocol::{seal, Identity, ProtocolError};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::correlation::generate_id;
use crate::error::{ClientError, Result};
use crate::managers::{PeerManager, PeerRecord};
use crate::relay::{select_relay, select_relays, RelayAddress, RelayNetwork};
use crate::storage::Storage;
use crate::transport::{
    dispatch_frame, MessageListener, NewPeerListener, SessionStore, Transport, TransportKind,
    TransportState, TransportStatus,
};

/// Transport running over an untrusted relay network.
pub struct RelayTransport {
    state: Arc<TransportState>,
    sessions: Arc<SessionStore>,
    relay: Arc<dyn RelayNetwork>,
    name: String,
    candidates: Vec<String>,
    replication_count: u32,
    icon_url: Option<String>,
    app_url: Option<String>,
    pairing_armed: Arc<AtomicBool>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl RelayTransport {
    pub fn new(
        identity: Arc<Identity>,
        storage: Arc<dyn Storage>,
        relay: Arc<dyn RelayNetwork>,
        config: &ClientConfig,
        storage_key: &str,
    ) -> Self {
        let peers = PeerManager::new(storage, storage_key);
        Self {
            state: Arc::new(TransportState::new(TransportKind::Relay, peers)),
            sessions: Arc::new(SessionStore::new(identity)),
            relay,
            name: config.name.clone(),
            candidates: config.relay_servers.clone(),
            replication_count: config.replication_count,
            icon_url: config.icon_url.clone(),
            app_url: config.app_url.clone(),
            pairing_armed: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(None),
        }
    }

    async fn send_to_peer(&self, payload: &str, peer: &PeerRecord) -> Result<()> {
        let frame = self.sessions.encrypt_for(&peer.public_key, payload)?;
        let recipient_hash = identity_hash_from_hex(&peer.public_key)?;

        // The selector set converges with the peer's own subscriptions as
        // long as both sides share the candidate list; the advertised
        // relay from pairing covers the case where they do not.
        let mut servers = select_relays(&recipient_hash, &self.candidates, self.replication_count);
        if let Some(advertised) = &peer.relay_server {
            if !servers.iter().any(|s| s == advertised) {
                servers.push(advertised.clone());
            }
        }
        if servers.is_empty() {
            return Err(ClientError::Config("no relay route to peer".into()));
        }

        for server in servers {
            let address = RelayAddress {
                recipient_hash: recipient_hash.clone(),
                server,
            };
            self.relay.send(&address, frame.clone()).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for RelayTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Relay
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

        let own_hash = self.sessions.identity().identity_hash();
        let servers = select_relays(&own_hash, &self.candidates, self.replication_count);
        if servers.is_empty() {
            self.state.set_status(TransportStatus::NotConnected);
            return Err(ClientError::Config("no relay servers configured".into()));
        }

        for server in servers {
            let address = RelayAddress {
                recipient_hash: own_hash.clone(),
                server,
            };
            let mut receiver = self.relay.subscribe(&address).await;
            let state = self.state.clone();
            let sessions = self.sessions.clone();
            let pairing_armed = self.pairing_armed.clone();
            let task_token = token.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = task_token.cancelled() => break,
                        received = receiver.recv() => match received {
                            Ok(message) => {
                                dispatch_frame(&state, &sessions, &pairing_armed, &message.content)
                                    .await;
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!(skipped, "relay subscription lagged");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            });
        }

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
            Some(peer) => self.send_to_peer(payload, peer).await,
            None => {
                for peer in self.state.peers().get_peers().await? {
                    self.send_to_peer(payload, &peer).await?;
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
        // Unsubscribe the crypto listener even when the store delete
        // failed.
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
        let own_hash = self.sessions.identity().identity_hash();
        let relay_server = select_relay(&own_hash, &self.candidates, 0)
            .ok_or_else(|| ClientError::Config("no relay servers configured".into()))?
            .to_string();

        Ok(PairingPayload::RelayPairingRequest(RelayPairing {
            id: generate_id(),
            name: self.name.clone(),
            version: PROTOCOL_VERSION.to_string(),
            public_key: self.sessions.identity().public_key_hex(),
            relay_server,
            icon: self.icon_url.clone(),
            app_url: self.app_url.clone(),
        }))
    }

    async fn respond_to_pairing(&self, request: &PairingPayload) -> Result<()> {
        let PairingPayload::RelayPairingRequest(request) = request else {
            return Err(ClientError::InvalidPairing(
                "relay transport expects a relay pairing request".into(),
            ));
        };

        let own_hash = self.sessions.identity().identity_hash();
        let relay_server = select_relay(&own_hash, &self.candidates, 0)
            .map(|s| s.to_string())
            .unwrap_or_else(|| request.relay_server.clone());

        let response = PairingPayload::RelayPairingResponse(RelayPairing {
            id: request.id.clone(),
            name: self.name.clone(),
            version: request.version.clone(),
            public_key: self.sessions.identity().public_key_hex(),
            relay_server,
            icon: self.icon_url.clone(),
            app_url: self.app_url.clone(),
        });

        let text = serde_json::to_string(&response).map_err(ProtocolError::from)?;
        let sealed = seal(&text, &request.public_key)?;
        let address = RelayAddress {
            recipient_hash: identity_hash_from_hex(&request.public_key)?,
            server: request.relay_server.clone(),
        };
        self.relay.send(&address, hex::encode(sealed)).await
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::InMemoryRelay;
    use crate::storage::{keys, InMemoryStorage};
    use std::time::Duration;

    fn config(name: &str) -> ClientConfig {
        let mut config = ClientConfig::new(name);
        config.relay_servers = vec!["relay-a".to_string(), "relay-b".to_string()];
        config
    }

    fn transport(seed: &str, name: &str, relay: Arc<InMemoryRelay>) -> RelayTransport {
        RelayTransport::new(
            Arc::new(Identity::from_seed(seed).unwrap()),
            Arc::new(InMemoryStorage::new()),
            relay,
            &config(name),
            keys::RELAY_PEERS,
        )
    }

    async fn wait_for_status(transport: &RelayTransport, status: TransportStatus) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while transport.status() != status {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("status was never reached");
    }

    #[tokio::test]
    async fn test_connect_with_empty_store_listens_for_pairing() {
        let relay = Arc::new(InMemoryRelay::new());
        let transport = transport("dapp", "dapp", relay);

        transport.connect().await.unwrap();
        assert_eq!(transport.status(), TransportStatus::Connecting);

        let request = transport.pairing_request().await.unwrap();
        assert!(matches!(request, PairingPayload::RelayPairingRequest(_)));
        assert!(request.relay_server().is_some());
    }

    #[tokio::test]
    async fn test_connect_with_known_peers_skips_pairing() {
        let relay = Arc::new(InMemoryRelay::new());
        let transport = transport("dapp", "dapp", relay);
        let wallet = Identity::from_seed("wallet").unwrap();

        transport
            .add_peer(PeerRecord {
                name: "wallet".into(),
                public_key: wallet.public_key_hex(),
                version: PROTOCOL_VERSION.into(),
                sender_id: wallet.sender_id(),
                relay_server: Some("relay-a".into()),
                icon: None,
                app_url: None,
            })
            .await
            .unwrap();

        transport.connect().await.unwrap();
        assert_eq!(transport.status(), TransportStatus::Connected);
    }

    #[tokio::test]
    async fn test_pairing_handshake_over_relay() {
        let relay = Arc::new(InMemoryRelay::new());
        let dapp = transport("dapp", "my-dapp", relay.clone());
        let wallet = transport("wallet", "my-wallet", relay);

        dapp.connect().await.unwrap();
        wallet.connect().await.unwrap();

        let request = dapp.pairing_request().await.unwrap();

        // Wallet side: store the requesting peer, then answer sealed.
        let dapp_record = PeerRecord::from_pairing(&request).unwrap();
        wallet.add_peer(dapp_record).await.unwrap();
        wallet.respond_to_pairing(&request).await.unwrap();

        wait_for_status(&dapp, TransportStatus::Connected).await;

        let peers = dapp.get_peers().await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].name, "my-wallet");
    }

    #[tokio::test]
    async fn test_respond_to_pairing_rejects_direct_payload() {
        let relay = Arc::new(InMemoryRelay::new());
        let transport = transport("wallet", "wallet", relay);

        let direct = PairingPayload::DirectPairingRequest(protocol::messages::DirectPairing {
            id: "x".into(),
            name: "dapp".into(),
            version: PROTOCOL_VERSION.into(),
            public_key: Identity::from_seed("dapp").unwrap().public_key_hex(),
            icon: None,
            app_url: None,
        });

        assert!(matches!(
            transport.respond_to_pairing(&direct).await,
            Err(ClientError::InvalidPairing(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_peer_unsubscribes_listener() {
        let relay = Arc::new(InMemoryRelay::new());
        let dapp = transport("dapp", "my-dapp", relay.clone());
        let wallet = transport("wallet", "my-wallet", relay);

        dapp.connect().await.unwrap();
        wallet.connect().await.unwrap();

        let request = dapp.pairing_request().await.unwrap();
        wallet
            .add_peer(PeerRecord::from_pairing(&request).unwrap())
            .await
            .unwrap();
        wallet.respond_to_pairing(&request).await.unwrap();
        wait_for_status(&dapp, TransportStatus::Connected).await;

        let peer_key = dapp.get_peers().await.unwrap()[0].public_key.clone();
        dapp.remove_peer(&peer_key).await.unwrap();

        assert!(dapp.get_peers().await.unwrap().is_empty());
        assert!(dapp.sessions.registered_peers().is_empty());
    }
}
