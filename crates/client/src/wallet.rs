//! Wallet-side client.
//!
//! The responder half of a pairing: it consumes the dapp's pairing
//! request (scanned or pasted out of band), answers with a sealed pairing
//! response, and from then on serves inbound requests over the encrypted
//! channel.

use std::sync::{Arc, Mutex};

use protocol::messages::{Acknowledge, Disconnect, Message, PairingPayload};
use protocol::{Identity, Serializer};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::correlation::generate_id;
use crate::error::{ClientError, Result};
use crate::managers::PeerRecord;
use crate::relay::RelayNetwork;
use crate::storage::{keys, load_or_create_seed, Storage};
use crate::transport::{
    ConnectionContext, DirectHub, DirectTransport, RelayTransport, Transport,
};

/// Handler invoked for every inbound request.
pub type RequestHandler = Arc<dyn Fn(Message, ConnectionContext) + Send + Sync>;

/// Wallet client handle.
#[derive(Clone)]
pub struct WalletClient {
    inner: Arc<WalletInner>,
}

struct WalletInner {
    identity: Arc<Identity>,
    transport: Arc<dyn Transport>,
    handlers: Mutex<Vec<RequestHandler>>,
}

impl WalletClient {
    /// Builds a wallet client served over the relay transport.
    pub async fn new_relay(
        config: ClientConfig,
        storage: Arc<dyn Storage>,
        relay_network: Arc<dyn RelayNetwork>,
    ) -> Result<Self> {
        let seed = load_or_create_seed(&storage).await?;
        let identity = Arc::new(Identity::from_seed(&seed)?);
        let transport = Arc::new(RelayTransport::new(
            identity.clone(),
            storage,
            relay_network,
            &config,
            keys::RELAY_PEERS,
        ));
        Ok(Self::with_transport(identity, transport))
    }

    /// Builds a wallet client served over the direct transport.
    pub async fn new_direct(
        config: ClientConfig,
        storage: Arc<dyn Storage>,
        hub: Arc<DirectHub>,
    ) -> Result<Self> {
        let seed = load_or_create_seed(&storage).await?;
        let identity = Arc::new(Identity::from_seed(&seed)?);
        let transport = Arc::new(DirectTransport::new(
            identity.clone(),
            storage,
            hub,
            &config,
            keys::DIRECT_PEERS,
        ));
        Ok(Self::with_transport(identity, transport))
    }

    fn with_transport(identity: Arc<Identity>, transport: Arc<dyn Transport>) -> Self {
        let inner = Arc::new(WalletInner {
            identity,
            transport,
            handlers: Mutex::new(Vec::new()),
        });

        // One ordered queue keeps inbound handling in arrival order.
        let (queue, mut receiver) =
            tokio::sync::mpsc::unbounded_channel::<(String, ConnectionContext)>();
        inner.transport.add_listener(Arc::new(move |payload, context| {
            let _ = queue.send((payload, context));
        }));

        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some((payload, context)) = receiver.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.handle_incoming(payload, context).await;
            }
        });

        Self { inner }
    }

    /// Connects the transport.
    pub async fn connect(&self) -> Result<()> {
        self.inner.transport.connect().await
    }

    /// Completes a pairing: stores the requesting peer and sends the
    /// sealed pairing response back over the channel the request names.
    pub async fn add_peer(&self, pairing_request: &PairingPayload) -> Result<()> {
        let peer = PeerRecord::from_pairing(pairing_request)?;
        info!(name = %peer.name, "pairing with requesting peer");
        self.inner.transport.add_peer(peer).await?;
        self.inner.transport.respond_to_pairing(pairing_request).await
    }

    /// Registers a handler for inbound requests; handlers run in
    /// registration order.
    pub fn on_request(&self, handler: RequestHandler) {
        self.inner
            .handlers
            .lock()
            .expect("request handler lock")
            .push(handler);
    }

    /// Sends a response message to one peer.
    pub async fn respond(&self, message: Message, peer_public_key: &str) -> Result<()> {
        let peer = self.inner.peer(peer_public_key).await?;
        let serializer = Serializer::for_version(&peer.version).unwrap_or_default();
        let payload = serializer.serialize(&message)?;
        self.inner.transport.send(&payload, Some(&peer)).await
    }

    /// Sends the non-terminal acknowledge for an inbound request.
    pub async fn acknowledge(&self, request: &Message, peer_public_key: &str) -> Result<()> {
        let message = Message::Acknowledge(Acknowledge {
            id: request.id().to_string(),
            version: request.version().to_string(),
            sender_id: self.inner.identity.sender_id(),
        });
        self.respond(message, peer_public_key).await
    }

    /// Sends a Disconnect to the peer and forgets it.
    pub async fn disconnect_peer(&self, peer_public_key: &str) -> Result<()> {
        let peer = self.inner.peer(peer_public_key).await?;
        let message = Message::Disconnect(Disconnect {
            id: generate_id(),
            version: peer.version.clone(),
            sender_id: self.inner.identity.sender_id(),
        });
        if let Err(error) = self.respond(message, peer_public_key).await {
            warn!(%error, "failed to send disconnect, removing peer anyway");
        }
        self.inner.transport.remove_peer(peer_public_key).await
    }

    /// Peers this wallet has paired with.
    pub async fn get_peers(&self) -> Result<Vec<PeerRecord>> {
        self.inner.transport.get_peers().await
    }

    /// This wallet's sender id.
    pub fn sender_id(&self) -> String {
        self.inner.identity.sender_id()
    }

    /// This wallet's public key, hex encoded.
    pub fn public_key_hex(&self) -> String {
        self.inner.identity.public_key_hex()
    }

    /// Tears the transport down.
    pub async fn destroy(&self) -> Result<()> {
        self.inner.transport.disconnect().await
    }
}

impl WalletInner {
    async fn peer(&self, public_key: &str) -> Result<PeerRecord> {
        self.transport
            .get_peers()
            .await?
            .into_iter()
            .find(|p| p.public_key == public_key)
            .ok_or_else(|| ClientError::PeerNotFound(public_key.to_string()))
    }

    async fn handle_incoming(&self, payload: String, context: ConnectionContext) {
        let serializer = match self.peer(&context.id).await {
            Ok(peer) => Serializer::for_version(&peer.version).unwrap_or_default(),
            Err(_) => Serializer::default(),
        };
        let message: Message = match serializer.deserialize(&payload) {
            Ok(message) => message,
            Err(error) => {
                debug!(%error, "dropping undecodable payload");
                return;
            }
        };

        if matches!(message, Message::Disconnect(_)) {
            info!(sender_id = message.sender_id(), "peer disconnected");
            if let Err(error) = self.transport.remove_peer(&context.id).await {
                warn!(%error, "failed to remove disconnected peer");
            }
            return;
        }

        let handlers = self
            .handlers
            .lock()
            .expect("request handler lock")
            .clone();
        for handler in handlers {
            handler(message.clone(), context.clone());
        }
    }
}
