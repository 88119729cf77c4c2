//! Dapp-side client.
//!
//! Owns the multi-transport pairing race, the request/response
//! correlation engine with its rate limiter and deadline sweeper, and the
//! account bookkeeping that higher layers consume. Constructed through
//! the async factory; the handle is a cheap clone over shared state, so
//! "one client instance" is enforced by construction instead of a global
//! flag.

use std::sync::Arc;
use std::time::Duration;

use protocol::messages::{
    AppMetadata, BroadcastRequest, BroadcastResponse, Disconnect, Message, OperationRequest,
    OperationResponse, PairingPayload, PermissionRequest, PermissionResponse, PermissionScope,
    SignPayloadRequest, SignPayloadResponse,
};
use protocol::{Identity, Serializer, PROTOCOL_VERSION};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::correlation::{generate_id, PendingRequests, RateLimiter, RequestHandle};
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventHandler, EventHandlers};
use crate::managers::{AccountInfo, AccountManager, PeerRecord, PermissionValidator};
use crate::relay::RelayNetwork;
use crate::storage::{keys, load_or_create_seed, Storage};
use crate::transport::{
    ConnectionContext, DirectHub, DirectTransport, RelayTransport, Transport, TransportKind,
    TransportStatus,
};

/// Result of [`DappClient::connect`].
#[derive(Debug)]
pub enum ConnectOutcome {
    /// Known peers existed; the given transport is live.
    Connected(TransportKind),
    /// No peers yet: both transports are listening and these payloads are
    /// ready for QR/deeplink display. Pairing completes the race later;
    /// wait on [`DappClient::await_pairing`].
    AwaitingPairing {
        relay: Option<PairingPayload>,
        direct: Option<PairingPayload>,
    },
}

/// Dapp client handle.
#[derive(Clone)]
pub struct DappClient {
    inner: Arc<DappInner>,
}

struct DappInner {
    config: ClientConfig,
    identity: Arc<Identity>,
    accounts: AccountManager,
    relay_transport: Arc<RelayTransport>,
    direct_transport: Arc<DirectTransport>,
    active: watch::Sender<Option<TransportKind>>,
    pending: Arc<PendingRequests>,
    limiter: RateLimiter,
    events: EventHandlers,
    shutdown: CancellationToken,
}

impl DappClient {
    /// Builds a client: loads (or creates and persists) the identity seed,
    /// wires both transports and starts the deadline sweeper.
    pub async fn new(
        config: ClientConfig,
        storage: Arc<dyn Storage>,
        relay_network: Arc<dyn RelayNetwork>,
        hub: Arc<DirectHub>,
    ) -> Result<Self> {
        let seed = load_or_create_seed(&storage).await?;
        let identity = Arc::new(Identity::from_seed(&seed)?);
        info!(sender_id = %identity.sender_id(), "client identity ready");

        let relay_transport = Arc::new(RelayTransport::new(
            identity.clone(),
            storage.clone(),
            relay_network,
            &config,
            keys::RELAY_PEERS,
        ));
        let direct_transport = Arc::new(DirectTransport::new(
            identity.clone(),
            storage.clone(),
            hub,
            &config,
            keys::DIRECT_PEERS,
        ));

        let pending = Arc::new(PendingRequests::new(config.request_timeout()));
        let limiter = RateLimiter::new(config.rate_limit, config.rate_limit_window());
        let (active, _) = watch::channel(None);

        let inner = Arc::new(DappInner {
            accounts: AccountManager::new(storage),
            config,
            identity,
            relay_transport,
            direct_transport,
            active,
            pending,
            limiter,
            events: EventHandlers::new(),
            shutdown: CancellationToken::new(),
        });

        let client = Self { inner };
        client.register_listeners();
        client.spawn_sweeper();
        Ok(client)
    }

    /// Connects the client.
    ///
    /// With known peers, the owning transport comes up directly. With
    /// none, both transports start listening for a pairing handshake and
    /// race; whichever observes the new peer first becomes active and the
    /// other's listener is cleared, best effort.
    pub async fn connect(&self) -> Result<ConnectOutcome> {
        if let Some(kind) = self.inner.active_kind() {
            return Ok(ConnectOutcome::Connected(kind));
        }

        let direct = self.inner.direct_transport.clone();
        let relay = self.inner.relay_transport.clone();

        if !direct.get_peers().await?.is_empty() {
            direct.connect().await?;
            self.inner.set_active(TransportKind::Direct);
            return Ok(ConnectOutcome::Connected(TransportKind::Direct));
        }
        if !relay.get_peers().await?.is_empty() {
            relay.connect().await?;
            self.inner.set_active(TransportKind::Relay);
            return Ok(ConnectOutcome::Connected(TransportKind::Relay));
        }

        let race = CancellationToken::new();
        self.arm_race(
            TransportKind::Direct,
            direct.clone() as Arc<dyn Transport>,
            relay.clone() as Arc<dyn Transport>,
            race.clone(),
        );
        self.arm_race(
            TransportKind::Relay,
            relay.clone() as Arc<dyn Transport>,
            direct.clone() as Arc<dyn Transport>,
            race,
        );

        if let Err(error) = direct.connect().await {
            warn!(%error, "direct transport failed to connect");
        }
        if let Err(error) = relay.connect().await {
            warn!(%error, "relay transport failed to connect");
        }

        Ok(ConnectOutcome::AwaitingPairing {
            relay: relay.pairing_request().await.ok(),
            direct: direct.pairing_request().await.ok(),
        })
    }

    /// Completes when a pairing race has settled on an active transport.
    pub async fn await_pairing(&self) -> Result<TransportKind> {
        let mut receiver = self.inner.active.subscribe();
        loop {
            if let Some(kind) = *receiver.borrow_and_update() {
                return Ok(kind);
            }
            receiver
                .changed()
                .await
                .map_err(|_| ClientError::ChannelClosed)?;
        }
    }

    /// Sends a prebuilt request through the correlation engine and
    /// returns the handle tracking its terminal outcome.
    pub async fn send_request(&self, message: Message) -> Result<RequestHandle> {
        let inner = &self.inner;

        if inner.limiter.check() {
            inner.events.emit(&ClientEvent::RateLimitReached);
            return Err(ClientError::RateLimited);
        }

        let accounts = inner.accounts.get_accounts().await?;
        let permitted = PermissionValidator::has_permission(
            &message,
            |address| accounts.iter().find(|a| a.address == address).cloned(),
            || accounts.clone(),
        );
        if !permitted {
            inner.events.emit(&ClientEvent::NoPermission);
            return Err(ClientError::PermissionDenied);
        }

        let transport = inner.active_transport().ok_or(ClientError::NoTransport)?;
        let peers = transport.get_peers().await?;
        let peer = match inner.accounts.get_active_account().await? {
            Some(account) => Some(
                peers
                    .iter()
                    .find(|p| p.sender_id == account.sender_id)
                    .cloned()
                    .ok_or(ClientError::NoActivePeer)?,
            ),
            // Without an active account the request fans out to every
            // known peer.
            None => None,
        };
        if peer.is_none() && peers.is_empty() {
            return Err(ClientError::NoActivePeer);
        }

        let handle = inner.pending.register(message.id());

        let version = peer
            .as_ref()
            .map(|p| p.version.clone())
            .unwrap_or_else(|| PROTOCOL_VERSION.to_string());
        let serializer = Serializer::for_version(&version).unwrap_or_default();
        let payload = serializer.serialize(&message)?;

        debug!(id = message.id(), "sending request");
        if let Err(error) = transport.send(&payload, peer.as_ref()).await {
            // The entry stays registered; the deadline sweeper rejects it
            // if the caller keeps waiting.
            inner.events.emit(&ClientEvent::SendFailed {
                description: error.to_string(),
            });
            return Err(error);
        }

        Ok(handle)
    }

    /// Requests permission scopes from the wallet; on grant, stores the
    /// account and makes it active.
    pub async fn request_permission(
        &self,
        scopes: Vec<PermissionScope>,
    ) -> Result<PermissionResponse> {
        let message = Message::PermissionRequest(PermissionRequest {
            id: generate_id(),
            version: PROTOCOL_VERSION.to_string(),
            sender_id: self.inner.identity.sender_id(),
            app_metadata: self.inner.own_metadata(),
            scopes,
        });

        let handle = self.send_request(message).await?;
        let (response, context) = handle.await_response().await?;
        match response {
            Message::PermissionResponse(response) => {
                self.inner
                    .on_permission_granted(&response, context.origin)
                    .await?;
                Ok(response)
            }
            other => Err(ClientError::UnexpectedResponse(other.type_name().to_string())),
        }
    }

    /// Asks the wallet to forge and inject an operation.
    pub async fn request_operation(
        &self,
        source_address: impl Into<String>,
        operation_details: serde_json::Value,
    ) -> Result<OperationResponse> {
        let message = Message::OperationRequest(OperationRequest {
            id: generate_id(),
            version: PROTOCOL_VERSION.to_string(),
            sender_id: self.inner.identity.sender_id(),
            source_address: source_address.into(),
            operation_details,
        });

        let handle = self.send_request(message).await?;
        match handle.await_response().await? {
            (Message::OperationResponse(response), _) => Ok(response),
            (other, _) => Err(ClientError::UnexpectedResponse(other.type_name().to_string())),
        }
    }

    /// Asks the wallet to sign an arbitrary payload.
    pub async fn request_sign_payload(
        &self,
        source_address: impl Into<String>,
        payload: impl Into<String>,
    ) -> Result<SignPayloadResponse> {
        let message = Message::SignPayloadRequest(SignPayloadRequest {
            id: generate_id(),
            version: PROTOCOL_VERSION.to_string(),
            sender_id: self.inner.identity.sender_id(),
            source_address: source_address.into(),
            payload: payload.into(),
        });

        let handle = self.send_request(message).await?;
        match handle.await_response().await? {
            (Message::SignPayloadResponse(response), _) => Ok(response),
            (other, _) => Err(ClientError::UnexpectedResponse(other.type_name().to_string())),
        }
    }

    /// Asks the wallet to broadcast a signed transaction.
    pub async fn request_broadcast(
        &self,
        signed_transaction: impl Into<String>,
    ) -> Result<BroadcastResponse> {
        let message = Message::BroadcastRequest(BroadcastRequest {
            id: generate_id(),
            version: PROTOCOL_VERSION.to_string(),
            sender_id: self.inner.identity.sender_id(),
            signed_transaction: signed_transaction.into(),
        });

        let handle = self.send_request(message).await?;
        match handle.await_response().await? {
            (Message::BroadcastResponse(response), _) => Ok(response),
            (other, _) => Err(ClientError::UnexpectedResponse(other.type_name().to_string())),
        }
    }

    /// Peers known to the active transport.
    pub async fn get_peers(&self) -> Result<Vec<PeerRecord>> {
        self.inner
            .active_transport()
            .ok_or(ClientError::NoTransport)?
            .get_peers()
            .await
    }

    /// Adds a peer to the active transport.
    pub async fn add_peer(&self, peer: PeerRecord) -> Result<()> {
        self.inner
            .active_transport()
            .ok_or(ClientError::NoTransport)?
            .add_peer(peer)
            .await
    }

    /// Removes a peer, optionally telling it first, and drops the
    /// accounts it granted.
    pub async fn remove_peer(&self, public_key: &str, send_disconnect: bool) -> Result<()> {
        let transport = self.inner.active_transport().ok_or(ClientError::NoTransport)?;
        let peers = transport.get_peers().await?;
        let peer = peers
            .into_iter()
            .find(|p| p.public_key == public_key)
            .ok_or_else(|| ClientError::PeerNotFound(public_key.to_string()))?;

        if send_disconnect {
            if let Err(error) = self.inner.send_disconnect(&transport, &peer).await {
                warn!(%error, "failed to send disconnect to peer");
            }
        }
        transport.remove_peer(public_key).await?;
        self.inner
            .accounts
            .remove_accounts_for_sender_ids(&[peer.sender_id])
            .await
    }

    /// Removes every peer of the active transport and all accounts they
    /// granted.
    pub async fn remove_all_peers(&self, send_disconnect: bool) -> Result<()> {
        let transport = self.inner.active_transport().ok_or(ClientError::NoTransport)?;
        let peers = transport.get_peers().await?;

        if send_disconnect {
            for peer in &peers {
                if let Err(error) = self.inner.send_disconnect(&transport, peer).await {
                    warn!(%error, "failed to send disconnect to peer");
                }
            }
        }
        transport.remove_all_peers().await?;

        let sender_ids: Vec<String> = peers.into_iter().map(|p| p.sender_id).collect();
        self.inner
            .accounts
            .remove_accounts_for_sender_ids(&sender_ids)
            .await
    }

    /// Tells every peer goodbye, clears peers, accounts and the active
    /// transport.
    pub async fn disconnect(&self) -> Result<()> {
        if self.inner.active_kind().is_some() {
            self.remove_all_peers(true).await?;
        }
        self.inner.accounts.remove_all_accounts().await?;

        self.inner.relay_transport.disconnect().await.ok();
        self.inner.direct_transport.disconnect().await.ok();
        self.inner.active.send_replace(None);
        self.inner.pending.clear();
        Ok(())
    }

    /// Tears the client down. Outstanding request handles complete with
    /// `ChannelClosed`.
    pub async fn destroy(&self) -> Result<()> {
        self.inner.shutdown.cancel();
        self.inner.relay_transport.disconnect().await.ok();
        self.inner.direct_transport.disconnect().await.ok();
        self.inner.active.send_replace(None);
        self.inner.pending.clear();
        Ok(())
    }

    /// Registers an event handler; handlers run synchronously in
    /// registration order.
    pub fn on_event(&self, handler: EventHandler) {
        self.inner.events.subscribe(handler);
    }

    /// The transport kind currently active, if any.
    pub fn active_transport_kind(&self) -> Option<TransportKind> {
        self.inner.active_kind()
    }

    /// Status of one transport, active or not.
    pub fn transport_status(&self, kind: TransportKind) -> TransportStatus {
        self.inner.transport_for(kind).status()
    }

    /// This client's sender id.
    pub fn sender_id(&self) -> String {
        self.inner.identity.sender_id()
    }

    /// This client's public key, hex encoded.
    pub fn public_key_hex(&self) -> String {
        self.inner.identity.public_key_hex()
    }

    /// All locally known accounts.
    pub async fn get_accounts(&self) -> Result<Vec<AccountInfo>> {
        self.inner.accounts.get_accounts().await
    }

    /// The currently active account.
    pub async fn get_active_account(&self) -> Result<Option<AccountInfo>> {
        self.inner.accounts.get_active_account().await
    }

    /// Changes (or clears) the active account.
    pub async fn set_active_account(&self, account_id: Option<&str>) -> Result<()> {
        self.inner.accounts.set_active_account(account_id).await
    }

    /// Routes both transports into one ordered queue: messages of one
    /// transport are handled in arrival order, which keeps a non-terminal
    /// Acknowledge from racing past the response following it.
    fn register_listeners(&self) {
        let (queue, mut receiver) =
            tokio::sync::mpsc::unbounded_channel::<(String, ConnectionContext)>();

        let transports: [Arc<dyn Transport>; 2] = [
            self.inner.relay_transport.clone(),
            self.inner.direct_transport.clone(),
        ];
        for transport in transports {
            let queue = queue.clone();
            transport.add_listener(Arc::new(move |payload, context| {
                let _ = queue.send((payload, context));
            }));
        }

        let weak = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = receiver.recv() => match received {
                        Some((payload, context)) => {
                            let Some(inner) = weak.upgrade() else { break };
                            inner.handle_incoming(payload, context).await;
                        }
                        None => break,
                    }
                }
            }
        });
    }

    fn arm_race(
        &self,
        kind: TransportKind,
        transport: Arc<dyn Transport>,
        other: Arc<dyn Transport>,
        race: CancellationToken,
    ) {
        let weak = Arc::downgrade(&self.inner);
        transport.listen_for_new_peer(Arc::new(move |peer| {
            // A losing transport can still observe a late pairing before
            // cancellation propagates; the settled token makes it a no-op.
            if race.is_cancelled() {
                debug!(?kind, "ignoring pairing event after race settled");
                return;
            }
            race.cancel();

            let Some(inner) = weak.upgrade() else { return };
            inner.set_active(kind);
            info!(name = %peer.name, ?kind, "transport race won");
            other.stop_listening_for_new_peers();
            inner.events.emit(&ClientEvent::PairSuccess { kind });
        }));
    }

    fn spawn_sweeper(&self) {
        if self.inner.config.request_timeout().is_none() {
            return;
        }
        let pending = self.inner.pending.clone();
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => pending.sweep_expired(),
                }
            }
        });
    }
}

impl DappInner {
    fn active_kind(&self) -> Option<TransportKind> {
        *self.active.borrow()
    }

    fn set_active(&self, kind: TransportKind) {
        // send_replace updates the value even with no receivers around.
        self.active.send_replace(Some(kind));
    }

    fn transport_for(&self, kind: TransportKind) -> Arc<dyn Transport> {
        match kind {
            TransportKind::Relay => self.relay_transport.clone(),
            TransportKind::Direct => self.direct_transport.clone(),
        }
    }

    fn active_transport(&self) -> Option<Arc<dyn Transport>> {
        self.active_kind().map(|kind| self.transport_for(kind))
    }

    fn own_metadata(&self) -> AppMetadata {
        AppMetadata {
            sender_id: self.identity.sender_id(),
            name: self.config.name.clone(),
            icon: self.config.icon_url.clone(),
        }
    }

    async fn handle_incoming(&self, payload: String, context: ConnectionContext) {
        let serializer = self.serializer_for(&context).await;
        let message: Message = match serializer.deserialize(&payload) {
            Ok(message) => message,
            Err(error) => {
                debug!(%error, "dropping undecodable payload");
                return;
            }
        };

        let id = message.id().to_string();
        let has_pending = self.pending.contains(&id);

        match (message, has_pending) {
            (Message::Acknowledge(_), true) => {
                // Non-terminal: the entry stays open for the real
                // response.
                debug!(%id, "acknowledge received");
                self.events.emit(&ClientEvent::AcknowledgeReceived { id });
            }
            (Message::Error(error), true) => {
                debug!(%id, "remote error received");
                self.pending.reject(&id, ClientError::Remote(error));
            }
            (message, true) => {
                self.pending.resolve(&id, message, context);
            }
            (Message::Disconnect(disconnect), false) => {
                self.handle_disconnect(&disconnect.sender_id, context.origin)
                    .await;
            }
            (message, false) => {
                warn!(id = message.id(), type_name = message.type_name(),
                    "no open request found for message");
            }
        }
    }

    async fn handle_disconnect(&self, sender_id: &str, origin: TransportKind) {
        info!(sender_id, "peer disconnected");
        let transport = self.transport_for(origin);

        let peers = match transport.get_peers().await {
            Ok(peers) => peers,
            Err(error) => {
                warn!(%error, "failed to read peers while handling disconnect");
                return;
            }
        };

        match peers.into_iter().find(|p| p.sender_id == sender_id) {
            Some(peer) => {
                if let Err(error) = transport.remove_peer(&peer.public_key).await {
                    warn!(%error, "failed to remove disconnected peer");
                }
                if let Err(error) = self
                    .accounts
                    .remove_accounts_for_sender_ids(&[peer.sender_id])
                    .await
                {
                    warn!(%error, "failed to remove accounts of disconnected peer");
                }
                self.events.emit(&ClientEvent::ChannelClosed);
            }
            None => warn!(sender_id, "cannot find peer for sender id"),
        }
    }

    async fn on_permission_granted(
        &self,
        response: &PermissionResponse,
        origin: TransportKind,
    ) -> Result<()> {
        let account = AccountInfo {
            account_id: response.address.clone(),
            sender_id: response.sender_id.clone(),
            address: response.address.clone(),
            public_key: response.public_key.clone(),
            scopes: response.scopes.clone(),
            origin,
        };
        self.accounts.add_account(account).await?;
        self.accounts
            .set_active_account(Some(&response.address))
            .await?;
        info!(address = %response.address, "permissions granted");
        Ok(())
    }

    async fn send_disconnect(
        &self,
        transport: &Arc<dyn Transport>,
        peer: &PeerRecord,
    ) -> Result<()> {
        let message = Message::Disconnect(Disconnect {
            id: generate_id(),
            version: peer.version.clone(),
            sender_id: self.identity.sender_id(),
        });
        let serializer = Serializer::for_version(&peer.version).unwrap_or_default();
        let payload = serializer.serialize(&message)?;
        transport.send(&payload, Some(peer)).await
    }

    /// Picks the serializer by the sending peer's recorded protocol
    /// version; unknown peers get the current default.
    async fn serializer_for(&self, context: &ConnectionContext) -> Serializer {
        let transport = self.transport_for(context.origin);
        if let Ok(peers) = transport.get_peers().await {
            if let Some(peer) = peers.iter().find(|p| p.public_key == context.id) {
                return Serializer::for_version(&peer.version).unwrap_or_default();
            }
        }
        Serializer::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::InMemoryRelay;
    use crate::storage::InMemoryStorage;

    async fn client_with_storage(storage: Arc<dyn Storage>) -> DappClient {
        DappClient::new(
            ClientConfig::new("test-dapp"),
            storage,
            Arc::new(InMemoryRelay::new()),
            Arc::new(DirectHub::new()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_identity_persists_across_restarts() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());

        let first = client_with_storage(storage.clone()).await;
        let sender_id = first.sender_id();
        first.destroy().await.unwrap();

        let second = client_with_storage(storage).await;
        assert_eq!(second.sender_id(), sender_id);
    }

    #[tokio::test]
    async fn test_request_without_transport_fails() {
        let client = client_with_storage(Arc::new(InMemoryStorage::new())).await;

        let err = client.request_broadcast("deadbeef").await.unwrap_err();
        assert!(matches!(err, ClientError::NoTransport));
    }

    #[tokio::test]
    async fn test_rate_limit_trips_before_transport_lookup() {
        let client = client_with_storage(Arc::new(InMemoryStorage::new())).await;

        // The first two calls fail later in the pipeline, but their
        // timestamps are recorded (fail-open recording).
        for _ in 0..2 {
            assert!(matches!(
                client.request_broadcast("00").await.unwrap_err(),
                ClientError::NoTransport
            ));
        }
        assert!(matches!(
            client.request_broadcast("00").await.unwrap_err(),
            ClientError::RateLimited
        ));
    }

    #[tokio::test]
    async fn test_operation_without_permission_fails() {
        let client = client_with_storage(Arc::new(InMemoryStorage::new())).await;

        let err = client
            .request_operation("addr-1", serde_json::json!([]))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::PermissionDenied));
    }

    #[tokio::test]
    async fn test_connect_arms_both_transports() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let client = client_with_storage(storage).await;

        let outcome = client.connect().await.unwrap();
        assert!(matches!(outcome, ConnectOutcome::AwaitingPairing { .. }));
        if let ConnectOutcome::AwaitingPairing { relay, direct } = outcome {
            assert!(relay.is_some());
            assert!(direct.is_some());
        }

        // Both transports are now listening for pairing.
        assert_eq!(
            client.transport_status(TransportKind::Direct),
            TransportStatus::Connecting
        );
        assert_eq!(
            client.transport_status(TransportKind::Relay),
            TransportStatus::Connecting
        );
    }
}
