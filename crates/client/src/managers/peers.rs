//! Known-peer management.
//!
//! A peer record exists per remote party, keyed by public key. Identity
//! equality is by public key, never by name; re-adding an existing key
//! overwrites the whole record.

use std::sync::Arc;

use protocol::messages::PairingPayload;
use protocol::sender_id_from_hex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{Storage, StorageManager};

/// A remote party known to this client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    /// Display name advertised during pairing.
    pub name: String,
    /// Hex-encoded Ed25519 public key. The peer's identity.
    pub public_key: String,
    /// Protocol version the peer speaks.
    pub version: String,
    /// Sender id derived from the public key.
    pub sender_id: String,
    /// Relay routing hint; absent for direct-channel peers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_url: Option<String>,
}

impl PeerRecord {
    /// Builds a record from a pairing payload, deriving the sender id.
    pub fn from_pairing(payload: &PairingPayload) -> Result<Self> {
        let sender_id = sender_id_from_hex(payload.public_key())?;
        Ok(Self {
            name: payload.name().to_string(),
            public_key: payload.public_key().to_string(),
            version: payload.version().to_string(),
            sender_id,
            relay_server: payload.relay_server().map(|s| s.to_string()),
            icon: payload.icon().map(|s| s.to_string()),
            app_url: payload.app_url().map(|s| s.to_string()),
        })
    }
}

/// Peer store for one transport, a thin CRUD wrapper over storage.
pub struct PeerManager {
    manager: StorageManager<PeerRecord>,
}

impl PeerManager {
    pub fn new(storage: Arc<dyn Storage>, storage_key: &str) -> Self {
        Self {
            manager: StorageManager::new(storage, storage_key),
        }
    }

    /// Returns all known peers.
    pub async fn get_peers(&self) -> Result<Vec<PeerRecord>> {
        self.manager.get_all().await
    }

    /// Returns the peer with the given public key, if known.
    pub async fn get_peer(&self, public_key: &str) -> Result<Option<PeerRecord>> {
        self.manager.get_one(|p| p.public_key == public_key).await
    }

    /// Whether any peer is known.
    pub async fn has_peers(&self) -> Result<bool> {
        Ok(!self.manager.get_all().await?.is_empty())
    }

    /// Adds a peer, overwriting any record with the same public key.
    pub async fn add_peer(&self, peer: PeerRecord) -> Result<()> {
        let public_key = peer.public_key.clone();
        self.manager
            .add_one(peer, |p| p.public_key == public_key)
            .await
    }

    /// Removes the peer with the given public key.
    pub async fn remove_peer(&self, public_key: &str) -> Result<()> {
        self.manager.remove(|p| p.public_key == public_key).await
    }

    /// Removes every peer.
    pub async fn remove_all_peers(&self) -> Result<()> {
        self.manager.remove_all().await
    }
}
