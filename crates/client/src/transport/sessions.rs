//! Per-transport session key registry.
//!
//! Caches derived session keys per peer for the process lifetime and
//! performs the encrypt/decrypt work for its transport. Decryption is by
//! trial against every registered peer: on a multiplexed channel the
//! sender is only known once some key authenticates the frame.

use dashmap::DashMap;
use std::sync::Arc;

use protocol::session::{Role, SessionKeys};
use protocol::Identity;

use crate::error::Result;

/// Session keys and live decrypt listeners for one transport.
pub struct SessionStore {
    identity: Arc<Identity>,
    /// Transmit keys, derived lazily per recipient.
    tx_keys: DashMap<String, SessionKeys>,
    /// Receive keys; an entry here is a live listener for that peer.
    rx_keys: DashMap<String, SessionKeys>,
}

impl SessionStore {
    pub fn new(identity: Arc<Identity>) -> Self {
        Self {
            identity,
            tx_keys: DashMap::new(),
            rx_keys: DashMap::new(),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Encrypts a payload for one recipient, returning hex ciphertext.
    pub fn encrypt_for(&self, peer_public_key: &str, plaintext: &str) -> Result<String> {
        let keys = match self.tx_keys.get(peer_public_key) {
            Some(keys) => keys.clone(),
            None => {
                let keys = SessionKeys::derive(&self.identity, peer_public_key, Role::Initiator)?;
                self.tx_keys
                    .insert(peer_public_key.to_string(), keys.clone());
                keys
            }
        };

        Ok(hex::encode(keys.encrypt(plaintext)?))
    }

    /// Registers the decrypt listener for a peer. Idempotent.
    pub fn register_peer(&self, peer_public_key: &str) -> Result<()> {
        if self.rx_keys.contains_key(peer_public_key) {
            return Ok(());
        }
        let keys = SessionKeys::derive(&self.identity, peer_public_key, Role::Responder)?;
        self.rx_keys.insert(peer_public_key.to_string(), keys);
        Ok(())
    }

    /// Drops the listener and cached keys for a peer.
    pub fn unregister_peer(&self, peer_public_key: &str) {
        self.rx_keys.remove(peer_public_key);
        self.tx_keys.remove(peer_public_key);
    }

    /// Drops every listener and cached key.
    pub fn clear(&self) {
        self.rx_keys.clear();
        self.tx_keys.clear();
    }

    /// Public keys with a live decrypt listener.
    pub fn registered_peers(&self) -> Vec<String> {
        self.rx_keys.iter().map(|e| e.key().clone()).collect()
    }

    /// Tries every registered peer's receive keys against a frame.
    ///
    /// Returns the sending peer's public key and the plaintext on
    /// success; `None` means the frame was not addressed to us.
    pub fn try_decrypt(&self, payload: &[u8]) -> Option<(String, String)> {
        for entry in self.rx_keys.iter() {
            if let Ok(plaintext) = entry.value().decrypt(payload) {
                return Some((entry.key().clone(), plaintext));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(seed: &str) -> SessionStore {
        SessionStore::new(Arc::new(Identity::from_seed(seed).unwrap()))
    }

    #[test]
    fn test_encrypt_decrypt_between_stores() {
        let dapp = store("dapp");
        let wallet = store("wallet");

        wallet
            .register_peer(&dapp.identity().public_key_hex())
            .unwrap();

        let frame = dapp
            .encrypt_for(&wallet.identity().public_key_hex(), "ping")
            .unwrap();
        let bytes = hex::decode(frame).unwrap();

        let (sender, plaintext) = wallet.try_decrypt(&bytes).unwrap();
        assert_eq!(sender, dapp.identity().public_key_hex());
        assert_eq!(plaintext, "ping");
    }

    #[test]
    fn test_foreign_frame_is_not_decrypted() {
        let dapp = store("dapp");
        let wallet = store("wallet");
        let bystander = store("bystander");

        // Bystander listens for the dapp, but the frame is for the wallet.
        bystander
            .register_peer(&dapp.identity().public_key_hex())
            .unwrap();

        let frame = dapp
            .encrypt_for(&wallet.identity().public_key_hex(), "secret")
            .unwrap();
        let bytes = hex::decode(frame).unwrap();

        assert!(bystander.try_decrypt(&bytes).is_none());
    }

    #[test]
    fn test_unregister_stops_decryption() {
        let dapp = store("dapp");
        let wallet = store("wallet");

        wallet
            .register_peer(&dapp.identity().public_key_hex())
            .unwrap();
        wallet.unregister_peer(&dapp.identity().public_key_hex());

        let frame = dapp
            .encrypt_for(&wallet.identity().public_key_hex(), "late")
            .unwrap();
        assert!(wallet.try_decrypt(&hex::decode(frame).unwrap()).is_none());
        assert!(wallet.registered_peers().is_empty());
    }

    #[test]
    fn test_register_is_idempotent() {
        let wallet = store("wallet");
        let dapp = store("dapp");
        let pk = dapp.identity().public_key_hex();

        wallet.register_peer(&pk).unwrap();
        wallet.register_peer(&pk).unwrap();
        assert_eq!(wallet.registered_peers().len(), 1);
    }
}
