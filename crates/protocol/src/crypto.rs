//! Cryptographic identity for PairLink parties.
//!
//! This module provides deterministic Ed25519 keypair derivation from a
//! persisted seed, plus the two identifiers derived from a public key:
//! the identity hash (relay addressing) and the sender id (message
//! correlation).

use ed25519_dalek::{SigningKey, VerifyingKey, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::error::{ProtocolError, Result};

/// Number of hash bytes that make up a sender id before base58-check encoding.
pub const SENDER_ID_HASH_LENGTH: usize = 5;

/// Derives the identity hash for a raw Ed25519 public key.
///
/// The identity hash is the lowercase hex SHA-256 of the public key bytes.
/// It is used as the recipient address on relay servers and is stable for a
/// given key across restarts.
pub fn identity_hash(public_key: &[u8; PUBLIC_KEY_LENGTH]) -> String {
    hex::encode(Sha256::digest(public_key))
}

/// Derives the identity hash for a hex-encoded public key.
pub fn identity_hash_from_hex(public_key_hex: &str) -> Result<String> {
    Ok(identity_hash(&decode_public_key_hex(public_key_hex)?))
}

/// Derives the sender id for a raw Ed25519 public key.
///
/// The sender id is the base58-check encoding of the first five bytes of the
/// SHA-256 of the public key. It is short enough to embed in every message
/// and deterministic, so messages can be correlated to a logical party
/// independent of transport routing.
pub fn sender_id(public_key: &[u8; PUBLIC_KEY_LENGTH]) -> String {
    let hash = Sha256::digest(public_key);
    bs58::encode(&hash[..SENDER_ID_HASH_LENGTH])
        .with_check()
        .into_string()
}

/// Derives the sender id for a hex-encoded public key.
pub fn sender_id_from_hex(public_key_hex: &str) -> Result<String> {
    Ok(sender_id(&decode_public_key_hex(public_key_hex)?))
}

/// Decodes a hex-encoded Ed25519 public key into its raw bytes.
pub fn decode_public_key_hex(public_key_hex: &str) -> Result<[u8; PUBLIC_KEY_LENGTH]> {
    let bytes = hex::decode(public_key_hex)
        .map_err(|e| ProtocolError::InvalidPublicKey(e.to_string()))?;
    if bytes.len() != PUBLIC_KEY_LENGTH {
        return Err(ProtocolError::InvalidPublicKey(format!(
            "expected {} bytes, got {}",
            PUBLIC_KEY_LENGTH,
            bytes.len()
        )));
    }
    let mut arr = [0u8; PUBLIC_KEY_LENGTH];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

/// The long-term signing identity of the local party.
///
/// Contains the full Ed25519 keypair and should be kept secure. The keypair
/// is derived deterministically from a persisted seed, so the same seed
/// always yields the same identity.
#[derive(Clone)]
pub struct Identity {
    /// The Ed25519 signing key (secret key).
    signing_key: SigningKey,
    /// The Ed25519 verifying key (public key), derived from signing_key.
    verifying_key: VerifyingKey,
}

impl Identity {
    /// Derives an identity from a seed string.
    ///
    /// The seed is hashed with SHA-256 into the 32 bytes the signing key is
    /// built from. Fails with `SeedInvalid` if the seed is empty.
    pub fn from_seed(seed: &str) -> Result<Self> {
        if seed.is_empty() {
            return Err(ProtocolError::SeedInvalid("seed must not be empty".into()));
        }

        let digest: [u8; SECRET_KEY_LENGTH] = Sha256::digest(seed.as_bytes()).into();
        let signing_key = SigningKey::from_bytes(&digest);
        let verifying_key = signing_key.verifying_key();

        Ok(Self {
            signing_key,
            verifying_key,
        })
    }

    /// Generates a new random identity.
    ///
    /// Used in tests and for throwaway clients; production clients derive
    /// from a stored seed so the identity survives restarts.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();

        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Returns the raw public key bytes.
    pub fn public_key(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.verifying_key.to_bytes()
    }

    /// Returns the public key as lowercase hex, the form it travels in
    /// pairing payloads.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key.to_bytes())
    }

    /// Returns the identity hash used as this party's relay address.
    pub fn identity_hash(&self) -> String {
        identity_hash(&self.public_key())
    }

    /// Returns the short sender id embedded in every outgoing message.
    pub fn sender_id(&self) -> String {
        sender_id(&self.public_key())
    }

    /// Returns the verifying key (public key).
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key_hex())
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_seed_is_deterministic() {
        let a = Identity::from_seed("test-seed").unwrap();
        let b = Identity::from_seed("test-seed").unwrap();

        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.sender_id(), b.sender_id());
        assert_eq!(a.identity_hash(), b.identity_hash());
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = Identity::from_seed("seed-a").unwrap();
        let b = Identity::from_seed("seed-b").unwrap();

        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_empty_seed_fails() {
        let err = Identity::from_seed("").unwrap_err();
        assert!(matches!(err, ProtocolError::SeedInvalid(_)));
    }

    #[test]
    fn test_generate_produces_unique_keys() {
        let a = Identity::generate();
        let b = Identity::generate();

        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_identity_hash_is_hex_sha256() {
        let identity = Identity::from_seed("hash-me").unwrap();
        let hash = identity.identity_hash();

        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, identity_hash_from_hex(&identity.public_key_hex()).unwrap());
    }

    #[test]
    fn test_sender_id_stable_across_derivations() {
        let identity = Identity::from_seed("sender").unwrap();

        let direct = identity.sender_id();
        let via_hex = sender_id_from_hex(&identity.public_key_hex()).unwrap();

        assert_eq!(direct, via_hex);
        assert!(!direct.is_empty());
    }

    #[test]
    fn test_decode_public_key_hex_rejects_bad_input() {
        assert!(matches!(
            decode_public_key_hex("zz"),
            Err(ProtocolError::InvalidPublicKey(_))
        ));
        assert!(matches!(
            decode_public_key_hex("abcd"),
            Err(ProtocolError::InvalidPublicKey(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let identity = Identity::generate();
        let debug = format!("{:?}", identity);

        assert!(debug.contains("REDACTED"));
        assert!(debug.contains("public_key"));
    }
}
