//! Session cryptography between two paired parties.
//!
//! Provides per-peer symmetric session keys derived from an X25519 key
//! exchange over the parties' converted Ed25519 identities, authenticated
//! encryption with XChaCha20-Poly1305, and the anonymous sealed-box
//! encryption used to bootstrap pairing before any session exists.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use ed25519_dalek::VerifyingKey;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{PublicKey as XPublicKey, StaticSecret};

use crate::crypto::{decode_public_key_hex, Identity};
use crate::error::{ProtocolError, Result};

/// Length of the random nonce prepended to every ciphertext.
pub const NONCE_LENGTH: usize = 24;

/// Length of the Poly1305 authentication tag appended to every ciphertext.
pub const TAG_LENGTH: usize = 16;

/// Length of the ephemeral public key prepended to a sealed payload.
pub const SEAL_PREFIX_LENGTH: usize = 32;

const SESSION_INFO_I2R: &[u8] = b"pairlink session i2r";
const SESSION_INFO_R2I: &[u8] = b"pairlink session r2i";
const SEAL_INFO_KEY: &[u8] = b"pairlink seal key";
const SEAL_INFO_NONCE: &[u8] = b"pairlink seal nonce";

/// The role the local party plays in one session-key derivation.
///
/// Roles are resolved per direction: "I am encrypting to you, so I act as
/// your initiator" and "I am decrypting from you, so I act as your
/// responder". The two sides of a channel must use mirrored roles for the
/// derived keys to line up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The encrypting side of the exchange.
    Initiator,
    /// The decrypting side of the exchange.
    Responder,
}

/// Symmetric transmit/receive keys for one peer pair.
///
/// Derived deterministically from the local keypair and the peer's public
/// key; never persisted. Recomputed per use or cached per peer for the
/// process lifetime.
#[derive(Clone)]
pub struct SessionKeys {
    tx: [u8; 32],
    rx: [u8; 32],
}

impl SessionKeys {
    /// Derives the session keys shared with `peer_public_key_hex`.
    ///
    /// Both Ed25519 keys are converted to their X25519 form, a shared
    /// secret is computed, and two directional keys are expanded from it
    /// with HKDF-SHA256 salted by the role-ordered public keys. The
    /// initiator's transmit key equals the responder's receive key and vice
    /// versa.
    pub fn derive(identity: &Identity, peer_public_key_hex: &str, role: Role) -> Result<Self> {
        let peer_key = decode_public_key_hex(peer_public_key_hex)?;
        let peer_verifying = VerifyingKey::from_bytes(&peer_key)?;

        let self_secret = StaticSecret::from(identity.signing_key().to_scalar_bytes());
        let self_public = XPublicKey::from(&self_secret);
        let peer_public = XPublicKey::from(peer_verifying.to_montgomery().to_bytes());

        let shared = self_secret.diffie_hellman(&peer_public);
        if !shared.was_contributory() {
            return Err(ProtocolError::InvalidPublicKey(
                "low-order key exchange input".into(),
            ));
        }

        let (initiator_public, responder_public) = match role {
            Role::Initiator => (self_public, peer_public),
            Role::Responder => (peer_public, self_public),
        };

        let mut salt = [0u8; 64];
        salt[..32].copy_from_slice(initiator_public.as_bytes());
        salt[32..].copy_from_slice(responder_public.as_bytes());

        let hk = Hkdf::<Sha256>::new(Some(&salt), shared.as_bytes());
        let mut i2r = [0u8; 32];
        let mut r2i = [0u8; 32];
        hk.expand(SESSION_INFO_I2R, &mut i2r)
            .expect("hkdf expand");
        hk.expand(SESSION_INFO_R2I, &mut r2i)
            .expect("hkdf expand");

        let (tx, rx) = match role {
            Role::Initiator => (i2r, r2i),
            Role::Responder => (r2i, i2r),
        };

        Ok(Self { tx, rx })
    }

    /// Encrypts a plaintext with the transmit key.
    ///
    /// Returns `nonce(24) || ciphertext+tag`.
    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce);

        let aead = XChaCha20Poly1305::new(Key::from_slice(&self.tx));
        let ciphertext = aead
            .encrypt(XNonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| ProtocolError::EncryptionFailed("aead seal".into()))?;

        let mut out = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypts `nonce(24) || ciphertext+tag` with the receive key.
    ///
    /// Inputs shorter than nonce + tag and inputs failing authentication
    /// both return `DecryptionFailed`. Neither is fatal: listeners on
    /// multiplexed channels receive messages not addressed to them and are
    /// expected to drop this error silently.
    pub fn decrypt(&self, payload: &[u8]) -> Result<String> {
        if payload.len() < NONCE_LENGTH + TAG_LENGTH {
            return Err(ProtocolError::DecryptionFailed);
        }

        let (nonce, ciphertext) = payload.split_at(NONCE_LENGTH);
        let aead = XChaCha20Poly1305::new(Key::from_slice(&self.rx));
        let plaintext = aead
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| ProtocolError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| ProtocolError::DecryptionFailed)
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys")
            .field("tx", &"[REDACTED]")
            .field("rx", &"[REDACTED]")
            .finish()
    }
}

/// Encrypts a payload so that only the holder of `recipient_public_key_hex`
/// can read it.
///
/// Used once per pairing, for the first message sent before any session
/// exists. An ephemeral X25519 keypair is generated, a key and nonce are
/// derived from its exchange with the recipient's converted key, and the
/// ephemeral public key is prepended: `ephemeral_pk(32) || ciphertext+tag`.
/// The recipient cannot learn the sender's identity from this primitive.
pub fn seal(payload: &str, recipient_public_key_hex: &str) -> Result<Vec<u8>> {
    let recipient_key = decode_public_key_hex(recipient_public_key_hex)?;
    let recipient_verifying = VerifyingKey::from_bytes(&recipient_key)?;
    let recipient_public = XPublicKey::from(recipient_verifying.to_montgomery().to_bytes());

    let ephemeral_secret = StaticSecret::random_from_rng(OsRng);
    let ephemeral_public = XPublicKey::from(&ephemeral_secret);

    let shared = ephemeral_secret.diffie_hellman(&recipient_public);
    if !shared.was_contributory() {
        return Err(ProtocolError::InvalidPublicKey(
            "low-order key exchange input".into(),
        ));
    }

    let (key, nonce) = seal_key_material(&ephemeral_public, &recipient_public, shared.as_bytes());

    let aead = XChaCha20Poly1305::new(Key::from_slice(&key));
    let ciphertext = aead
        .encrypt(XNonce::from_slice(&nonce), payload.as_bytes())
        .map_err(|_| ProtocolError::EncryptionFailed("sealed box".into()))?;

    let mut out = Vec::with_capacity(SEAL_PREFIX_LENGTH + ciphertext.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Opens a payload produced by [`seal`] addressed to `identity`.
///
/// Only the recipient keypair is required. Undersized or unauthentic input
/// returns `DecryptionFailed`.
pub fn open_sealed(payload: &[u8], identity: &Identity) -> Result<String> {
    if payload.len() < SEAL_PREFIX_LENGTH + TAG_LENGTH {
        return Err(ProtocolError::DecryptionFailed);
    }

    let (ephemeral_bytes, ciphertext) = payload.split_at(SEAL_PREFIX_LENGTH);
    let mut ephemeral_arr = [0u8; 32];
    ephemeral_arr.copy_from_slice(ephemeral_bytes);
    let ephemeral_public = XPublicKey::from(ephemeral_arr);

    let self_secret = StaticSecret::from(identity.signing_key().to_scalar_bytes());
    let self_public = XPublicKey::from(&self_secret);

    let shared = self_secret.diffie_hellman(&ephemeral_public);
    if !shared.was_contributory() {
        return Err(ProtocolError::DecryptionFailed);
    }

    let (key, nonce) = seal_key_material(&ephemeral_public, &self_public, shared.as_bytes());

    let aead = XChaCha20Poly1305::new(Key::from_slice(&key));
    let plaintext = aead
        .decrypt(XNonce::from_slice(&nonce), ciphertext)
        .map_err(|_| ProtocolError::DecryptionFailed)?;

    String::from_utf8(plaintext).map_err(|_| ProtocolError::DecryptionFailed)
}

/// Expands the sealed-box key and nonce from the ephemeral exchange.
///
/// The nonce is derived, not random: the ephemeral key is fresh per seal,
/// so the (key, nonce) pair never repeats.
fn seal_key_material(
    ephemeral_public: &XPublicKey,
    recipient_public: &XPublicKey,
    shared: &[u8],
) -> ([u8; 32], [u8; NONCE_LENGTH]) {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral_public.as_bytes());
    salt[32..].copy_from_slice(recipient_public.as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut key = [0u8; 32];
    let mut nonce = [0u8; NONCE_LENGTH];
    hk.expand(SEAL_INFO_KEY, &mut key).expect("hkdf expand");
    hk.expand(SEAL_INFO_NONCE, &mut nonce).expect("hkdf expand");

    (key, nonce)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_symmetry() {
        let alice = Identity::from_seed("alice").unwrap();
        let bob = Identity::from_seed("bob").unwrap();

        let alice_tx =
            SessionKeys::derive(&alice, &bob.public_key_hex(), Role::Initiator).unwrap();
        let bob_rx = SessionKeys::derive(&bob, &alice.public_key_hex(), Role::Responder).unwrap();

        let ciphertext = alice_tx.encrypt("hello bob").unwrap();
        assert_eq!(bob_rx.decrypt(&ciphertext).unwrap(), "hello bob");
    }

    #[test]
    fn test_session_symmetry_reverse_direction() {
        let alice = Identity::from_seed("alice").unwrap();
        let bob = Identity::from_seed("bob").unwrap();

        let bob_tx = SessionKeys::derive(&bob, &alice.public_key_hex(), Role::Initiator).unwrap();
        let alice_rx =
            SessionKeys::derive(&alice, &bob.public_key_hex(), Role::Responder).unwrap();

        let ciphertext = bob_tx.encrypt("hello alice").unwrap();
        assert_eq!(alice_rx.decrypt(&ciphertext).unwrap(), "hello alice");
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let alice = Identity::from_seed("alice").unwrap();
        let bob = Identity::from_seed("bob").unwrap();

        let a = SessionKeys::derive(&alice, &bob.public_key_hex(), Role::Initiator).unwrap();
        let b = SessionKeys::derive(&alice, &bob.public_key_hex(), Role::Initiator).unwrap();

        assert_eq!(a.tx, b.tx);
        assert_eq!(a.rx, b.rx);
    }

    #[test]
    fn test_mismatched_roles_fail() {
        let alice = Identity::from_seed("alice").unwrap();
        let bob = Identity::from_seed("bob").unwrap();

        let alice_tx =
            SessionKeys::derive(&alice, &bob.public_key_hex(), Role::Initiator).unwrap();
        // Bob also derives as initiator: his receive key does not match.
        let bob_wrong =
            SessionKeys::derive(&bob, &alice.public_key_hex(), Role::Initiator).unwrap();

        let ciphertext = alice_tx.encrypt("secret").unwrap();
        assert!(matches!(
            bob_wrong.decrypt(&ciphertext),
            Err(ProtocolError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_foreign_ciphertext_fails() {
        let alice = Identity::from_seed("alice").unwrap();
        let bob = Identity::from_seed("bob").unwrap();
        let carol = Identity::from_seed("carol").unwrap();

        let to_bob = SessionKeys::derive(&alice, &bob.public_key_hex(), Role::Initiator).unwrap();
        let carol_rx =
            SessionKeys::derive(&carol, &alice.public_key_hex(), Role::Responder).unwrap();

        let ciphertext = to_bob.encrypt("for bob only").unwrap();
        assert!(matches!(
            carol_rx.decrypt(&ciphertext),
            Err(ProtocolError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_short_input_is_rejected_not_fatal() {
        let alice = Identity::from_seed("alice").unwrap();
        let bob = Identity::from_seed("bob").unwrap();
        let keys = SessionKeys::derive(&alice, &bob.public_key_hex(), Role::Responder).unwrap();

        for len in 0..(NONCE_LENGTH + TAG_LENGTH) {
            let payload = vec![0u8; len];
            assert!(matches!(
                keys.decrypt(&payload),
                Err(ProtocolError::DecryptionFailed)
            ));
        }
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let alice = Identity::from_seed("alice").unwrap();
        let bob = Identity::from_seed("bob").unwrap();

        let tx = SessionKeys::derive(&alice, &bob.public_key_hex(), Role::Initiator).unwrap();
        let rx = SessionKeys::derive(&bob, &alice.public_key_hex(), Role::Responder).unwrap();

        let mut ciphertext = tx.encrypt("payload").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xff;

        assert!(matches!(
            rx.decrypt(&ciphertext),
            Err(ProtocolError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_sealed_round_trip() {
        let wallet = Identity::from_seed("wallet").unwrap();

        let sealed = seal("pairing payload", &wallet.public_key_hex()).unwrap();
        assert_eq!(open_sealed(&sealed, &wallet).unwrap(), "pairing payload");
    }

    #[test]
    fn test_sealed_wrong_recipient_fails() {
        let wallet = Identity::from_seed("wallet").unwrap();
        let other = Identity::from_seed("other").unwrap();

        let sealed = seal("pairing payload", &wallet.public_key_hex()).unwrap();
        assert!(matches!(
            open_sealed(&sealed, &other),
            Err(ProtocolError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_sealed_short_input_rejected() {
        let wallet = Identity::from_seed("wallet").unwrap();
        assert!(matches!(
            open_sealed(&[0u8; 10], &wallet),
            Err(ProtocolError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_seal_rejects_bad_public_key() {
        assert!(matches!(
            seal("x", "not-hex"),
            Err(ProtocolError::InvalidPublicKey(_))
        ));
    }
}
