//! # PairLink Protocol Library
//!
//! Wire-level definitions and cryptographic primitives for PairLink, the
//! secure pairing and transport layer between a dapp and a wallet.
//!
//! ## Overview
//!
//! This crate is the foundation of PairLink's communication layer,
//! providing:
//!
//! - **Identity**: deterministic Ed25519 keypair derivation from a seed,
//!   plus the identity hash (relay addressing) and sender id (message
//!   correlation) derived from a public key
//! - **Session Crypto**: per-peer symmetric keys from an X25519 exchange,
//!   XChaCha20-Poly1305 authenticated encryption, and the anonymous
//!   sealed-box used to bootstrap pairing
//! - **Messages**: the versioned request/response envelope set and the
//!   pairing payloads
//! - **Serializer**: version-dependent wire framing (base58-check for v1,
//!   plain JSON from v2)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Request/Response Messages        │  JSON envelopes
//! ├─────────────────────────────────────────┤
//! │          Versioned Serializer           │  v1 base58-check / v2 JSON
//! ├─────────────────────────────────────────┤
//! │           Session Encryption            │  XChaCha20-Poly1305
//! ├─────────────────────────────────────────┤
//! │       Transport (relay / direct)        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`crypto`]: identity derivation and public-key identifiers
//! - [`session`]: session keys, authenticated encryption, sealed boxes
//! - [`messages`]: protocol message definitions
//! - [`serializer`]: versioned wire framing
//! - [`error`]: error types

pub mod crypto;
pub mod error;
pub mod messages;
pub mod serializer;
pub mod session;

pub use crypto::{identity_hash_from_hex, sender_id_from_hex, Identity};
pub use error::{ProtocolError, Result};
pub use messages::{Message, PairingPayload, PROTOCOL_VERSION};
pub use serializer::Serializer;
pub use session::{open_sealed, seal, Role, SessionKeys};
