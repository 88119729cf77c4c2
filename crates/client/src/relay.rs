//! Relay selection and the relay collaborator seam.
//!
//! A relay is an untrusted message-relaying service addressed by server
//! hostname and recipient identity hash. Selection is deterministic so two
//! processes holding the same identity converge on the same relay set
//! without coordination; redundancy comes from repeating the selection
//! under different salts.

use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;

use crate::error::Result;

/// Deterministically picks one relay out of `candidates` for an identity.
///
/// The identity hash and every candidate hostname are salted with the same
/// value and hashed; the candidate minimizing the absolute 256-bit
/// distance to the identity's salted hash wins. Returns `None` when no
/// candidates are configured.
pub fn select_relay<'a>(
    identity_hash: &str,
    candidates: &'a [String],
    salt: u32,
) -> Option<&'a str> {
    let own = salted_hash(identity_hash, salt);

    candidates
        .iter()
        .map(|candidate| {
            let distance = absolute_distance(&own, &salted_hash(candidate, salt));
            (distance, candidate)
        })
        .min_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, candidate)| candidate.as_str())
}

/// Runs [`select_relay`] under salts `0..replication_count` and returns
/// the deduplicated relay set, in selection order. The client opens one
/// connection per entry.
pub fn select_relays(
    identity_hash: &str,
    candidates: &[String],
    replication_count: u32,
) -> Vec<String> {
    let mut selected: Vec<String> = Vec::new();
    for salt in 0..replication_count.max(1) {
        if let Some(server) = select_relay(identity_hash, candidates, salt) {
            if !selected.iter().any(|s| s == server) {
                selected.push(server.to_string());
            }
        }
    }
    selected
}

fn salted_hash(input: &str, salt: u32) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hasher.update(salt.to_string().as_bytes());
    hasher.finalize().into()
}

/// Absolute difference of two 256-bit big-endian integers.
///
/// Big-endian byte arrays of equal length compare lexicographically the
/// same way the integers compare, so the result can be ordered with a
/// plain array comparison.
fn absolute_distance(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let (high, low) = if a >= b { (a, b) } else { (b, a) };

    let mut out = [0u8; 32];
    let mut borrow = 0i16;
    for i in (0..32).rev() {
        let mut diff = high[i] as i16 - low[i] as i16 - borrow;
        if diff < 0 {
            diff += 256;
            borrow = 1;
        } else {
            borrow = 0;
        }
        out[i] = diff as u8;
    }
    out
}

/// Address of one recipient on one relay server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelayAddress {
    /// Identity hash of the recipient.
    pub recipient_hash: String,
    /// Relay server hostname.
    pub server: String,
}

impl fmt::Display for RelayAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}:{}", self.recipient_hash, self.server)
    }
}

/// One text message delivered by a relay.
#[derive(Debug, Clone)]
pub struct RelayMessage {
    /// The delivered payload, hex ciphertext at this layer.
    pub content: String,
}

/// The opaque bidirectional relay channel.
///
/// The relay's internal membership and sync protocol is out of scope; the
/// core only needs "send text to address" and "subscribe to text for an
/// address". Implementations map I/O failures to
/// `ClientError::TransportSend`.
#[async_trait]
pub trait RelayNetwork: Send + Sync {
    /// Sends a text payload to the given address.
    async fn send(&self, address: &RelayAddress, payload: String) -> Result<()>;

    /// Subscribes to payloads addressed to `address`.
    async fn subscribe(&self, address: &RelayAddress) -> broadcast::Receiver<RelayMessage>;
}

const RELAY_CHANNEL_CAPACITY: usize = 256;

/// In-process relay network.
///
/// Routes payloads between subscribers of the same address. Used by tests
/// and by embedders that bridge both sides inside one process.
pub struct InMemoryRelay {
    channels: DashMap<String, broadcast::Sender<RelayMessage>>,
}

impl InMemoryRelay {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    fn channel(&self, address: &RelayAddress) -> broadcast::Sender<RelayMessage> {
        self.channels
            .entry(address.to_string())
            .or_insert_with(|| broadcast::channel(RELAY_CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for InMemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelayNetwork for InMemoryRelay {
    async fn send(&self, address: &RelayAddress, payload: String) -> Result<()> {
        // A send with no subscribers is not an error; relays hold no
        // delivery guarantee for absent recipients.
        let _ = self.channel(address).send(RelayMessage { content: payload });
        Ok(())
    }

    async fn subscribe(&self, address: &RelayAddress) -> broadcast::Receiver<RelayMessage> {
        self.channel(address).subscribe()
    }
}
