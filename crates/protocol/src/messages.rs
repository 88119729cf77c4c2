//! Protocol message definitions for PairLink.
//!
//! This module defines the wire envelope for request/response traffic
//! between a dapp and a wallet, plus the pairing payloads exchanged before
//! a session exists. Every envelope carries the triple `{id, version,
//! senderId}` used by the correlation layer; the remaining fields are
//! type-specific. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

/// Current protocol version, attached to outgoing messages and pairing
/// payloads. Version 1 peers still exist; see the serializer for the
/// difference in framing.
pub const PROTOCOL_VERSION: &str = "2";

/// Top-level message envelope containing all message types.
///
/// Serialized as an internally tagged object: `{"type": "...", "id": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Ask the wallet to grant a set of permission scopes.
    #[serde(rename = "permission_request")]
    PermissionRequest(PermissionRequest),
    /// Grant (or partial grant) of a permission request.
    #[serde(rename = "permission_response")]
    PermissionResponse(PermissionResponse),
    /// Ask the wallet to inject and forge an operation.
    #[serde(rename = "operation_request")]
    OperationRequest(OperationRequest),
    /// Result of a completed operation request.
    #[serde(rename = "operation_response")]
    OperationResponse(OperationResponse),
    /// Ask the wallet to sign an arbitrary payload.
    #[serde(rename = "sign_payload_request")]
    SignPayloadRequest(SignPayloadRequest),
    /// Signature produced for a sign request.
    #[serde(rename = "sign_payload_response")]
    SignPayloadResponse(SignPayloadResponse),
    /// Ask the wallet to broadcast a signed transaction.
    #[serde(rename = "broadcast_request")]
    BroadcastRequest(BroadcastRequest),
    /// Result of a broadcast request.
    #[serde(rename = "broadcast_response")]
    BroadcastResponse(BroadcastResponse),
    /// Non-terminal signal that a request was received and is being
    /// processed. Does not resolve the pending request.
    #[serde(rename = "acknowledge")]
    Acknowledge(Acknowledge),
    /// The sending peer is closing the channel.
    #[serde(rename = "disconnect")]
    Disconnect(Disconnect),
    /// Terminal structured error for a pending request.
    #[serde(rename = "error")]
    Error(ErrorResponse),
}

impl Message {
    /// The envelope id, unique per request and echoed by responses.
    pub fn id(&self) -> &str {
        match self {
            Message::PermissionRequest(m) => &m.id,
            Message::PermissionResponse(m) => &m.id,
            Message::OperationRequest(m) => &m.id,
            Message::OperationResponse(m) => &m.id,
            Message::SignPayloadRequest(m) => &m.id,
            Message::SignPayloadResponse(m) => &m.id,
            Message::BroadcastRequest(m) => &m.id,
            Message::BroadcastResponse(m) => &m.id,
            Message::Acknowledge(m) => &m.id,
            Message::Disconnect(m) => &m.id,
            Message::Error(m) => &m.id,
        }
    }

    /// The protocol version the sender speaks.
    pub fn version(&self) -> &str {
        match self {
            Message::PermissionRequest(m) => &m.version,
            Message::PermissionResponse(m) => &m.version,
            Message::OperationRequest(m) => &m.version,
            Message::OperationResponse(m) => &m.version,
            Message::SignPayloadRequest(m) => &m.version,
            Message::SignPayloadResponse(m) => &m.version,
            Message::BroadcastRequest(m) => &m.version,
            Message::BroadcastResponse(m) => &m.version,
            Message::Acknowledge(m) => &m.version,
            Message::Disconnect(m) => &m.version,
            Message::Error(m) => &m.version,
        }
    }

    /// The short hash identifying the logical sending party.
    pub fn sender_id(&self) -> &str {
        match self {
            Message::PermissionRequest(m) => &m.sender_id,
            Message::PermissionResponse(m) => &m.sender_id,
            Message::OperationRequest(m) => &m.sender_id,
            Message::OperationResponse(m) => &m.sender_id,
            Message::SignPayloadRequest(m) => &m.sender_id,
            Message::SignPayloadResponse(m) => &m.sender_id,
            Message::BroadcastRequest(m) => &m.sender_id,
            Message::BroadcastResponse(m) => &m.sender_id,
            Message::Acknowledge(m) => &m.sender_id,
            Message::Disconnect(m) => &m.sender_id,
            Message::Error(m) => &m.sender_id,
        }
    }

    /// The wire name of this message type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::PermissionRequest(_) => "permission_request",
            Message::PermissionResponse(_) => "permission_response",
            Message::OperationRequest(_) => "operation_request",
            Message::OperationResponse(_) => "operation_response",
            Message::SignPayloadRequest(_) => "sign_payload_request",
            Message::SignPayloadResponse(_) => "sign_payload_response",
            Message::BroadcastRequest(_) => "broadcast_request",
            Message::BroadcastResponse(_) => "broadcast_response",
            Message::Acknowledge(_) => "acknowledge",
            Message::Disconnect(_) => "disconnect",
            Message::Error(_) => "error",
        }
    }

    /// Whether this is a caller-initiated request (as opposed to a
    /// response or a control message).
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Message::PermissionRequest(_)
                | Message::OperationRequest(_)
                | Message::SignPayloadRequest(_)
                | Message::BroadcastRequest(_)
        )
    }
}

/// A permission scope granted to a dapp by a wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionScope {
    /// Sign arbitrary payloads.
    Sign,
    /// Forge and inject operations.
    OperationRequest,
}

/// Metadata describing the requesting application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppMetadata {
    /// Sender id of the application, derived from its public key.
    pub sender_id: String,
    /// Human-readable application name.
    pub name: String,
    /// Optional icon URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

// ============================================================================
// Request / response payloads
// ============================================================================

/// Ask the wallet to grant permission scopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    pub id: String,
    pub version: String,
    pub sender_id: String,
    /// Metadata of the dapp asking for permissions.
    pub app_metadata: AppMetadata,
    /// The scopes being requested.
    pub scopes: Vec<PermissionScope>,
}

/// Scopes granted by the wallet, together with the account they apply to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionResponse {
    pub id: String,
    pub version: String,
    pub sender_id: String,
    /// Metadata of the responding wallet.
    pub app_metadata: AppMetadata,
    /// Public key of the granted account.
    pub public_key: String,
    /// Address of the granted account.
    pub address: String,
    /// The scopes that were granted.
    pub scopes: Vec<PermissionScope>,
}

/// Ask the wallet to forge and inject an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    pub id: String,
    pub version: String,
    pub sender_id: String,
    /// Address of the account the operation originates from.
    pub source_address: String,
    /// Chain-specific operation body, passed through opaquely.
    pub operation_details: serde_json::Value,
}

/// Hash of an injected operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResponse {
    pub id: String,
    pub version: String,
    pub sender_id: String,
    pub transaction_hash: String,
}

/// Ask the wallet to sign an arbitrary payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignPayloadRequest {
    pub id: String,
    pub version: String,
    pub sender_id: String,
    /// Address of the account asked to sign.
    pub source_address: String,
    /// The payload to sign, hex-encoded.
    pub payload: String,
}

/// Signature produced by the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignPayloadResponse {
    pub id: String,
    pub version: String,
    pub sender_id: String,
    pub signature: String,
}

/// Ask the wallet to broadcast an already-signed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
    pub id: String,
    pub version: String,
    pub sender_id: String,
    /// The signed transaction bytes, hex-encoded.
    pub signed_transaction: String,
}

/// Hash of a broadcast transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastResponse {
    pub id: String,
    pub version: String,
    pub sender_id: String,
    pub transaction_hash: String,
}

/// Non-terminal "request received" signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledge {
    pub id: String,
    pub version: String,
    pub sender_id: String,
}

/// Channel-closing notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disconnect {
    pub id: String,
    pub version: String,
    pub sender_id: String,
}

/// Terminal structured error sent instead of a typed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub id: String,
    pub version: String,
    pub sender_id: String,
    /// Machine-readable error classification.
    pub error_type: ErrorType,
    /// Optional human-readable detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Classification of a remote error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    /// The user aborted the request in the wallet.
    Aborted,
    /// The requested scope was never granted.
    NotGranted,
    /// The request parameters were malformed or unsupported.
    ParametersInvalid,
    /// The request contained more operations than the wallet accepts.
    TooManyOperations,
    /// The transaction was rejected by the node.
    TransactionInvalid,
    /// Broadcasting failed.
    BroadcastError,
    /// Anything else.
    UnknownError,
}

// ============================================================================
// Pairing payloads
// ============================================================================

/// Handshake payload exchanged before a session exists.
///
/// The requesting side (usually the dapp) exposes a pairing request for QR
/// or deeplink display; the responding side (the wallet) answers with the
/// matching response, sealed to the requester's public key. Relay payloads
/// carry the routing hint needed to reach the requester; direct payloads do
/// not, the channel itself is the route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PairingPayload {
    #[serde(rename = "relay-pairing-request")]
    RelayPairingRequest(RelayPairing),
    #[serde(rename = "relay-pairing-response")]
    RelayPairingResponse(RelayPairing),
    #[serde(rename = "direct-pairing-request")]
    DirectPairingRequest(DirectPairing),
    #[serde(rename = "direct-pairing-response")]
    DirectPairingResponse(DirectPairing),
}

impl PairingPayload {
    pub fn id(&self) -> &str {
        match self {
            PairingPayload::RelayPairingRequest(p) | PairingPayload::RelayPairingResponse(p) => {
                &p.id
            }
            PairingPayload::DirectPairingRequest(p)
            | PairingPayload::DirectPairingResponse(p) => &p.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            PairingPayload::RelayPairingRequest(p) | PairingPayload::RelayPairingResponse(p) => {
                &p.name
            }
            PairingPayload::DirectPairingRequest(p)
            | PairingPayload::DirectPairingResponse(p) => &p.name,
        }
    }

    pub fn version(&self) -> &str {
        match self {
            PairingPayload::RelayPairingRequest(p) | PairingPayload::RelayPairingResponse(p) => {
                &p.version
            }
            PairingPayload::DirectPairingRequest(p)
            | PairingPayload::DirectPairingResponse(p) => &p.version,
        }
    }

    pub fn public_key(&self) -> &str {
        match self {
            PairingPayload::RelayPairingRequest(p) | PairingPayload::RelayPairingResponse(p) => {
                &p.public_key
            }
            PairingPayload::DirectPairingRequest(p)
            | PairingPayload::DirectPairingResponse(p) => &p.public_key,
        }
    }

    /// The relay routing hint, present only for relay-mediated pairing.
    pub fn relay_server(&self) -> Option<&str> {
        match self {
            PairingPayload::RelayPairingRequest(p) | PairingPayload::RelayPairingResponse(p) => {
                Some(&p.relay_server)
            }
            _ => None,
        }
    }

    pub fn icon(&self) -> Option<&str> {
        match self {
            PairingPayload::RelayPairingRequest(p) | PairingPayload::RelayPairingResponse(p) => {
                p.icon.as_deref()
            }
            PairingPayload::DirectPairingRequest(p)
            | PairingPayload::DirectPairingResponse(p) => p.icon.as_deref(),
        }
    }

    pub fn app_url(&self) -> Option<&str> {
        match self {
            PairingPayload::RelayPairingRequest(p) | PairingPayload::RelayPairingResponse(p) => {
                p.app_url.as_deref()
            }
            PairingPayload::DirectPairingRequest(p)
            | PairingPayload::DirectPairingResponse(p) => p.app_url.as_deref(),
        }
    }
}

/// Pairing payload for relay-mediated transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayPairing {
    pub id: String,
    pub name: String,
    pub version: String,
    /// Hex-encoded Ed25519 public key of the payload's author.
    pub public_key: String,
    /// Relay server where the author is listening.
    pub relay_server: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_url: Option<String>,
}

/// Pairing payload for direct (in-process / extension) transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectPairing {
    pub id: String,
    pub name: String,
    pub version: String,
    /// Hex-encoded Ed25519 public key of the payload's author.
    pub public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acknowledge() -> Message {
        Message::Acknowledge(Acknowledge {
            id: "id-1".into(),
            version: PROTOCOL_VERSION.into(),
            sender_id: "sender-1".into(),
        })
    }

    #[test]
    fn test_envelope_accessors() {
        let message = acknowledge();
        assert_eq!(message.id(), "id-1");
        assert_eq!(message.version(), "2");
        assert_eq!(message.sender_id(), "sender-1");
        assert!(!message.is_request());
    }

    #[test]
    fn test_message_is_internally_tagged() {
        let json = serde_json::to_value(acknowledge()).unwrap();
        assert_eq!(json["type"], "acknowledge");
        assert_eq!(json["id"], "id-1");
        assert_eq!(json["senderId"], "sender-1");
    }

    #[test]
    fn test_request_classification() {
        let request = Message::PermissionRequest(PermissionRequest {
            id: "id-2".into(),
            version: PROTOCOL_VERSION.into(),
            sender_id: "sender-1".into(),
            app_metadata: AppMetadata {
                sender_id: "sender-1".into(),
                name: "dapp".into(),
                icon: None,
            },
            scopes: vec![PermissionScope::Sign],
        });
        assert!(request.is_request());
    }

    #[test]
    fn test_message_round_trip() {
        let message = Message::OperationRequest(OperationRequest {
            id: "op-1".into(),
            version: PROTOCOL_VERSION.into(),
            sender_id: "sender-1".into(),
            source_address: "addr1".into(),
            operation_details: serde_json::json!([{ "kind": "transaction", "amount": "1" }]),
        });

        let json = serde_json::to_string(&message).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(message, back);
    }

    #[test]
    fn test_error_type_wire_names() {
        let json = serde_json::to_value(ErrorType::NotGranted).unwrap();
        assert_eq!(json, "NOT_GRANTED");
        let json = serde_json::to_value(ErrorType::TooManyOperations).unwrap();
        assert_eq!(json, "TOO_MANY_OPERATIONS");
    }

    #[test]
    fn test_permission_scope_wire_names() {
        assert_eq!(
            serde_json::to_value(PermissionScope::OperationRequest).unwrap(),
            "operation_request"
        );
        assert_eq!(serde_json::to_value(PermissionScope::Sign).unwrap(), "sign");
    }

    #[test]
    fn test_relay_pairing_payload_shape() {
        let payload = PairingPayload::RelayPairingRequest(RelayPairing {
            id: "pair-1".into(),
            name: "dapp".into(),
            version: PROTOCOL_VERSION.into(),
            public_key: "aa".repeat(32),
            relay_server: "relay.example.org".into(),
            icon: None,
            app_url: None,
        });

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "relay-pairing-request");
        assert_eq!(json["relayServer"], "relay.example.org");
        assert!(json.get("icon").is_none());

        assert_eq!(payload.relay_server(), Some("relay.example.org"));
        assert_eq!(payload.id(), "pair-1");
    }

    #[test]
    fn test_direct_pairing_payload_has_no_relay() {
        let payload = PairingPayload::DirectPairingRequest(DirectPairing {
            id: "pair-2".into(),
            name: "dapp".into(),
            version: PROTOCOL_VERSION.into(),
            public_key: "bb".repeat(32),
            icon: None,
            app_url: None,
        });

        assert_eq!(payload.relay_server(), None);
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("relayServer").is_none());
    }

    #[test]
    fn test_disconnect_round_trip() {
        let message = Message::Disconnect(Disconnect {
            id: "dc-1".into(),
            version: "1".into(),
            sender_id: "sender-9".into(),
        });
        let json = serde_json::to_string(&message).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(message, back);
    }
}
