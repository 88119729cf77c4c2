//! Error types for the client crate.

use protocol::messages::ErrorResponse;
use protocol::ProtocolError;
use thiserror::Error;

/// Client error type covering all possible failure modes.
///
/// Failures that indicate "this message was not meant for me" never reach
/// this type; they are recovered inside the transports. Everything here is
/// surfaced to the caller whose action failed.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Wire-level failure from the protocol crate.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The local sliding-window rate limit was hit; the request was not
    /// sent.
    #[error("rate limit reached")]
    RateLimited,

    /// The active account's scopes do not cover this request type.
    #[error("no permission to send this request")]
    PermissionDenied,

    /// No peer is available to address the request to.
    #[error("no active peer")]
    NoActivePeer,

    /// No transport has been connected yet.
    #[error("transport not connected")]
    NoTransport,

    /// The transport failed to hand the message to the channel.
    #[error("transport send failed: {0}")]
    TransportSend(String),

    /// The pending request passed its deadline without a terminal
    /// response.
    #[error("request timed out")]
    Timeout,

    /// The peer answered with a terminal error envelope.
    #[error("remote error: {0:?}")]
    Remote(ErrorResponse),

    /// The peer answered with a response of an unexpected type.
    #[error("unexpected response type: {0}")]
    UnexpectedResponse(String),

    /// Storage collaborator failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// No peer with the given key is known.
    #[error("peer not found: {0}")]
    PeerNotFound(String),

    /// A pairing payload did not fit the transport it was handed to.
    #[error("invalid pairing payload: {0}")]
    InvalidPairing(String),

    /// The correlation channel was dropped before a terminal response.
    #[error("connection closed before a response arrived")]
    ChannelClosed,

    /// Configuration problem.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
