//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Identity errors
    /// The seed used to derive an identity is unusable.
    #[error("invalid seed: {0}")]
    SeedInvalid(String),

    /// Invalid or malformed public key.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    // Cryptographic errors
    /// Encryption operation failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption operation failed.
    ///
    /// This is recoverable: on a multiplexed channel a listener receives
    /// messages that were never addressed to it, and those fail
    /// authentication. Callers swallow this error and move on.
    #[error("decryption failed")]
    DecryptionFailed,

    // Serialization errors
    /// Malformed serialized input.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Unparseable or unsupported protocol version string.
    #[error("invalid protocol version: {0}")]
    InvalidVersion(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<ed25519_dalek::SignatureError> for ProtocolError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        ProtocolError::InvalidPublicKey(err.to_string())
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::InvalidPayload(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_invalid_display() {
        let err = ProtocolError::SeedInvalid("empty seed".to_string());
        assert_eq!(err.to_string(), "invalid seed: empty seed");
    }

    #[test]
    fn test_decryption_failed_display() {
        let err = ProtocolError::DecryptionFailed;
        assert_eq!(err.to_string(), "decryption failed");
    }

    #[test]
    fn test_invalid_payload_display() {
        let err = ProtocolError::InvalidPayload("not base58".to_string());
        assert_eq!(err.to_string(), "invalid payload: not base58");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let protocol_err: ProtocolError = json_err.into();
        assert!(matches!(protocol_err, ProtocolError::InvalidPayload(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProtocolError>();
    }
}
