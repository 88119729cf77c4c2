//! Permission checks for outgoing requests.
//!
//! Consulted by the correlation engine before a request is sent. Lookups
//! are injected so the validator stays independent of where accounts live.

use protocol::messages::{Message, PermissionScope};

use crate::managers::accounts::AccountInfo;

/// Checks whether permissions for a message type have been granted.
pub struct PermissionValidator;

impl PermissionValidator {
    /// Returns whether the message may be sent.
    ///
    /// Permission and broadcast requests are always allowed; operation and
    /// sign requests need the matching scope on an account with the
    /// request's source address. Non-request messages pass (responses and
    /// control messages are not permission-gated).
    pub fn has_permission<FO, FA>(message: &Message, get_one: FO, get_all: FA) -> bool
    where
        FO: Fn(&str) -> Option<AccountInfo>,
        FA: Fn() -> Vec<AccountInfo>,
    {
        match message {
            Message::PermissionRequest(_) | Message::BroadcastRequest(_) => true,
            Message::OperationRequest(request) => get_one(&request.source_address)
                .map(|account| account.scopes.contains(&PermissionScope::OperationRequest))
                .unwrap_or(false),
            Message::SignPayloadRequest(request) => get_all()
                .iter()
                .filter(|account| account.address == request.source_address)
                .any(|account| account.scopes.contains(&PermissionScope::Sign)),
            _ => true,
        }
    }
}
