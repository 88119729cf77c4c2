//! Account management.
//!
//! Accounts are created when a wallet grants a permission request and are
//! derived from the granting peer. They exist at this layer so that a
//! peer's Disconnect can propagate: every account whose sender id matches
//! the departing peer is removed with it.

use std::sync::Arc;

use protocol::messages::PermissionScope;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{keys, Storage, StorageManager};
use crate::transport::TransportKind;

/// An account granted to this client by a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    /// Stable identifier of the account.
    pub account_id: String,
    /// Sender id of the wallet that granted the account.
    pub sender_id: String,
    /// Address of the account.
    pub address: String,
    /// Public key of the account.
    pub public_key: String,
    /// Scopes the wallet granted.
    pub scopes: Vec<PermissionScope>,
    /// Which transport the grant arrived over.
    pub origin: TransportKind,
}

/// Thin CRUD wrapper over the account list plus the active-account marker.
pub struct AccountManager {
    manager: StorageManager<AccountInfo>,
    storage: Arc<dyn Storage>,
}

impl AccountManager {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            manager: StorageManager::new(storage.clone(), keys::ACCOUNTS),
            storage,
        }
    }

    /// Returns all locally known accounts.
    pub async fn get_accounts(&self) -> Result<Vec<AccountInfo>> {
        self.manager.get_all().await
    }

    /// Returns the account with the given id.
    pub async fn get_account(&self, account_id: &str) -> Result<Option<AccountInfo>> {
        self.manager.get_one(|a| a.account_id == account_id).await
    }

    /// Adds an account, overwriting any record with the same id.
    pub async fn add_account(&self, account: AccountInfo) -> Result<()> {
        let account_id = account.account_id.clone();
        self.manager
            .add_one(account, |a| a.account_id == account_id)
            .await
    }

    /// Removes the account with the given id, clearing the active marker
    /// if it pointed there.
    pub async fn remove_account(&self, account_id: &str) -> Result<()> {
        self.manager.remove(|a| a.account_id == account_id).await?;
        if self.get_active_account_id().await?.as_deref() == Some(account_id) {
            self.set_active_account(None).await?;
        }
        Ok(())
    }

    /// Removes all accounts and the active marker.
    pub async fn remove_all_accounts(&self) -> Result<()> {
        self.manager.remove_all().await?;
        self.set_active_account(None).await
    }

    /// Removes every account granted by one of the given senders. Used
    /// when a peer disconnects.
    pub async fn remove_accounts_for_sender_ids(&self, sender_ids: &[String]) -> Result<()> {
        let removed_active = match self.get_active_account().await? {
            Some(active) => sender_ids.contains(&active.sender_id),
            None => false,
        };

        self.manager
            .remove(|a| sender_ids.contains(&a.sender_id))
            .await?;

        if removed_active {
            self.set_active_account(None).await?;
        }
        Ok(())
    }

    /// Returns the currently active account, if any.
    pub async fn get_active_account(&self) -> Result<Option<AccountInfo>> {
        match self.get_active_account_id().await? {
            Some(id) => self.get_account(&id).await,
            None => Ok(None),
        }
    }

    /// Marks an account as active, or clears the marker with `None`.
    pub async fn set_active_account(&self, account_id: Option<&str>) -> Result<()> {
        match account_id {
            Some(id) => {
                self.storage
                    .set(keys::ACTIVE_ACCOUNT, id.to_string())
                    .await
            }
            None => self.storage.delete(keys::ACTIVE_ACCOUNT).await,
        }
    }

    async fn get_active_account_id(&self) -> Result<Option<String>> {
        self.storage.get(keys::ACTIVE_ACCOUNT).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    fn manager() -> AccountManager {
        AccountManager::new(Arc::new(InMemoryStorage::new()))
    }

    fn account(id: &str, sender_id: &str) -> AccountInfo {
        AccountInfo {
            account_id: id.to_string(),
            sender_id: sender_id.to_string(),
            address: format!("addr-{id}"),
            public_key: format!("pk-{id}"),
            scopes: vec![PermissionScope::Sign],
            origin: TransportKind::Relay,
        }
    }

    #[tokio::test]
    async fn test_add_get_remove() {
        let accounts = manager();
        accounts.add_account(account("a1", "s1")).await.unwrap();
        accounts.add_account(account("a2", "s2")).await.unwrap();

        assert_eq!(accounts.get_accounts().await.unwrap().len(), 2);
        assert!(accounts.get_account("a1").await.unwrap().is_some());

        accounts.remove_account("a1").await.unwrap();
        assert!(accounts.get_account("a1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_active_account_lifecycle() {
        let accounts = manager();
        accounts.add_account(account("a1", "s1")).await.unwrap();

        assert!(accounts.get_active_account().await.unwrap().is_none());

        accounts.set_active_account(Some("a1")).await.unwrap();
        assert_eq!(
            accounts.get_active_account().await.unwrap().unwrap().account_id,
            "a1"
        );

        accounts.remove_account("a1").await.unwrap();
        assert!(accounts.get_active_account().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_for_sender_ids() {
        let accounts = manager();
        accounts.add_account(account("a1", "s1")).await.unwrap();
        accounts.add_account(account("a2", "s2")).await.unwrap();
        accounts.set_active_account(Some("a1")).await.unwrap();

        accounts
            .remove_accounts_for_sender_ids(&["s1".to_string()])
            .await
            .unwrap();

        let remaining = accounts.get_accounts().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].account_id, "a2");
        // Active marker pointed at the removed account and was cleared.
        assert!(accounts.get_active_account().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_by_account_id() {
        let accounts = manager();
        accounts.add_account(account("a1", "s1")).await.unwrap();

        let mut updated = account("a1", "s1");
        updated.scopes = vec![PermissionScope::OperationRequest];
        accounts.add_account(updated.clone()).await.unwrap();

        let all = accounts.get_accounts().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0], updated);
    }
}
