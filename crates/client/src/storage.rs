//! Storage collaborator for client state.
//!
//! The core treats storage as an external async key-value interface; the
//! peer, account and permission managers are thin CRUD wrappers over it.
//! Two implementations are provided: an in-memory store for tests and
//! short-lived clients, and a JSON-file store persisting across restarts.

use std::collections::HashMap;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::RwLock;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::{ClientError, Result};

/// Notification emitted when a storage key changes.
#[derive(Debug, Clone)]
pub struct StorageChange {
    /// The key that was set or deleted.
    pub key: String,
}

/// Async key-value interface the client state lives behind.
///
/// Correctness requirement for implementations: the managers serialize
/// their own read-modify-write cycles, but `set` for one key must be
/// atomic with respect to concurrent `get`s of that key. A reader must
/// never observe a torn value.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Reads the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Deletes `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Subscribes to change notifications for all keys.
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

const CHANGE_CHANNEL_CAPACITY: usize = 32;

/// Volatile in-memory storage.
pub struct InMemoryStorage {
    entries: DashMap<String, String>,
    changes: broadcast::Sender<StorageChange>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            entries: DashMap::new(),
            changes,
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

/// Persistent storage backed by a single JSON file.
///
/// The whole key space is one JSON object. Writes go to a temp file which
/// is then renamed over the target, so a crash never leaves a torn file.
pub struct FileStorage {
    path: PathBuf,
    entries: RwLock<HashMap<String, String>>,
    changes: broadcast::Sender<StorageChange>,
}

impl FileStorage {
    /// Creates a file store that will persist to the given path.
    ///
    /// Existing contents are loaded eagerly; a missing file starts empty.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let contents = fs::read_to_string(&path).map_err(|e| {
                ClientError::Storage(format!("failed to read {}: {e}", path.display()))
            })?;
            serde_json::from_str(&contents).map_err(|e| {
                ClientError::Storage(format!("failed to parse {}: {e}", path.display()))
            })?
        } else {
            HashMap::new()
        };

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            path,
            entries: RwLock::new(entries),
            changes,
        })
    }

    /// Returns the path backing this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ClientError::Storage(format!(
                    "failed to create {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let contents = serde_json::to_string_pretty(entries)
            .map_err(|e| ClientError::Storage(e.to_string()))?;

        // Atomic write: temp file, then rename.
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &contents).map_err(|e| {
            ClientError::Storage(format!("failed to write {}: {e}", temp_path.display()))
        })?;
        fs::rename(&temp_path, &self.path).map_err(|e| {
            ClientError::Storage(format!("failed to rename into {}: {e}", self.path.display()))
        })?;
        Ok(())
    }

    fn lock_err() -> ClientError {
        ClientError::Storage("storage lock poisoned".to_string())
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().map_err(|_| Self::lock_err())?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| Self::lock_err())?;
        entries.insert(key.to_string(), value);
        self.persist(&entries)?;
        drop(entries);
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| Self::lock_err())?;
        entries.remove(key);
        self.persist(&entries)?;
        drop(entries);
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

/// Typed list CRUD over one storage key.
///
/// Storage backends only expose get/set of whole values, so concurrent
/// read-modify-write cycles on the same key are subject to lost updates.
/// The manager closes that race with a per-key async mutex: every mutation
/// reads, modifies and writes back under the same guard.
pub struct StorageManager<T> {
    storage: Arc<dyn Storage>,
    key: String,
    write_lock: tokio::sync::Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StorageManager<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    pub fn new(storage: Arc<dyn Storage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
            write_lock: tokio::sync::Mutex::new(()),
            _marker: PhantomData,
        }
    }

    /// Returns every element stored under this manager's key.
    pub async fn get_all(&self) -> Result<Vec<T>> {
        match self.storage.get(&self.key).await? {
            Some(raw) => {
                serde_json::from_str(&raw).map_err(|e| ClientError::Storage(e.to_string()))
            }
            None => Ok(Vec::new()),
        }
    }

    /// Returns the first element matching the predicate.
    pub async fn get_one<F>(&self, predicate: F) -> Result<Option<T>>
    where
        F: Fn(&T) -> bool,
    {
        Ok(self.get_all().await?.into_iter().find(|e| predicate(e)))
    }

    /// Inserts an element, replacing the first existing element the
    /// `matches` predicate identifies (upsert; position is preserved on
    /// replace).
    pub async fn add_one<F>(&self, element: T, matches: F) -> Result<()>
    where
        F: Fn(&T) -> bool,
    {
        let _guard = self.write_lock.lock().await;
        let mut all = self.get_all().await?;
        match all.iter().position(|e| matches(e)) {
            Some(index) => all[index] = element,
            None => all.push(element),
        }
        self.set_all(&all).await
    }

    /// Removes every element matching the predicate.
    pub async fn remove<F>(&self, predicate: F) -> Result<()>
    where
        F: Fn(&T) -> bool,
    {
        let _guard = self.write_lock.lock().await;
        let mut all = self.get_all().await?;
        all.retain(|e| !predicate(e));
        self.set_all(&all).await
    }

    /// Removes the whole list.
    pub async fn remove_all(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.storage.delete(&self.key).await
    }

    async fn set_all(&self, elements: &[T]) -> Result<()> {
        let raw = serde_json::to_string(elements).map_err(|e| ClientError::Storage(e.to_string()))?;
        self.storage.set(&self.key, raw).await
    }
}

/// Loads the persisted identity seed, generating and storing a fresh one
/// on first run. The seed is created exactly once per storage; every
/// client built over the same storage derives the same identity.
pub(crate) async fn load_or_create_seed(storage: &Arc<dyn Storage>) -> Result<String> {
    if let Some(seed) = storage.get(keys::SEED).await? {
        return Ok(seed);
    }
    let seed = uuid::Uuid::new_v4().to_string();
    storage.set(keys::SEED, seed.clone()).await?;
    Ok(seed)
}

/// Storage keys used by the client.
pub mod keys {
    /// The persisted identity seed.
    pub const SEED: &str = "pairlink:seed";
    /// Peers paired over the relay transport.
    pub const RELAY_PEERS: &str = "pairlink:relay-peers";
    /// Peers paired over the direct transport.
    pub const DIRECT_PEERS: &str = "pairlink:direct-peers";
    /// Accounts granted by paired wallets.
    pub const ACCOUNTS: &str = "pairlink:accounts";
    /// Identifier of the currently active account.
    pub const ACTIVE_ACCOUNT: &str = "pairlink:active-account";
}
