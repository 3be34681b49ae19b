/// Persisted tag -> key map (private keys by public key, symmetric keys by topic).
use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::storage::KeyValueStorage;
use crate::types::{storage_key, CORE_CONTEXT};
use crate::WalletConnectError;

pub struct KeyChain {
    storage: Arc<dyn KeyValueStorage>,
    storage_key: String,
    keys: RwLock<BTreeMap<String, String>>,
}

impl KeyChain {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            storage,
            storage_key: storage_key(CORE_CONTEXT, "keychain"),
            keys: RwLock::new(BTreeMap::new()),
        }
    }

    /// Load persisted keys. Keys set before loading are kept unless
    /// storage holds the same tag.
    pub async fn init(&self) -> Result<(), WalletConnectError> {
        let restored: BTreeMap<String, String> = match self.storage.get_item(&self.storage_key).await? {
            Some(value) => serde_json::from_value(value)?,
            None => BTreeMap::new(),
        };
        let mut keys = self.keys.write().await;
        keys.extend(restored);
        tracing::debug!("keychain: {} keys loaded", keys.len());
        Ok(())
    }

    pub async fn has(&self, tag: &str) -> bool {
        self.keys.read().await.contains_key(tag)
    }

    pub async fn get(&self, tag: &str) -> Result<String, WalletConnectError> {
        self.keys
            .read()
            .await
            .get(tag)
            .cloned()
            .ok_or_else(|| WalletConnectError::NoMatchingKey {
                context: format!("keychain: {tag}"),
            })
    }

    /// Store `key` under `tag`, replacing any previous key.
    pub async fn set(&self, tag: &str, key: String) -> Result<(), WalletConnectError> {
        let mut keys = self.keys.write().await;
        keys.insert(tag.to_string(), key);
        self.save(&keys).await
    }

    pub async fn delete(&self, tag: &str) -> Result<(), WalletConnectError> {
        let mut keys = self.keys.write().await;
        if keys.remove(tag).is_none() {
            return Err(WalletConnectError::NoMatchingKey {
                context: format!("keychain: {tag}"),
            });
        }
        self.save(&keys).await
    }

    async fn save(&self, keys: &BTreeMap<String, String>) -> Result<(), WalletConnectError> {
        self.storage
            .set_item(&self.storage_key, serde_json::to_value(keys)?)
            .await
    }
}
