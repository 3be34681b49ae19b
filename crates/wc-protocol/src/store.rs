/// Generic restore/cache/persist map for protocol records.
///
/// Every mutation writes the full value set back to storage under one
/// key; there are no partial writes.
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::storage::KeyValueStorage;
use crate::types::{storage_key, CLIENT_CONTEXT};
use crate::WalletConnectError;

/// A record that knows its own store key.
pub trait Keyed<K> {
    fn key(&self) -> K;
}

pub struct Store<K, V> {
    storage: Arc<dyn KeyValueStorage>,
    name: String,
    storage_key: String,
    map: HashMap<K, V>,
    initialized: bool,
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash + Clone + Display,
    V: Keyed<K> + Clone + Serialize + DeserializeOwned,
{
    /// Create a client-context store named `name` (e.g. `session`).
    pub fn new(storage: Arc<dyn KeyValueStorage>, name: &str) -> Self {
        Self::with_context(storage, CLIENT_CONTEXT, name)
    }

    pub fn with_context(storage: Arc<dyn KeyValueStorage>, context: &str, name: &str) -> Self {
        Self {
            storage,
            name: name.to_string(),
            storage_key: storage_key(context, name),
            map: HashMap::new(),
            initialized: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Restore persisted values into the map.
    ///
    /// Fails with `RestoreWillOverride` if values were set before restoring
    /// and storage also holds values.
    pub async fn init(&mut self) -> Result<(), WalletConnectError> {
        if self.initialized {
            return Ok(());
        }
        let persisted: Vec<V> = match self.storage.get_item(&self.storage_key).await? {
            Some(value) => serde_json::from_value(value)?,
            None => Vec::new(),
        };
        if !persisted.is_empty() {
            if !self.map.is_empty() {
                return Err(WalletConnectError::RestoreWillOverride {
                    name: self.name.clone(),
                });
            }
            for value in persisted {
                self.map.insert(value.key(), value);
            }
            tracing::debug!("store {}: restored {} records", self.name, self.map.len());
        }
        self.initialized = true;
        Ok(())
    }

    fn is_initialized(&self) -> Result<(), WalletConnectError> {
        if self.initialized {
            Ok(())
        } else {
            Err(WalletConnectError::NotInitialized {
                name: self.name.clone(),
            })
        }
    }

    pub fn get(&self, key: &K) -> Result<V, WalletConnectError> {
        self.is_initialized()?;
        self.map
            .get(key)
            .cloned()
            .ok_or_else(|| WalletConnectError::NoMatchingKey {
                context: format!("{}: {key}", self.name),
            })
    }

    pub fn has(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Insert or replace a record.
    pub async fn set(&mut self, key: K, value: V) -> Result<(), WalletConnectError> {
        self.is_initialized()?;
        self.map.insert(key, value);
        self.persist().await
    }

    /// Replace an existing record with a new value.
    pub async fn update(&mut self, key: &K, value: V) -> Result<(), WalletConnectError> {
        self.is_initialized()?;
        let Some(slot) = self.map.get_mut(key) else {
            return Err(WalletConnectError::NoMatchingKey {
                context: format!("{}: {key}", self.name),
            });
        };
        *slot = value;
        self.persist().await
    }

    /// Remove a record. Removing an absent key is a no-op.
    pub async fn delete(&mut self, key: &K) -> Result<(), WalletConnectError> {
        self.is_initialized()?;
        if self.map.remove(key).is_none() {
            return Ok(());
        }
        self.persist().await
    }

    pub fn keys(&self) -> Vec<K> {
        self.map.keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<V> {
        self.map.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    async fn persist(&self) -> Result<(), WalletConnectError> {
        let values: Vec<&V> = self.map.values().collect();
        let snapshot = serde_json::to_value(values)?;
        self.storage.set_item(&self.storage_key, snapshot).await
    }
}
