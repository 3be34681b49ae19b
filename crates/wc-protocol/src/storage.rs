/// Key-value persistence backends.
///
/// Values are JSON documents. Every store, the keychain and the expirer
/// write their full state under one key.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::sync::RwLock;

use crate::WalletConnectError;

/// Async key-value storage backend.
///
/// In production: [`FileStorage`] (one JSON file).
/// In tests: [`MemoryStorage`].
#[async_trait::async_trait]
pub trait KeyValueStorage: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<Value>, WalletConnectError>;

    async fn set_item(&self, key: &str, value: Value) -> Result<(), WalletConnectError>;

    async fn remove_item(&self, key: &str) -> Result<(), WalletConnectError>;

    async fn keys(&self) -> Result<Vec<String>, WalletConnectError>;

    async fn clear(&self) -> Result<(), WalletConnectError>;
}

// ── MemoryStorage ────────────────────────────────────────────────────

/// Process-scoped storage.
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl KeyValueStorage for MemoryStorage {
    async fn get_item(&self, key: &str) -> Result<Option<Value>, WalletConnectError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: Value) -> Result<(), WalletConnectError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), WalletConnectError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, WalletConnectError> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }

    async fn clear(&self) -> Result<(), WalletConnectError> {
        self.entries.write().await.clear();
        Ok(())
    }
}

// ── FileStorage ──────────────────────────────────────────────────────

/// Storage backed by a single JSON file, rewritten on every mutation.
pub struct FileStorage {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, Value>>,
}

impl FileStorage {
    /// Open (or lazily create) the storage file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, WalletConnectError> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(WalletConnectError::Storage(format!("{}: {e}", path.display()))),
        };
        tracing::debug!("file storage opened at {}", path.display());
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn save(&self, entries: &BTreeMap<String, Value>) -> Result<(), WalletConnectError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| WalletConnectError::Storage(e.to_string()))?;
            }
        }
        let bytes = serde_json::to_vec_pretty(entries)?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| WalletConnectError::Storage(format!("{}: {e}", self.path.display())))
    }
}

#[async_trait::async_trait]
impl KeyValueStorage for FileStorage {
    async fn get_item(&self, key: &str) -> Result<Option<Value>, WalletConnectError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: Value) -> Result<(), WalletConnectError> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value);
        self.save(&entries).await
    }

    async fn remove_item(&self, key: &str) -> Result<(), WalletConnectError> {
        let mut entries = self.entries.write().await;
        if entries.remove(key).is_some() {
            self.save(&entries).await?;
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, WalletConnectError> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }

    async fn clear(&self) -> Result<(), WalletConnectError> {
        let mut entries = self.entries.write().await;
        entries.clear();
        self.save(&entries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_storage_basic_ops() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get_item("a").await.unwrap(), None);

        storage.set_item("a", json!([1, 2])).await.unwrap();
        storage.set_item("b", json!({"x": true})).await.unwrap();
        assert_eq!(storage.get_item("a").await.unwrap(), Some(json!([1, 2])));
        assert_eq!(storage.keys().await.unwrap(), vec!["a", "b"]);

        storage.remove_item("a").await.unwrap();
        assert_eq!(storage.get_item("a").await.unwrap(), None);

        storage.clear().await.unwrap();
        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("wc.json");

        {
            let storage = FileStorage::open(&path).await.unwrap();
            storage
                .set_item("wc@2:client//session", json!([{"topic": "t"}]))
                .await
                .unwrap();
            storage.set_item("gone", json!(1)).await.unwrap();
            storage.remove_item("gone").await.unwrap();
        }

        let reopened = FileStorage::open(&path).await.unwrap();
        assert_eq!(
            reopened.get_item("wc@2:client//session").await.unwrap(),
            Some(json!([{"topic": "t"}]))
        );
        assert_eq!(reopened.get_item("gone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_storage_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wc.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        assert!(FileStorage::open(&path).await.is_err());
    }
}
