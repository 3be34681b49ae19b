/// Time-based expiry bookkeeping for pairings, sessions and proposals.
///
/// Targets are stored as strings (`topic:<hex>` / `id:<n>`) so a single
/// persisted list covers both kinds. `sweep` removes what it returns, which
/// makes every target expire exactly once.
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::storage::KeyValueStorage;
use crate::store::{Keyed, Store};
use crate::WalletConnectError;

pub const EXPIRER_NAME: &str = "expirer";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExpirerTarget {
    Topic(String),
    Id(u64),
}

impl ExpirerTarget {
    pub fn parse(target: &str) -> Result<Self, WalletConnectError> {
        if let Some(topic) = target.strip_prefix("topic:") {
            return Ok(ExpirerTarget::Topic(topic.to_string()));
        }
        if let Some(id) = target.strip_prefix("id:") {
            return id
                .parse()
                .map(ExpirerTarget::Id)
                .map_err(|_| WalletConnectError::missing(format!("expirer target: {target}")));
        }
        Err(WalletConnectError::UnknownType {
            context: format!("expirer target: {target}"),
        })
    }
}

impl fmt::Display for ExpirerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpirerTarget::Topic(topic) => write!(f, "topic:{topic}"),
            ExpirerTarget::Id(id) => write!(f, "id:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expiration {
    pub target: String,
    /// Seconds since UNIX epoch.
    pub expiry: u64,
}

impl Keyed<String> for Expiration {
    fn key(&self) -> String {
        self.target.clone()
    }
}

pub struct Expirer {
    store: Store<String, Expiration>,
}

impl Expirer {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            store: Store::new(storage, EXPIRER_NAME),
        }
    }

    pub async fn init(&mut self) -> Result<(), WalletConnectError> {
        self.store.init().await
    }

    pub fn has(&self, target: &ExpirerTarget) -> bool {
        self.store.has(&target.to_string())
    }

    pub async fn set(&mut self, target: &ExpirerTarget, expiry: u64) -> Result<(), WalletConnectError> {
        let key = target.to_string();
        self.store
            .set(
                key.clone(),
                Expiration {
                    target: key,
                    expiry,
                },
            )
            .await
    }

    pub fn get(&self, target: &ExpirerTarget) -> Result<Expiration, WalletConnectError> {
        self.store.get(&target.to_string())
    }

    pub async fn delete(&mut self, target: &ExpirerTarget) -> Result<(), WalletConnectError> {
        self.store.delete(&target.to_string()).await
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn values(&self) -> Vec<Expiration> {
        self.store.values()
    }

    /// Remove and return every target whose expiry is at or before `now`.
    pub async fn sweep(&mut self, now: u64) -> Result<Vec<ExpirerTarget>, WalletConnectError> {
        let mut expired = Vec::new();
        for expiration in self.store.values() {
            if expiration.expiry > now {
                continue;
            }
            self.store.delete(&expiration.target).await?;
            match ExpirerTarget::parse(&expiration.target) {
                Ok(target) => expired.push(target),
                Err(e) => tracing::warn!("expirer: dropping bad entry: {e}"),
            }
        }
        if !expired.is_empty() {
            tracing::debug!("expirer: {} targets expired", expired.len());
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    async fn expirer() -> Expirer {
        let mut expirer = Expirer::new(Arc::new(MemoryStorage::new()));
        expirer.init().await.unwrap();
        expirer
    }

    #[test]
    fn target_strings() {
        let topic = ExpirerTarget::Topic("abc".into());
        assert_eq!(topic.to_string(), "topic:abc");
        assert_eq!(ExpirerTarget::parse("topic:abc").unwrap(), topic);
        assert_eq!(ExpirerTarget::parse("id:42").unwrap(), ExpirerTarget::Id(42));
        assert!(matches!(
            ExpirerTarget::parse("id:x"),
            Err(WalletConnectError::MissingOrInvalid { .. })
        ));
        assert!(matches!(
            ExpirerTarget::parse("other"),
            Err(WalletConnectError::UnknownType { .. })
        ));
    }

    #[tokio::test]
    async fn sweep_returns_each_target_once() {
        let mut expirer = expirer().await;
        expirer.set(&ExpirerTarget::Topic("old".into()), 100).await.unwrap();
        expirer.set(&ExpirerTarget::Id(7), 150).await.unwrap();
        expirer.set(&ExpirerTarget::Topic("new".into()), 500).await.unwrap();

        let mut expired = expirer.sweep(200).await.unwrap();
        expired.sort_by_key(|t| t.to_string());
        assert_eq!(
            expired,
            vec![ExpirerTarget::Id(7), ExpirerTarget::Topic("old".into())]
        );
        assert!(expirer.sweep(200).await.unwrap().is_empty());
        assert_eq!(expirer.len(), 1);
        assert!(expirer.has(&ExpirerTarget::Topic("new".into())));
    }

    #[tokio::test]
    async fn set_replaces_expiry() {
        let mut expirer = expirer().await;
        let target = ExpirerTarget::Topic("t".into());
        expirer.set(&target, 10).await.unwrap();
        expirer.set(&target, 1_000).await.unwrap();
        assert_eq!(expirer.get(&target).unwrap().expiry, 1_000);
        assert!(expirer.sweep(500).await.unwrap().is_empty());
    }
}
