/// JSON-RPC history: every request sent or received, keyed by id.
///
/// Responses omit the method name, so the engine looks the original
/// request up here to route a response to the right handler. Requests
/// received from the peer stay pending until the engine answers them.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use wc_transport::{JsonRpcPayload, JsonRpcRequest, RpcId};

use crate::storage::KeyValueStorage;
use crate::store::{Keyed, Store};
use crate::WalletConnectError;

pub const HISTORY_NAME: &str = "history";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSummary {
    pub method: String,
    pub params: Value,
}

/// Who sent the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Outbound,
    Inbound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonRpcRecord {
    pub id: RpcId,
    pub topic: String,
    pub request: RequestSummary,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,
}

impl Keyed<RpcId> for JsonRpcRecord {
    fn key(&self) -> RpcId {
        self.id
    }
}

pub struct JsonRpcHistory {
    store: Store<RpcId, JsonRpcRecord>,
}

impl JsonRpcHistory {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            store: Store::new(storage, HISTORY_NAME),
        }
    }

    pub async fn init(&mut self) -> Result<(), WalletConnectError> {
        self.store.init().await
    }

    /// Record an outbound request before it is published.
    pub async fn set<T: Serialize>(
        &mut self,
        topic: &str,
        request: &JsonRpcRequest<T>,
        chain_id: Option<&str>,
    ) -> Result<(), WalletConnectError> {
        self.insert(topic, request, chain_id, Direction::Outbound).await
    }

    /// Record a request received from the peer.
    pub async fn set_inbound<T: Serialize>(
        &mut self,
        topic: &str,
        request: &JsonRpcRequest<T>,
        chain_id: Option<&str>,
    ) -> Result<(), WalletConnectError> {
        self.insert(topic, request, chain_id, Direction::Inbound).await
    }

    async fn insert<T: Serialize>(
        &mut self,
        topic: &str,
        request: &JsonRpcRequest<T>,
        chain_id: Option<&str>,
        direction: Direction,
    ) -> Result<(), WalletConnectError> {
        if self.store.has(&request.id) {
            return Err(WalletConnectError::RecordAlreadyExists {
                context: format!("json-rpc record with id: {}", request.id),
            });
        }
        let record = JsonRpcRecord {
            id: request.id,
            topic: topic.to_string(),
            request: RequestSummary {
                method: request.method.clone(),
                params: serde_json::to_value(&request.params)?,
            },
            direction,
            response: None,
            chain_id: chain_id.map(str::to_string),
        };
        self.store.set(request.id, record).await
    }

    pub fn get(&self, topic: &str, id: RpcId) -> Result<JsonRpcRecord, WalletConnectError> {
        let record = self.store.get(&id)?;
        if record.topic != topic {
            return Err(WalletConnectError::MismatchedTopic {
                context: format!("json-rpc record {id}: expected {}, got {topic}", record.topic),
            });
        }
        Ok(record)
    }

    pub fn has(&self, id: RpcId) -> bool {
        self.store.has(&id)
    }

    /// Attach a response to its request.
    ///
    /// Returns `None` if the id is unknown here or was already resolved,
    /// in which case the response is not routed any further.
    pub async fn resolve(
        &mut self,
        topic: &str,
        response: &JsonRpcPayload,
    ) -> Result<Option<JsonRpcRecord>, WalletConnectError> {
        let id = response.id();
        if !self.store.has(&id) {
            return Ok(None);
        }
        let mut record = self.get(topic, id)?;
        if record.direction == Direction::Inbound || record.response.is_some() {
            return Ok(None);
        }
        record.response = Some(match response {
            JsonRpcPayload::Result(result) => result.result.clone(),
            JsonRpcPayload::Error(error) => serde_json::to_value(&error.error)?,
            JsonRpcPayload::Request(_) => {
                return Err(WalletConnectError::missing(format!(
                    "json-rpc response with id: {id}"
                )))
            }
        });
        self.store.update(&id, record.clone()).await?;
        Ok(Some(record))
    }

    /// The unanswered peer request `id` on `topic`.
    pub fn pending_inbound(&self, topic: &str, id: RpcId) -> Result<JsonRpcRecord, WalletConnectError> {
        match self.get(topic, id) {
            Ok(record) if record.direction == Direction::Inbound && record.response.is_none() => {
                Ok(record)
            }
            _ => Err(WalletConnectError::NoMatchingId {
                context: format!("pending request on {topic}"),
                id,
            }),
        }
    }

    /// Store the answer we sent to a peer request. Unknown ids are skipped:
    /// the topic may already be gone.
    pub async fn answer(&mut self, id: RpcId, response: Value) -> Result<(), WalletConnectError> {
        let Ok(mut record) = self.store.get(&id) else {
            return Ok(());
        };
        if record.direction != Direction::Inbound || record.response.is_some() {
            return Ok(());
        }
        record.response = Some(response);
        self.store.update(&id, record).await
    }

    pub async fn delete(&mut self, id: RpcId) -> Result<(), WalletConnectError> {
        self.store.delete(&id).await
    }

    /// Drop every record exchanged on `topic`.
    pub async fn delete_topic(&mut self, topic: &str) -> Result<(), WalletConnectError> {
        for record in self.store.values() {
            if record.topic == topic {
                self.store.delete(&record.id).await?;
            }
        }
        Ok(())
    }

    pub fn records(&self) -> Vec<JsonRpcRecord> {
        self.store.values()
    }

    /// Requests on `topic` that have not been answered yet.
    pub fn pending(&self, topic: &str) -> Vec<JsonRpcRecord> {
        self.store
            .values()
            .into_iter()
            .filter(|r| r.topic == topic && r.response.is_none())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;
    use wc_transport::{ErrorPayload, JsonRpcError, JsonRpcResult};

    async fn history() -> JsonRpcHistory {
        let mut history = JsonRpcHistory::new(Arc::new(MemoryStorage::new()));
        history.init().await.unwrap();
        history
    }

    #[tokio::test]
    async fn records_and_resolves_once() {
        let mut history = history().await;
        let request = JsonRpcRequest::new("wc_sessionPing", json!({}));
        history.set("topic", &request, None).await.unwrap();
        assert_eq!(history.pending("topic").len(), 1);

        let response = JsonRpcPayload::Result(JsonRpcResult::new(request.id, json!(true)));
        let record = history.resolve("topic", &response).await.unwrap().unwrap();
        assert_eq!(record.request.method, "wc_sessionPing");
        assert_eq!(record.response, Some(json!(true)));
        assert!(history.pending("topic").is_empty());

        assert!(history.resolve("topic", &response).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_id_rejected() {
        let mut history = history().await;
        let request = JsonRpcRequest::new("wc_sessionPing", json!({}));
        history.set("topic", &request, None).await.unwrap();
        let err = history.set("topic", &request, None).await.unwrap_err();
        assert_eq!(err.code(), 10);
    }

    #[tokio::test]
    async fn mismatched_topic() {
        let mut history = history().await;
        let request = JsonRpcRequest::new("wc_sessionRequest", json!({}));
        history.set("a", &request, Some("eip155:1")).await.unwrap();
        assert!(matches!(
            history.get("b", request.id),
            Err(WalletConnectError::MismatchedTopic { .. })
        ));
        let record = history.get("a", request.id).unwrap();
        assert_eq!(record.chain_id.as_deref(), Some("eip155:1"));
    }

    #[tokio::test]
    async fn unknown_response_ignored() {
        let mut history = history().await;
        let response = JsonRpcPayload::Error(JsonRpcError::new(99, ErrorPayload::new(5000, "no")));
        assert!(history.resolve("topic", &response).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_topic_clears_records() {
        let mut history = history().await;
        history
            .set("a", &JsonRpcRequest::new("wc_sessionPing", json!({})), None)
            .await
            .unwrap();
        history
            .set("b", &JsonRpcRequest::new("wc_sessionPing", json!({})), None)
            .await
            .unwrap();
        history.delete_topic("a").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history.records()[0].topic, "b");
    }

    #[tokio::test]
    async fn inbound_request_answered_once() {
        let mut history = history().await;
        let request = JsonRpcRequest::new("wc_sessionRequest", json!({}));
        history
            .set_inbound("topic", &request, Some("eip155:1"))
            .await
            .unwrap();
        assert!(history.has(request.id));
        assert_eq!(history.pending("topic").len(), 1);
        let record = history.pending_inbound("topic", request.id).unwrap();
        assert_eq!(record.direction, Direction::Inbound);

        // A peer "response" to its own request is not routed.
        let response = JsonRpcPayload::Result(JsonRpcResult::new(request.id, json!(true)));
        assert!(history.resolve("topic", &response).await.unwrap().is_none());

        history.answer(request.id, json!("0xsig")).await.unwrap();
        assert!(history.pending("topic").is_empty());
        assert_eq!(
            history.pending_inbound("topic", request.id).unwrap_err().code(),
            2
        );
        assert!(history.pending_inbound("other", request.id).is_err());
        // Unknown ids are fine.
        history.answer(12345, json!(true)).await.unwrap();
    }

    #[tokio::test]
    async fn outbound_records_are_not_pending_inbound() {
        let mut history = history().await;
        let request = JsonRpcRequest::new("wc_sessionRequest", json!({}));
        history.set("topic", &request, None).await.unwrap();
        assert!(history.pending_inbound("topic", request.id).is_err());
        history.answer(request.id, json!(true)).await.unwrap();
        assert_eq!(history.get("topic", request.id).unwrap().response, None);
    }

    #[test]
    fn records_without_direction_are_outbound() {
        let record: JsonRpcRecord = serde_json::from_value(json!({
            "id": 1,
            "topic": "t",
            "request": { "method": "wc_sessionPing", "params": {} },
        }))
        .unwrap();
        assert_eq!(record.direction, Direction::Outbound);
    }
}
