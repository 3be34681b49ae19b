/// In-process relay server speaking the relay wire methods.
///
/// Every `connect()` opens a new client connection served by a task that
/// answers `*_publish`, `*_subscribe` and `*_unsubscribe` and pushes
/// `*_subscription` requests to subscribers. Published messages are kept
/// per topic and replayed to late subscribers, mirroring the store-and-forward
/// behaviour of a real relay.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::relay_api::{
    PublishParams, RelayOperation, SubscribeParams, SubscriptionData, SubscriptionParams,
    UnsubscribeParams,
};
use crate::{
    Connector, ErrorPayload, JsonRpcError, JsonRpcPayload, JsonRpcRequest, JsonRpcResult, Link,
    TransportError,
};

/// Channel capacity per direction.
const LINK_BUFFER: usize = 1024;

type ConnId = u64;

/// A stored message and the connection that published it.
#[derive(Debug, Clone)]
struct Stored {
    publisher: ConnId,
    message: String,
}

#[derive(Default)]
struct RelayState {
    next_conn: ConnId,
    connections: HashMap<ConnId, mpsc::Sender<String>>,
    /// topic -> (connection -> subscription id)
    subscriptions: HashMap<String, HashMap<ConnId, String>>,
    mailbox: HashMap<String, Vec<Stored>>,
    published: Vec<PublishParams>,
    publish_attempts: usize,
    fail_publishes: bool,
    fail_unsubscribes: bool,
    refuse_connections: bool,
}

/// Frames to push once the state lock is released.
type Deliveries = Vec<(mpsc::Sender<String>, String)>;

/// In-memory relay shared by every client that connects through it.
///
/// Cheap to clone; all clones serve the same relay state.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reject every subsequent publish with an RPC error.
    pub fn set_fail_publishes(&self, fail: bool) {
        self.lock().fail_publishes = fail;
    }

    /// Reject every subsequent unsubscribe with an RPC error. The
    /// subscription stays in place.
    pub fn set_fail_unsubscribes(&self, fail: bool) {
        self.lock().fail_unsubscribes = fail;
    }

    /// Refuse new connections with [`TransportError::Unavailable`].
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connections = refuse;
    }

    /// Close every open connection from the relay side.
    pub fn drop_connections(&self) {
        let mut state = self.lock();
        state.connections.clear();
        state.subscriptions.clear();
    }

    /// Successfully accepted publishes, in order.
    pub fn published(&self) -> Vec<PublishParams> {
        self.lock().published.clone()
    }

    /// Publish requests received, including rejected ones.
    pub fn publish_attempts(&self) -> usize {
        self.lock().publish_attempts
    }

    /// Number of connections currently open.
    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    /// Number of connections subscribed to `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock()
            .subscriptions
            .get(topic)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Push every stored message for `topic` to its subscribers again.
    pub async fn redeliver(&self, topic: &str) {
        let deliveries = {
            let state = self.lock();
            let stored = state.mailbox.get(topic).cloned().unwrap_or_default();
            let mut out = Deliveries::new();
            for item in stored {
                out.extend(subscription_frames(&state, topic, &item));
            }
            out
        };
        deliver(deliveries).await;
    }

    fn handle(&self, conn: ConnId, text: &str) -> Deliveries {
        let payload = match JsonRpcPayload::parse(text) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!("memory relay: bad frame from {conn}: {e}");
                return Vec::new();
            }
        };
        // Acks for subscription pushes need no answer.
        let JsonRpcPayload::Request(request) = payload else {
            return Vec::new();
        };

        let mut state = self.lock();
        let Some(reply_to) = state.connections.get(&conn).cloned() else {
            return Vec::new();
        };

        match RelayOperation::from_method(&request.method) {
            Some(RelayOperation::Publish) => {
                state.publish_attempts += 1;
                if state.fail_publishes {
                    return vec![(reply_to, error_frame(request.id, -32000, "publish rejected"))];
                }
                let params: PublishParams = match serde_json::from_value(request.params) {
                    Ok(p) => p,
                    Err(e) => return vec![(reply_to, error_frame(request.id, -32602, &e.to_string()))],
                };
                let stored = Stored {
                    publisher: conn,
                    message: params.message.clone(),
                };
                let mut out = subscription_frames(&state, &params.topic, &stored);
                state
                    .mailbox
                    .entry(params.topic.clone())
                    .or_default()
                    .push(stored);
                state.published.push(params);
                out.push((reply_to, result_frame(request.id, json!(true))));
                out
            }
            Some(RelayOperation::Subscribe) => {
                let params: SubscribeParams = match serde_json::from_value(request.params) {
                    Ok(p) => p,
                    Err(e) => return vec![(reply_to, error_frame(request.id, -32602, &e.to_string()))],
                };
                let subscription_id = uuid::Uuid::new_v4().simple().to_string();
                state
                    .subscriptions
                    .entry(params.topic.clone())
                    .or_default()
                    .insert(conn, subscription_id.clone());

                let mut out = vec![(reply_to.clone(), result_frame(request.id, json!(subscription_id)))];
                let stored = state.mailbox.get(&params.topic).cloned().unwrap_or_default();
                for item in stored.iter().filter(|s| s.publisher != conn) {
                    out.push((
                        reply_to.clone(),
                        subscription_request(&subscription_id, &params.topic, &item.message),
                    ));
                }
                out
            }
            Some(RelayOperation::Unsubscribe) => {
                if state.fail_unsubscribes {
                    return vec![(reply_to, error_frame(request.id, -32000, "unsubscribe rejected"))];
                }
                let params: UnsubscribeParams = match serde_json::from_value(request.params) {
                    Ok(p) => p,
                    Err(e) => return vec![(reply_to, error_frame(request.id, -32602, &e.to_string()))],
                };
                if let Some(subs) = state.subscriptions.get_mut(&params.topic) {
                    subs.remove(&conn);
                }
                vec![(reply_to, result_frame(request.id, json!(true)))]
            }
            _ => vec![(reply_to, error_frame(request.id, -32601, "method not found"))],
        }
    }
}

#[async_trait::async_trait]
impl Connector for MemoryRelay {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        let (client_out_tx, mut relay_in_rx) = mpsc::channel::<String>(LINK_BUFFER);
        let (relay_out_tx, client_in_rx) = mpsc::channel::<String>(LINK_BUFFER);

        let conn = {
            let mut state = self.lock();
            if state.refuse_connections {
                return Err(TransportError::Unavailable {
                    url: crate::redact_url(url),
                });
            }
            state.next_conn += 1;
            let conn = state.next_conn;
            state.connections.insert(conn, relay_out_tx);
            conn
        };
        tracing::debug!("memory relay: connection {conn} opened");

        let relay = self.clone();
        tokio::spawn(async move {
            while let Some(text) = relay_in_rx.recv().await {
                let deliveries = relay.handle(conn, &text);
                deliver(deliveries).await;
            }
            let mut state = relay.lock();
            state.connections.remove(&conn);
            for subs in state.subscriptions.values_mut() {
                subs.remove(&conn);
            }
            tracing::debug!("memory relay: connection {conn} closed");
        });

        Ok(Link {
            outbound: client_out_tx,
            inbound: client_in_rx,
        })
    }
}

fn subscription_frames(
    state: &RelayState,
    topic: &str,
    stored: &Stored,
) -> Deliveries {
    let Some(subs) = state.subscriptions.get(topic) else {
        return Vec::new();
    };
    subs.iter()
        .filter(|(conn, _)| **conn != stored.publisher)
        .filter_map(|(conn, sub_id)| {
            let tx = state.connections.get(conn)?.clone();
            Some((tx, subscription_request(sub_id, topic, &stored.message)))
        })
        .collect()
}

fn subscription_request(subscription_id: &str, topic: &str, message: &str) -> String {
    let params = SubscriptionParams {
        id: subscription_id.to_string(),
        data: SubscriptionData {
            topic: topic.to_string(),
            message: message.to_string(),
        },
    };
    let request = JsonRpcRequest::new("irn_subscription", params);
    serde_json::to_string(&request).unwrap_or_default()
}

fn result_frame(id: u64, result: Value) -> String {
    serde_json::to_string(&JsonRpcResult::new(id, result)).unwrap_or_default()
}

fn error_frame(id: u64, code: i64, message: &str) -> String {
    serde_json::to_string(&JsonRpcError::new(id, ErrorPayload::new(code, message)))
        .unwrap_or_default()
}

async fn deliver(deliveries: Deliveries) {
    for (tx, text) in deliveries {
        let _ = tx.send(text).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn recv(link: &mut Link) -> JsonRpcPayload {
        let text = tokio::time::timeout(Duration::from_secs(2), link.inbound.recv())
            .await
            .expect("timed out")
            .expect("link closed");
        JsonRpcPayload::parse(&text).unwrap()
    }

    fn publish(topic: &str, message: &str) -> JsonRpcRequest<PublishParams> {
        JsonRpcRequest::new(
            "irn_publish",
            PublishParams {
                topic: topic.into(),
                message: message.into(),
                ttl: 300,
                tag: 0,
                prompt: false,
            },
        )
    }

    fn subscribe(topic: &str) -> JsonRpcRequest<SubscribeParams> {
        JsonRpcRequest::new("irn_subscribe", SubscribeParams { topic: topic.into() })
    }

    #[tokio::test]
    async fn publish_reaches_other_subscribers_only() {
        let relay = MemoryRelay::new();
        let mut alice = relay.connect("memory://").await.unwrap();
        let mut bob = relay.connect("memory://").await.unwrap();

        for link in [&mut alice, &mut bob] {
            link.send(&subscribe("t1")).await.unwrap();
            assert!(matches!(recv(link).await, JsonRpcPayload::Result(_)));
        }

        alice.send(&publish("t1", "hello")).await.unwrap();
        assert!(matches!(recv(&mut alice).await, JsonRpcPayload::Result(_)));

        match recv(&mut bob).await {
            JsonRpcPayload::Request(r) => {
                assert_eq!(r.method, "irn_subscription");
                let params: SubscriptionParams = serde_json::from_value(r.params).unwrap();
                assert_eq!(params.data.topic, "t1");
                assert_eq!(params.data.message, "hello");
            }
            other => panic!("expected subscription push, got {other:?}"),
        }
        assert_eq!(relay.published().len(), 1);
    }

    #[tokio::test]
    async fn late_subscriber_gets_stored_messages() {
        let relay = MemoryRelay::new();
        let alice = relay.connect("memory://").await.unwrap();
        let mut bob = relay.connect("memory://").await.unwrap();

        alice.send(&publish("t2", "stored")).await.unwrap();
        // Let the relay task process the publish.
        tokio::time::sleep(Duration::from_millis(50)).await;

        bob.send(&subscribe("t2")).await.unwrap();
        assert!(matches!(recv(&mut bob).await, JsonRpcPayload::Result(_)));
        match recv(&mut bob).await {
            JsonRpcPayload::Request(r) => assert_eq!(r.method, "irn_subscription"),
            other => panic!("expected stored message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failing_publishes_return_rpc_error() {
        let relay = MemoryRelay::new();
        relay.set_fail_publishes(true);
        let mut link = relay.connect("memory://").await.unwrap();
        link.send(&publish("t3", "m")).await.unwrap();
        assert!(matches!(recv(&mut link).await, JsonRpcPayload::Error(_)));
        assert_eq!(relay.publish_attempts(), 1);
        assert!(relay.published().is_empty());
    }

    #[tokio::test]
    async fn failing_unsubscribes_keep_subscription() {
        let relay = MemoryRelay::new();
        relay.set_fail_unsubscribes(true);
        let mut link = relay.connect("memory://").await.unwrap();
        link.send(&subscribe("t5")).await.unwrap();
        let id = match recv(&mut link).await {
            JsonRpcPayload::Result(r) => r.result.as_str().unwrap().to_string(),
            other => panic!("expected subscription id, got {other:?}"),
        };
        link.send(&JsonRpcRequest::new(
            "irn_unsubscribe",
            UnsubscribeParams {
                topic: "t5".into(),
                id,
            },
        ))
        .await
        .unwrap();
        assert!(matches!(recv(&mut link).await, JsonRpcPayload::Error(_)));
        assert_eq!(relay.subscriber_count("t5"), 1);
    }

    #[tokio::test]
    async fn drop_connections_closes_links() {
        let relay = MemoryRelay::new();
        let mut link = relay.connect("memory://").await.unwrap();
        relay.drop_connections();
        let next = tokio::time::timeout(Duration::from_secs(2), link.inbound.recv())
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn refused_connection() {
        let relay = MemoryRelay::new();
        relay.set_refuse_connections(true);
        assert!(matches!(
            relay.connect("ws://relay.local/?auth=x").await,
            Err(TransportError::Unavailable { .. })
        ));
    }
}
