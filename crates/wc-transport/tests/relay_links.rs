//! Integration tests: relay links through the public connector API.

use std::time::Duration;

use wc_transport::relay_api::{PublishParams, SubscribeParams, SubscriptionParams, UnsubscribeParams};
use wc_transport::{
    format_relay_rpc_url, Connector, JsonRpcPayload, JsonRpcRequest, JsonRpcResult, Link,
    MemoryRelay, TransportError, WsConnector,
};

async fn next(link: &mut Link) -> JsonRpcPayload {
    let text = tokio::time::timeout(Duration::from_secs(5), link.inbound.recv())
        .await
        .expect("recv timed out")
        .expect("link closed");
    JsonRpcPayload::parse(&text).unwrap()
}

async fn nothing(link: &mut Link) {
    let outcome = tokio::time::timeout(Duration::from_millis(150), link.inbound.recv()).await;
    assert!(outcome.is_err(), "unexpected frame: {outcome:?}");
}

async fn subscribe(link: &mut Link, topic: &str) -> String {
    link.send(&JsonRpcRequest::new(
        "irn_subscribe",
        SubscribeParams {
            topic: topic.into(),
        },
    ))
    .await
    .unwrap();
    match next(link).await {
        JsonRpcPayload::Result(r) => r.result.as_str().unwrap().to_string(),
        other => panic!("expected subscription id, got {other:?}"),
    }
}

async fn publish(link: &mut Link, topic: &str, message: &str) {
    link.send(&JsonRpcRequest::new(
        "irn_publish",
        PublishParams {
            topic: topic.into(),
            message: message.into(),
            ttl: 300,
            tag: 1100,
            prompt: true,
        },
    ))
    .await
    .unwrap();
    assert!(matches!(next(link).await, JsonRpcPayload::Result(_)));
}

fn pushed_message(payload: JsonRpcPayload) -> (String, String) {
    match payload {
        JsonRpcPayload::Request(r) => {
            assert_eq!(r.method, "irn_subscription");
            let params: SubscriptionParams = serde_json::from_value(r.params).unwrap();
            (params.data.topic, params.data.message)
        }
        other => panic!("expected subscription push, got {other:?}"),
    }
}

#[tokio::test]
async fn unsubscribe_stops_pushes() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .try_init();

    let relay = MemoryRelay::new();
    let mut alice = relay.connect("memory://").await.unwrap();
    let mut bob = relay.connect("memory://").await.unwrap();

    let id = subscribe(&mut bob, "room").await;
    assert_eq!(relay.subscriber_count("room"), 1);

    publish(&mut alice, "room", "first").await;
    assert_eq!(
        pushed_message(next(&mut bob).await),
        ("room".to_string(), "first".to_string())
    );

    bob.send(&JsonRpcRequest::new(
        "irn_unsubscribe",
        UnsubscribeParams {
            topic: "room".into(),
            id,
        },
    ))
    .await
    .unwrap();
    assert!(matches!(next(&mut bob).await, JsonRpcPayload::Result(_)));
    assert_eq!(relay.subscriber_count("room"), 0);

    publish(&mut alice, "room", "second").await;
    nothing(&mut bob).await;

    let published = relay.published();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].tag, 1100);
    assert!(published[0].prompt);
}

#[tokio::test]
async fn redeliver_repeats_stored_messages() {
    let relay = MemoryRelay::new();
    let mut alice = relay.connect("memory://").await.unwrap();
    let mut bob = relay.connect("memory://").await.unwrap();

    subscribe(&mut bob, "room").await;
    publish(&mut alice, "room", "once").await;
    let first = pushed_message(next(&mut bob).await);

    relay.redeliver("room").await;
    let again = pushed_message(next(&mut bob).await);
    assert_eq!(first, again);

    // Acks for pushes need no answer.
    bob.send(&JsonRpcResult::new(1, true)).await.unwrap();
    nothing(&mut bob).await;
}

#[tokio::test]
async fn connection_count_tracks_links() {
    let relay = MemoryRelay::new();
    let first = relay.connect("memory://").await.unwrap();
    let _second = relay.connect("memory://").await.unwrap();
    assert_eq!(relay.connection_count(), 2);

    drop(first);
    tokio::time::timeout(Duration::from_secs(2), async {
        while relay.connection_count() != 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("closed link never cleaned up");
}

#[tokio::test]
async fn unknown_relay_method_rejected() {
    let relay = MemoryRelay::new();
    let mut link = relay.connect("memory://").await.unwrap();
    link.send(&JsonRpcRequest::new("irn_fetchMessages", serde_json::json!({})))
        .await
        .unwrap();
    match next(&mut link).await {
        JsonRpcPayload::Error(e) => assert_eq!(e.error.code, -32601),
        other => panic!("expected method-not-found, got {other:?}"),
    }
}

#[tokio::test]
async fn websocket_connect_failure_hides_auth() {
    let url = format_relay_rpc_url("ws://127.0.0.1:1", "secret.jwt.token", Some("p"), "ua").unwrap();
    match WsConnector::new().connect(&url).await {
        Err(TransportError::Unavailable { url }) => {
            assert_eq!(url, "ws://127.0.0.1:1");
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("nothing listens on port 1"),
    }
}
