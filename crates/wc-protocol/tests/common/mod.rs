//! Shared helpers: sign clients on an in-memory relay.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::timeout;
use wc_protocol::{
    namespaces_from_required, ConnectParams, KeyValueStorage, MemoryStorage, Metadata,
    RequiredNamespace, RequiredNamespaces, SessionStruct, SignClient, SignClientOptions,
    SignEvent,
};
use wc_transport::MemoryRelay;

pub const WAIT: Duration = Duration::from_secs(10);
pub const ADDRESS: &str = "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .try_init();
}

pub fn metadata(name: &str) -> Metadata {
    Metadata {
        name: name.to_string(),
        description: format!("{name} test peer"),
        url: format!("https://{name}.test"),
        icons: Vec::new(),
    }
}

pub fn options(relay: &MemoryRelay, name: &str, storage: Arc<dyn KeyValueStorage>) -> SignClientOptions {
    SignClientOptions::new()
        .relay_url("wss://relay.test")
        .project_id("test-project")
        .metadata(metadata(name))
        .storage(storage)
        .heartbeat_interval(Duration::from_millis(200))
        .reconnect_delay(Duration::from_millis(50))
        .connector(Arc::new(relay.clone()))
}

pub async fn client(relay: &MemoryRelay, name: &str) -> SignClient {
    SignClient::init(options(relay, name, Arc::new(MemoryStorage::new())))
        .await
        .expect("client init")
}

/// eip155:1 with `eth_sign` and `accountsChanged`.
pub fn required() -> RequiredNamespaces {
    let mut required = BTreeMap::new();
    required.insert(
        "eip155".to_string(),
        RequiredNamespace {
            chains: vec!["eip155:1".to_string()],
            methods: vec!["eth_sign".to_string()],
            events: vec!["accountsChanged".to_string()],
            extension: None,
        },
    );
    required
}

/// Wait for the first event `pick` accepts.
pub async fn next_event<T>(
    events: &mut broadcast::Receiver<SignEvent>,
    mut pick: impl FnMut(SignEvent) -> Option<T>,
) -> T {
    timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(found) = pick(event) {
                        return found;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("event timed out")
}

/// A settled session as seen by both sides.
pub struct Settled {
    pub topic: String,
    pub pairing_topic: String,
    pub dapp_session: SessionStruct,
    pub wallet_session: SessionStruct,
}

/// Run propose → pair → approve → settle between `dapp` and `wallet`.
pub async fn settle(dapp: &SignClient, wallet: &SignClient) -> Settled {
    let mut wallet_events = wallet.events();
    let connect = dapp
        .connect(ConnectParams::new(required()))
        .await
        .expect("connect");
    let uri = connect.uri.expect("fresh pairing has a uri");
    wallet.pair(&uri).await.expect("pair");

    let id = next_event(&mut wallet_events, |event| match event {
        SignEvent::SessionProposal { id, .. } => Some(id),
        _ => None,
    })
    .await;
    let approved = wallet
        .approve(id, namespaces_from_required(&required(), ADDRESS), None)
        .await
        .expect("approve");

    let dapp_session = timeout(WAIT, connect.approval)
        .await
        .expect("approval timed out")
        .expect("approval");
    let wallet_session = timeout(WAIT, approved.acknowledged)
        .await
        .expect("acknowledgement timed out")
        .expect("acknowledged");

    Settled {
        topic: approved.topic,
        pairing_topic: connect.pairing_topic,
        dapp_session,
        wallet_session,
    }
}
