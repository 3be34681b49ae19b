/// Sign client: the public entry point.
///
/// Wires storage, crypto, heartbeat, relayer and engine together and
/// delegates every protocol operation to the engine.
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use wc_transport::{format_relay_rpc_url, Connector, RpcId, WsConnector, DEFAULT_RELAY_URL};

use crate::crypto::Crypto;
use crate::engine::models::{
    EventArguments, Metadata, Namespaces, PairingStruct, ProposalStruct, RequestArguments,
    RequiredNamespaces, SessionStruct,
};
use crate::engine::{ApproveData, ConnectData, ConnectParams, Engine};
use crate::error::ErrorResponse;
use crate::events::{Pending, SignEvent};
use crate::heartbeat::{HeartBeat, DEFAULT_HEARTBEAT_INTERVAL};
use crate::history::JsonRpcRecord;
use crate::relay::{Relayer, RelayerEvent, RelayerOptions};
use crate::storage::{KeyValueStorage, MemoryStorage};
use crate::WalletConnectError;

/// Environment variable overriding the default relay URL.
pub const RELAY_URL_ENV: &str = "WC_RELAY_URL";

/// Configuration for a [`SignClient`].
///
/// ```rust
/// use std::time::Duration;
/// use wc_protocol::SignClientOptions;
///
/// let options = SignClientOptions::new()
///     .project_id("my-project")
///     .heartbeat_interval(Duration::from_secs(10));
/// ```
#[derive(Clone)]
pub struct SignClientOptions {
    pub(crate) project_id: Option<String>,
    pub(crate) relay_url: String,
    pub(crate) metadata: Metadata,
    pub(crate) storage: Arc<dyn KeyValueStorage>,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) reconnect_delay: Duration,
    pub(crate) connector: Arc<dyn Connector>,
}

impl Default for SignClientOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl SignClientOptions {
    /// Defaults: public relay, in-memory storage, 5s heartbeat, websocket.
    ///
    /// If `WC_RELAY_URL` is set it replaces the default relay; an explicit
    /// [`.relay_url()`](Self::relay_url) still wins.
    pub fn new() -> Self {
        let relay_url =
            std::env::var(RELAY_URL_ENV).unwrap_or_else(|_| DEFAULT_RELAY_URL.to_string());

        Self {
            project_id: None,
            relay_url,
            metadata: Metadata::default(),
            storage: Arc::new(MemoryStorage::new()),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_delay: Duration::from_secs(1),
            connector: Arc::new(WsConnector::new()),
        }
    }

    pub fn project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn relay_url(mut self, url: impl Into<String>) -> Self {
        self.relay_url = url.into();
        self
    }

    /// Metadata shown to the peer during pairing.
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Persistence backend (default: in-memory).
    pub fn storage(mut self, storage: Arc<dyn KeyValueStorage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Relay transport (default: websocket).
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn get_relay_url(&self) -> &str {
        &self.relay_url
    }
}

/// `wc-2/rust-<version>/<os>`
fn user_agent() -> String {
    format!(
        "wc-2/rust-{}/{}",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS
    )
}

/// A WalletConnect v2 sign client.
pub struct SignClient {
    crypto: Arc<Crypto>,
    relayer: Relayer,
    engine: Engine,
    heartbeat: HeartBeat,
    cancel: CancellationToken,
}

impl SignClient {
    /// Initialize crypto, connect to the relay and restore persisted state.
    pub async fn init(options: SignClientOptions) -> Result<Self, WalletConnectError> {
        let crypto = Arc::new(Crypto::new(options.storage.clone()));
        crypto.init().await?;

        let heartbeat = HeartBeat::start(options.heartbeat_interval);

        let auth = crypto.sign_jwt(&options.relay_url).await?;
        let rpc_url = format_relay_rpc_url(
            &options.relay_url,
            &auth,
            options.project_id.as_deref(),
            &user_agent(),
        )?;
        let relayer_options = RelayerOptions::new(rpc_url).reconnect_delay(options.reconnect_delay);
        let (relayer, messages) =
            Relayer::connect(relayer_options, options.connector.clone(), heartbeat.subscribe())
                .await?;

        let engine = Engine::new(
            crypto.clone(),
            relayer.clone(),
            options.storage.clone(),
            options.metadata.clone(),
        );
        engine.init().await?;

        let cancel = CancellationToken::new();
        engine.spawn_loop(messages, heartbeat.subscribe(), cancel.clone());

        tracing::info!("sign client ready ({})", crypto.get_client_id().await?);
        Ok(Self {
            crypto,
            relayer,
            engine,
            heartbeat,
            cancel,
        })
    }

    // ── Protocol operations ──────────────────────────────────────────

    pub async fn connect(&self, params: ConnectParams) -> Result<ConnectData, WalletConnectError> {
        self.engine.connect(params).await
    }

    pub async fn pair(&self, uri: &str) -> Result<PairingStruct, WalletConnectError> {
        self.engine.pair(uri).await
    }

    pub async fn approve(
        &self,
        id: RpcId,
        namespaces: Namespaces,
        relay_protocol: Option<String>,
    ) -> Result<ApproveData, WalletConnectError> {
        self.engine.approve(id, namespaces, relay_protocol).await
    }

    pub async fn reject(&self, id: RpcId, reason: ErrorResponse) -> Result<(), WalletConnectError> {
        self.engine.reject(id, reason).await
    }

    pub async fn update(
        &self,
        topic: &str,
        namespaces: Namespaces,
    ) -> Result<Pending<()>, WalletConnectError> {
        self.engine.update(topic, namespaces).await
    }

    pub async fn extend(&self, topic: &str) -> Result<Pending<()>, WalletConnectError> {
        self.engine.extend(topic).await
    }

    pub async fn ping(&self, topic: &str) -> Result<(), WalletConnectError> {
        self.engine.ping(topic).await
    }

    pub async fn disconnect(&self, topic: &str, reason: ErrorResponse) -> Result<(), WalletConnectError> {
        self.engine.disconnect(topic, reason).await
    }

    pub async fn request(
        &self,
        topic: &str,
        chain_id: &str,
        request: RequestArguments,
    ) -> Result<Pending<Value>, WalletConnectError> {
        self.engine.request(topic, chain_id, request).await
    }

    pub async fn respond(
        &self,
        topic: &str,
        id: RpcId,
        response: Result<Value, ErrorResponse>,
    ) -> Result<(), WalletConnectError> {
        self.engine.respond(topic, id, response).await
    }

    pub async fn emit(
        &self,
        topic: &str,
        chain_id: &str,
        event: EventArguments,
    ) -> Result<(), WalletConnectError> {
        self.engine.emit(topic, chain_id, event).await
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub async fn find(&self, required: &RequiredNamespaces) -> Vec<SessionStruct> {
        self.engine.find(required).await
    }

    pub async fn pairings(&self) -> Vec<PairingStruct> {
        self.engine.pairings().await
    }

    pub async fn sessions(&self) -> Vec<SessionStruct> {
        self.engine.sessions().await
    }

    pub async fn proposals(&self) -> Vec<ProposalStruct> {
        self.engine.proposals().await
    }

    /// Outbound requests on `topic` still awaiting an answer.
    pub async fn pending_requests(&self, topic: &str) -> Vec<JsonRpcRecord> {
        self.engine.pending_requests(topic).await
    }

    /// DID of this installation.
    pub async fn client_id(&self) -> Result<String, WalletConnectError> {
        self.crypto.get_client_id().await
    }

    // ── Events / lifecycle ───────────────────────────────────────────

    pub fn events(&self) -> broadcast::Receiver<SignEvent> {
        self.engine.events()
    }

    pub fn relayer_events(&self) -> broadcast::Receiver<RelayerEvent> {
        self.relayer.events()
    }

    pub fn relayer(&self) -> &Relayer {
        &self.relayer
    }

    /// Stop background tasks and close the relay link.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.heartbeat.stop();
        self.relayer.shutdown().await;
        self.engine.cancel_pending();
        tracing::info!("sign client shut down");
    }
}

impl Drop for SignClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_format() {
        let ua = user_agent();
        assert!(ua.starts_with("wc-2/rust-"));
        assert!(ua.ends_with(std::env::consts::OS));
    }

    #[test]
    fn builder_overrides() {
        let options = SignClientOptions::new()
            .relay_url("wss://relay.example.com")
            .project_id("p")
            .heartbeat_interval(Duration::from_millis(100));
        assert_eq!(options.get_relay_url(), "wss://relay.example.com");
        assert_eq!(options.project_id.as_deref(), Some("p"));
        assert_eq!(options.heartbeat_interval, Duration::from_millis(100));
    }
}
