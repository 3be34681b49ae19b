/// A live relay link and the trait that opens one.
use serde::Serialize;
use tokio::sync::mpsc;

use crate::TransportError;

/// Open text channels to a relay.
///
/// Dropping `outbound` closes the connection. When the connection dies
/// the sender side of `inbound` is dropped, so `inbound.recv()` yields `None`.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

impl Link {
    /// Serialize and send one JSON-RPC payload.
    pub async fn send<T: Serialize>(&self, payload: &T) -> Result<(), TransportError> {
        let text = serde_json::to_string(payload).map_err(TransportError::Serialization)?;
        self.outbound
            .send(text)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// Opens links to a relay.
///
/// In production: [`WsConnector`](crate::WsConnector) (websocket).
/// In tests: [`MemoryRelay`](crate::MemoryRelay) or a scripted connector.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Link, TransportError>;
}
