//! WalletConnect v2 relay transport.
//!
//! Carries JSON-RPC text frames between a client and a relay server.
//! The protocol layer never touches sockets: it asks a [`Connector`] for a
//! [`Link`] (a pair of text channels) and speaks the relay wire methods
//! defined in [`relay_api`] over it.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use wc_transport::{Connector, JsonRpcRequest, WsConnector};
//!
//! # async fn example() -> Result<(), wc_transport::TransportError> {
//! let mut link = WsConnector::new().connect("wss://relay.walletconnect.com").await?;
//!
//! let request = JsonRpcRequest::new("irn_subscribe", serde_json::json!({ "topic": "abc" }));
//! link.send(&request).await?;
//!
//! if let Some(text) = link.inbound.recv().await {
//!     println!("relay said: {text}");
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod connection;
mod error;
mod memory;
pub mod relay_api;
mod rpc;
mod websocket;

pub use config::{format_relay_rpc_url, redact_url, DEFAULT_RELAY_URL};
pub use connection::{Connector, Link};
pub use error::TransportError;
pub use memory::MemoryRelay;
pub use rpc::{
    now_ms, payload_id, ErrorPayload, JsonRpcError, JsonRpcPayload, JsonRpcRequest,
    JsonRpcResult, RpcId, JSONRPC_VERSION,
};
pub use websocket::WsConnector;
