//! WalletConnect v2 sign protocol layer.
//!
//! Implements envelope crypto, relay reliability, and the pairing/session
//! engine on top of `wc-transport`.
//!
//! Wire format: JSON-RPC 2.0 sealed in base64 envelopes.
//! Crypto: X25519 + HKDF-SHA256 key agreement, ChaCha20-Poly1305 sealing,
//! Ed25519 client identity (did:key JWTs).

pub mod client;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod events;
pub mod expirer;
pub mod heartbeat;
pub mod history;
pub mod relay;
pub mod storage;
pub mod store;
pub mod types;

pub use client::{SignClient, SignClientOptions, RELAY_URL_ENV};
pub use crypto::{Crypto, DecodeOptions, EncodeOptions, EnvelopeType, JwtClaims};
pub use engine::models::{
    EventArguments, Metadata, Namespace, NamespaceExtension, Namespaces, PairingStruct,
    Participant, ProposalStruct, RelayProtocolOptions, RequestArguments, RequiredNamespace,
    RequiredNamespaceExtension, RequiredNamespaces, SessionStruct,
};
pub use engine::uri::PairingUri;
pub use engine::validation::namespaces_from_required;
pub use engine::{ApproveData, ConnectData, ConnectParams, Engine};
pub use error::{ErrorResponse, SdkError, WalletConnectError};
pub use events::{Pending, SignEvent};
pub use expirer::{Expirer, ExpirerTarget};
pub use heartbeat::HeartBeat;
pub use history::{Direction, JsonRpcHistory, JsonRpcRecord};
pub use relay::{MessageEvent, PublishOptions, Relayer, RelayerEvent, RelayerOptions};
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage};
pub use store::{Keyed, Store};
pub use types::{calc_expiry, is_expired, now_secs};
