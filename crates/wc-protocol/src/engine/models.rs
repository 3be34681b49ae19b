/// Records and wire params of the sign protocol.
///
/// Records are immutable values; state changes build a new value and
/// replace the stored one.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use wc_transport::RpcId;

use crate::error::ErrorResponse;
use crate::store::Keyed;

/// Namespace key (`eip155`) → required chains/methods/events.
pub type RequiredNamespaces = BTreeMap<String, RequiredNamespace>;
/// Namespace key (`eip155`) → granted accounts/methods/events.
pub type Namespaces = BTreeMap<String, Namespace>;

// ── Participants ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub icons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayProtocolOptions {
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Default for RelayProtocolOptions {
    fn default() -> Self {
        Self {
            protocol: wc_transport::relay_api::IRN.to_string(),
            data: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub public_key: String,
    pub metadata: Metadata,
}

// ── Namespaces ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredNamespaceExtension {
    pub chains: Vec<String>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredNamespace {
    pub chains: Vec<String>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<Vec<RequiredNamespaceExtension>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceExtension {
    pub accounts: Vec<String>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub accounts: Vec<String>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<Vec<NamespaceExtension>>,
}

// ── Records ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingStruct {
    pub topic: String,
    pub expiry: u64,
    pub relay: RelayProtocolOptions,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_metadata: Option<Metadata>,
}

impl PairingStruct {
    pub fn activated(&self, expiry: u64) -> Self {
        Self {
            active: true,
            expiry,
            ..self.clone()
        }
    }
}

impl Keyed<String> for PairingStruct {
    fn key(&self) -> String {
        self.topic.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalStruct {
    pub id: RpcId,
    pub expiry: u64,
    pub relays: Vec<RelayProtocolOptions>,
    pub proposer: Participant,
    pub required_namespaces: RequiredNamespaces,
    pub pairing_topic: String,
}

impl Keyed<RpcId> for ProposalStruct {
    fn key(&self) -> RpcId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStruct {
    pub topic: String,
    pub relay: RelayProtocolOptions,
    pub expiry: u64,
    pub acknowledged: bool,
    /// Public key of the controlling participant (the wallet).
    pub controller: String,
    pub namespaces: Namespaces,
    pub required_namespaces: RequiredNamespaces,
    #[serde(rename = "self")]
    pub self_: Participant,
    pub peer: Participant,
}

impl SessionStruct {
    pub fn acknowledge(&self) -> Self {
        Self {
            acknowledged: true,
            ..self.clone()
        }
    }

    pub fn with_namespaces(&self, namespaces: Namespaces) -> Self {
        Self {
            namespaces,
            ..self.clone()
        }
    }

    pub fn with_expiry(&self, expiry: u64) -> Self {
        Self {
            expiry,
            ..self.clone()
        }
    }

    /// Whether this side controls the session.
    pub fn is_controller(&self) -> bool {
        self.controller == self.self_.public_key
    }
}

impl Keyed<String> for SessionStruct {
    fn key(&self) -> String {
        self.topic.clone()
    }
}

// ── Wire params ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProposeParams {
    pub relays: Vec<RelayProtocolOptions>,
    pub proposer: Participant,
    pub required_namespaces: RequiredNamespaces,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProposeResponse {
    pub relay: RelayProtocolOptions,
    pub responder_public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettleParams {
    pub relay: RelayProtocolOptions,
    pub namespaces: Namespaces,
    pub required_namespaces: RequiredNamespaces,
    pub controller: Participant,
    pub expiry: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUpdateParams {
    pub namespaces: Namespaces,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionExtendParams {
    pub expiry: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPingParams {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingPingParams {}

/// Delete params are the error object naming the reason.
pub type SessionDeleteParams = ErrorResponse;
pub type PairingDeleteParams = ErrorResponse;

/// Application-level request carried by `wc_sessionRequest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestArguments {
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequestParams {
    pub request: RequestArguments,
    pub chain_id: String,
}

/// Application-level event carried by `wc_sessionEvent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventArguments {
    pub name: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEventParams {
    pub event: EventArguments,
    pub chain_id: String,
}
