//! Relay wire schema: method names and params for the `irn` protocol.
use serde::{Deserialize, Serialize};

/// Default relay protocol name.
pub const IRN: &str = "irn";

/// Method names for one relay protocol (`{protocol}_publish`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMethods {
    pub publish: String,
    pub subscribe: String,
    pub unsubscribe: String,
    pub subscription: String,
}

impl RelayMethods {
    pub fn for_protocol(protocol: &str) -> Self {
        Self {
            publish: format!("{protocol}_publish"),
            subscribe: format!("{protocol}_subscribe"),
            unsubscribe: format!("{protocol}_unsubscribe"),
            subscription: format!("{protocol}_subscription"),
        }
    }
}

/// Which relay operation a method name refers to, whatever its protocol prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOperation {
    Publish,
    Subscribe,
    Unsubscribe,
    Subscription,
}

impl RelayOperation {
    pub fn from_method(method: &str) -> Option<Self> {
        if method.ends_with("_publish") {
            Some(RelayOperation::Publish)
        } else if method.ends_with("_unsubscribe") {
            Some(RelayOperation::Unsubscribe)
        } else if method.ends_with("_subscribe") {
            Some(RelayOperation::Subscribe)
        } else if method.ends_with("_subscription") {
            Some(RelayOperation::Subscription)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishParams {
    pub topic: String,
    pub message: String,
    pub ttl: u64,
    pub tag: u32,
    #[serde(default)]
    pub prompt: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeParams {
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeParams {
    pub topic: String,
    pub id: String,
}

/// Params of an inbound `*_subscription` request pushed by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionParams {
    pub id: String,
    pub data: SubscriptionData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionData {
    pub topic: String,
    pub message: String,
}
