/// Subscription bookkeeping: topic -> relay subscription id.
///
/// A topic is tracked from the moment its subscribe RPC is sent, so
/// messages the relay pushes right after acknowledging are not dropped.
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
enum SubscriptionState {
    Pending,
    Active { id: String },
}

#[derive(Debug, Default)]
pub struct Subscriber {
    topics: HashMap<String, SubscriptionState>,
}

impl Subscriber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe RPC sent, no id yet.
    pub fn mark_pending(&mut self, topic: &str) {
        self.topics
            .entry(topic.to_string())
            .or_insert(SubscriptionState::Pending);
    }

    /// Subscribe RPC acknowledged with `id`.
    pub fn activate(&mut self, topic: &str, id: String) {
        self.topics
            .insert(topic.to_string(), SubscriptionState::Active { id });
    }

    /// Forget a topic, returning its subscription id if it was active.
    pub fn remove(&mut self, topic: &str) -> Option<String> {
        match self.topics.remove(topic) {
            Some(SubscriptionState::Active { id }) => Some(id),
            _ => None,
        }
    }

    /// Whether inbound messages for `topic` should be delivered.
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    pub fn subscription_id(&self, topic: &str) -> Option<&str> {
        match self.topics.get(topic) {
            Some(SubscriptionState::Active { id }) => Some(id),
            _ => None,
        }
    }

    /// Every tracked topic, pending or active.
    pub fn topics(&self) -> Vec<String> {
        self.topics.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}
