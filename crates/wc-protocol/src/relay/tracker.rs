/// Inbound de-duplication by (topic, content hash).
///
/// Relays redeliver until acknowledged and replay stored messages on
/// resubscribe; a message recorded here is never passed upward again.
/// Entries live for the process lifetime or until the topic is dropped.
///
/// Pure logic, no I/O.
use std::collections::{HashMap, HashSet};

use crate::crypto::hash_message;

#[derive(Debug, Default)]
pub struct MessageTracker {
    seen: HashMap<String, HashSet<String>>,
}

impl MessageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, topic: &str, message: &str) -> bool {
        self.seen
            .get(topic)
            .is_some_and(|hashes| hashes.contains(&hash_message(message)))
    }

    /// Record a message. Returns `false` if it was already recorded.
    pub fn set(&mut self, topic: &str, message: &str) -> bool {
        self.seen
            .entry(topic.to_string())
            .or_default()
            .insert(hash_message(message))
    }

    /// Forget everything recorded for `topic`.
    pub fn forget(&mut self, topic: &str) {
        self.seen.remove(topic);
    }

    /// Total recorded messages across topics.
    pub fn len(&self) -> usize {
        self.seen.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
