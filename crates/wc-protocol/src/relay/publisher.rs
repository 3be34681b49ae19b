/// Publish retry queue.
///
/// A job stays queued from `enqueue` until the relay acknowledges one of
/// its publish RPCs. Every heartbeat pulse re-sends everything still
/// queued: at-least-once, no backoff, no cap.
///
/// Pure logic, no I/O. The relayer loop sends the RPCs.
use std::collections::HashMap;

use crate::crypto::hash_message;
use crate::types::SIX_HOURS;

/// Per-message relay publish options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOptions {
    /// Seconds the relay keeps the message for offline subscribers.
    pub ttl: u64,
    pub tag: u32,
    /// Ask the relay to wake the receiving wallet (push).
    pub prompt: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            ttl: SIX_HOURS,
            tag: 0,
            prompt: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishJob {
    pub hash: String,
    pub topic: String,
    pub message: String,
    pub opts: PublishOptions,
    /// Relay protocol name (`irn`).
    pub relay: String,
}

#[derive(Debug, Default)]
pub struct Publisher {
    queue: HashMap<String, PublishJob>,
}

impl Publisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message and return its content hash.
    ///
    /// Re-queueing identical content replaces the previous job.
    pub fn enqueue(&mut self, topic: &str, message: &str, opts: PublishOptions, relay: &str) -> String {
        let hash = hash_message(message);
        self.queue.insert(
            hash.clone(),
            PublishJob {
                hash: hash.clone(),
                topic: topic.to_string(),
                message: message.to_string(),
                opts,
                relay: relay.to_string(),
            },
        );
        hash
    }

    pub fn get(&self, hash: &str) -> Option<&PublishJob> {
        self.queue.get(hash)
    }

    /// Drop an acknowledged job. Returns `false` if it was already gone.
    pub fn acknowledge(&mut self, hash: &str) -> bool {
        self.queue.remove(hash).is_some()
    }

    /// Hashes of every job awaiting acknowledgement.
    pub fn pending(&self) -> Vec<String> {
        self.queue.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_until_acknowledged() {
        let mut publisher = Publisher::new();
        let hash = publisher.enqueue("t", "msg", PublishOptions::default(), "irn");
        assert_eq!(hash, hash_message("msg"));
        assert_eq!(publisher.len(), 1);
        assert_eq!(publisher.get(&hash).unwrap().opts.ttl, SIX_HOURS);

        assert!(publisher.acknowledge(&hash));
        assert!(!publisher.acknowledge(&hash));
        assert!(publisher.is_empty());
    }

    #[test]
    fn identical_content_is_one_job() {
        let mut publisher = Publisher::new();
        publisher.enqueue("t", "same", PublishOptions::default(), "irn");
        publisher.enqueue("t", "same", PublishOptions::default(), "irn");
        publisher.enqueue("t", "other", PublishOptions::default(), "irn");
        assert_eq!(publisher.pending().len(), 2);
    }

    #[test]
    fn default_options() {
        let opts = PublishOptions::default();
        assert_eq!(opts, PublishOptions { ttl: 21_600, tag: 0, prompt: false });
    }
}
