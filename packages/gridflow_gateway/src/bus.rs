//! In-process topic bus.
//!
//! Streaming and persistence traffic is republished here instead of being
//! answered directly. Every session subscribes to the bus and filters the
//! firehose down to its own topic prefixes.

use std::collections::HashSet;

use serde_json::Value;
use tokio::sync::broadcast;

/// One published bus message.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Value,
}

/// Process-wide broadcast bus. Cloning shares the underlying channel.
#[derive(Debug, Clone)]
pub struct MessageBus {
    tx: broadcast::Sender<BusMessage>,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish to a topic. Returns how many receivers saw the message.
    pub fn publish(&self, topic: impl Into<String>, payload: Value) -> usize {
        self.tx
            .send(BusMessage {
                topic: topic.into(),
                payload,
            })
            .unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }
}

/// Well-known topic names under the configured prefix.
#[derive(Debug, Clone)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn streams_events(&self) -> String {
        format!("{}/streams/events", self.prefix)
    }

    pub fn auth_events(&self) -> String {
        format!("{}/auth/events", self.prefix)
    }

    pub fn persistence_events(&self) -> String {
        format!("{}/persistence/events", self.prefix)
    }

    /// The prefixes every session subscribes to at startup.
    pub fn session_defaults(&self) -> [String; 3] {
        [
            self.streams_events(),
            self.auth_events(),
            self.persistence_events(),
        ]
    }
}

/// Per-session topic subscriptions, matched by prefix.
///
/// Backed by a set, so subscribing to the same prefix twice never duplicates
/// delivery.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    prefixes: HashSet<String>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the prefix was already subscribed.
    pub fn add(&mut self, prefix: impl Into<String>) -> bool {
        self.prefixes.insert(prefix.into())
    }

    pub fn remove(&mut self, prefix: &str) -> bool {
        self.prefixes.remove(prefix)
    }

    pub fn matches(&self, topic: &str) -> bool {
        self.prefixes.iter().any(|p| topic.starts_with(p.as_str()))
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}

/// Suppression of internal chatter on the streams-events topic family.
///
/// Suffix exclusion applies only under the streams-events prefix; the same
/// suffix elsewhere passes through.
#[derive(Debug, Clone)]
pub struct BusFilter {
    streams_prefix: String,
    excluded_suffixes: Vec<String>,
}

impl BusFilter {
    pub fn new(streams_prefix: impl Into<String>, excluded_suffixes: Vec<String>) -> Self {
        Self {
            streams_prefix: streams_prefix.into(),
            excluded_suffixes,
        }
    }

    /// True when the message may be forwarded to clients.
    pub fn allows(&self, topic: &str) -> bool {
        if !topic.starts_with(self.streams_prefix.as_str()) {
            return true;
        }
        !self
            .excluded_suffixes
            .iter()
            .any(|suffix| topic.ends_with(suffix.as_str()))
    }
}
