//! Topic bus: named priority queues of expiring request messages.
//!
//! Producers and consumers never reference each other; they only agree on a
//! topic name. Every read applies the same expiry rule before acting, so
//! peek, select and consume always agree on what is visible:
//!
//! ```text
//! expired  <=>  enqueue_tick + ttl < current_tick
//! ```
//!
//! Expiry is lazy. Nothing sweeps the bus in the background; stale messages are
//! pruned the next time their topic is consumed from.

use crate::types::{Result, Tick, TopicsConfig};
use crate::validation::validate_priority;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

// =============================================================================
// Message Types
// =============================================================================

/// A request waiting on a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    /// Higher is served first.
    pub priority: f64,
    /// Opaque payload. The bus stores and forwards it without looking inside.
    pub details: Value,
    pub enqueue_tick: Tick,
    pub ttl: Tick,
    /// Per-topic send counter; breaks priority ties oldest-first.
    pub sequence: u64,
}

impl Message {
    pub fn is_expired(&self, now: Tick) -> bool {
        self.enqueue_tick.saturating_add(self.ttl) < now
    }

    /// Last tick at which the message is still readable.
    pub fn expires_after(&self) -> Tick {
        self.enqueue_tick.saturating_add(self.ttl)
    }

    fn serve_order(&self, other: &Self) -> Ordering {
        other
            .priority
            .total_cmp(&self.priority)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

// =============================================================================
// Topic Queue
// =============================================================================

/// Messages of one topic, kept in serve order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicQueue {
    next_sequence: u64,
    messages: Vec<Message>,
}

impl TopicQueue {
    fn insert(&mut self, message: Message) {
        let idx = self
            .messages
            .partition_point(|m| m.serve_order(&message) == Ordering::Less);
        self.messages.insert(idx, message);
    }

    /// Drop expired messages, returning how many were removed.
    fn prune(&mut self, now: Tick) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| !m.is_expired(now));
        before - self.messages.len()
    }

    fn visible(&self, now: Tick) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(move |m| !m.is_expired(now))
    }

    /// Restore ordering and counter after deserialization.
    fn normalize(&mut self) {
        self.messages.sort_by(|a, b| a.serve_order(b));
        let mut seen = HashSet::new();
        if !self.messages.iter().all(|m| seen.insert(m.sequence)) {
            tracing::warn!(messages = self.messages.len(), "topic_sequences_renumbered");
            for (sequence, message) in (0u64..).zip(self.messages.iter_mut()) {
                message.sequence = sequence;
            }
        }
        if let Some(max) = self.messages.iter().map(|m| m.sequence).max() {
            self.next_sequence = self.next_sequence.max(max + 1);
        }
    }
}

// =============================================================================
// TopicBus
// =============================================================================

/// Statistics about bus usage since construction or restore.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    pub messages_sent: u64,
    pub messages_consumed: u64,
    pub messages_expired: u64,
}

/// In-memory topic bus.
///
/// The kernel advances [`TopicBus::set_tick`] at the start of each tick; all
/// expiry decisions use that tick.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct TopicBus {
    topics: BTreeMap<String, TopicQueue>,

    #[serde(skip)]
    tick: Tick,

    #[serde(skip)]
    config: TopicsConfig,

    #[serde(skip)]
    stats: BusStats,
}

impl TopicBus {
    pub fn new(config: TopicsConfig) -> Self {
        Self {
            topics: BTreeMap::new(),
            tick: 0,
            config,
            stats: BusStats::default(),
        }
    }

    pub fn set_tick(&mut self, tick: Tick) {
        self.tick = tick;
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub(crate) fn set_config(&mut self, config: TopicsConfig) {
        self.config = config;
    }

    /// Queue a request on `topic`. Returns the assigned sequence number.
    ///
    /// TTLs above the configured maximum are clamped. A non-finite priority is
    /// a config error and nothing is queued.
    pub fn send_request(
        &mut self,
        topic: &str,
        priority: f64,
        details: Value,
        ttl: Tick,
    ) -> Result<u64> {
        if let Err(err) = validate_priority(priority, "priority") {
            tracing::warn!(topic, priority, "request_rejected");
            return Err(err);
        }
        let ttl = ttl.min(self.config.max_ttl);
        let queue = self.topics.entry(topic.to_string()).or_default();
        let sequence = queue.next_sequence;
        queue.next_sequence += 1;

        queue.insert(Message {
            topic: topic.to_string(),
            priority,
            details,
            enqueue_tick: self.tick,
            ttl,
            sequence,
        });
        self.stats.messages_sent += 1;

        tracing::trace!(topic, priority, ttl, sequence, "request_sent");
        Ok(sequence)
    }

    /// Remove and return the highest-priority visible message.
    pub fn get_next_request(&mut self, topic: &str) -> Option<Message> {
        let queue = self.visible_queue(topic)?;
        if queue.messages.is_empty() {
            return None;
        }
        let message = queue.messages.remove(0);
        self.stats.messages_consumed += 1;
        Some(message)
    }

    /// The message `get_next_request` would return, left in place.
    pub fn peek_next_request(&self, topic: &str) -> Option<&Message> {
        self.topics.get(topic)?.visible(self.tick).next()
    }

    /// Let the caller pick among all visible messages.
    ///
    /// `selector` sees the visible messages in serve order. Exactly the message
    /// it returns is removed; if it returns `None`, the queue is untouched.
    /// The selector is a plain `Fn` so it cannot mutate captured state.
    pub fn get_message_of_my_choice<F>(&mut self, topic: &str, selector: F) -> Option<Message>
    where
        F: Fn(&[Message]) -> Option<&Message>,
    {
        let queue = self.visible_queue(topic)?;
        let chosen = selector(&queue.messages)?;
        let idx = queue
            .messages
            .iter()
            .position(|m| std::ptr::eq(m, chosen))?;
        let message = queue.messages.remove(idx);
        self.stats.messages_consumed += 1;
        Some(message)
    }

    /// Number of visible messages on `topic`.
    pub fn topic_length(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|q| q.visible(self.tick).count())
            .unwrap_or(0)
    }

    /// Names of all topics that have ever received a message.
    pub fn topic_names(&self) -> Vec<&str> {
        self.topics.keys().map(String::as_str).collect()
    }

    /// Drop every message on `topic`. Returns how many were dropped.
    pub fn clear_topic(&mut self, topic: &str) -> usize {
        self.topics
            .get_mut(topic)
            .map(|q| std::mem::take(&mut q.messages).len())
            .unwrap_or(0)
    }

    /// Get current bus statistics.
    pub fn stats(&self) -> &BusStats {
        &self.stats
    }

    /// Reset statistics counters.
    pub fn reset_stats(&mut self) {
        self.stats = BusStats::default();
    }

    /// Re-establish queue ordering and sequence counters after a restore.
    pub(crate) fn normalize(&mut self) {
        for queue in self.topics.values_mut() {
            queue.normalize();
        }
    }

    fn visible_queue(&mut self, topic: &str) -> Option<&mut TopicQueue> {
        let now = self.tick;
        let queue = self.topics.get_mut(topic)?;
        let expired = queue.prune(now);
        if expired > 0 {
            self.stats.messages_expired += expired as u64;
            tracing::debug!(topic, expired, tick = now, "messages_expired");
        }
        Some(queue)
    }
}

// =============================================================================
// Tests
// =============================================================================
