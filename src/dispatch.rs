//! Subscription registry and pushed-message dispatch.
//!
//! The registry is an ordered list of `(key, callback)` entries owned by the
//! session loop. Each pushed message is matched against every entry in
//! registration order; each matching entry's callback runs once.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;

use crate::key::SubscriptionKey;
use crate::session::frame::PushedMessage;

/// Callback invoked with the body of each matching pushed message.
pub type MessageCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Opaque handle identifying one registered callback.
///
/// Returned by subscribe and accepted by unsubscribe to remove exactly that
/// callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Entry {
    id: SubscriptionId,
    key: SubscriptionKey,
    callback: MessageCallback,
}

/// Ordered list of active subscriptions.
#[derive(Default)]
pub struct Subscriptions {
    entries: Vec<Entry>,
    next_id: u64,
}

impl fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriptions")
            .field("len", &self.entries.len())
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl Subscriptions {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a subscription and return its handle.
    pub fn add(&mut self, key: SubscriptionKey, callback: MessageCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry { id, key, callback });
        id
    }

    /// Remove entries for `key` (only `id` when given, else all of them).
    ///
    /// Returns how many entries for `key` remain afterwards.
    pub fn remove(&mut self, key: &SubscriptionKey, id: Option<SubscriptionId>) -> usize {
        self.entries
            .retain(|entry| !(entry.key == *key && id.is_none_or(|id| entry.id == id)));
        self.count(key)
    }

    /// Number of entries registered for `key`.
    pub fn count(&self, key: &SubscriptionKey) -> usize {
        self.entries.iter().filter(|entry| entry.key == *key).count()
    }

    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no subscriptions are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Deliver `message` to every matching callback.
    ///
    /// Messages whose source is `own_uuid` are discarded. A panicking callback
    /// is logged and skipped. Returns the number of callbacks that completed.
    pub fn dispatch(&self, own_uuid: &str, message: &PushedMessage) -> usize {
        if message.source_uuid == own_uuid {
            log::trace!("[Dispatch] Ignoring message from self (topic={})", message.topic);
            return 0;
        }

        let mut delivered = 0;
        for entry in &self.entries {
            if entry.key.matches(
                &message.destination_uuid,
                &message.destination_name,
                &message.topic,
            ) {
                let callback = &entry.callback;
                if panic::catch_unwind(AssertUnwindSafe(|| callback(&message.message))).is_err() {
                    log::error!(
                        "[Dispatch] Callback {} panicked on topic={}",
                        entry.id,
                        message.topic
                    );
                    continue;
                }
                delivered += 1;
            }
        }

        log::trace!(
            "[Dispatch] topic={} delivered to {} subscriber(s)",
            message.topic,
            delivered
        );
        delivered
    }
}
