//! Bounded, time-windowed transcript cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::agent::ids::ConversationId;
use crate::agent::types::Message;
use crate::config::CacheConfig;

#[derive(Clone)]
struct CacheEntry {
    messages: Vec<Message>,
    last_updated: Instant,
    sequence: u64,
    invalidated: bool,
}

impl CacheEntry {
    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_updated)
    }

    fn is_fresh(&self, now: Instant, window: Duration) -> bool {
        !self.invalidated && self.age(now) < window
    }
}

/// Result of a cache lookup that also exposes stale data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheLookup {
    /// Entry within the freshness window.
    Fresh(Vec<Message>),
    /// Entry past the window or invalidated; usable as a fallback.
    Stale(Vec<Message>),
    /// No entry for this conversation.
    Miss,
}

/// Thread-safe transcript cache keyed by conversation.
///
/// Reads are lock-free through `DashMap`. Inserts are serialised so the
/// capacity bound holds even when several conversations finish together.
pub struct TranscriptCache {
    config: CacheConfig,
    entries: DashMap<ConversationId, CacheEntry>,
    insert_lock: Mutex<()>,
    sequence: AtomicU64,
}

impl TranscriptCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            insert_lock: Mutex::new(()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Get the transcript if it is still fresh.
    #[must_use]
    pub fn get(&self, conversation_id: &ConversationId) -> Option<Vec<Message>> {
        match self.lookup(conversation_id) {
            CacheLookup::Fresh(messages) => Some(messages),
            CacheLookup::Stale(_) | CacheLookup::Miss => None,
        }
    }

    /// Look up a transcript, reporting stale entries too.
    #[must_use]
    pub fn lookup(&self, conversation_id: &ConversationId) -> CacheLookup {
        let now = Instant::now();
        self.entries
            .get(conversation_id)
            .map_or(CacheLookup::Miss, |entry| {
                if entry.is_fresh(now, self.config.freshness_window) {
                    CacheLookup::Fresh(entry.messages.clone())
                } else {
                    CacheLookup::Stale(entry.messages.clone())
                }
            })
    }

    /// Store a transcript, evicting the least recently updated entries when full.
    pub fn put(&self, conversation_id: ConversationId, messages: Vec<Message>) {
        let _guard = self
            .insert_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if !self.entries.contains_key(&conversation_id) {
            self.enforce_capacity();
        }

        let entry = CacheEntry {
            messages,
            last_updated: Instant::now(),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            invalidated: false,
        };
        self.entries.insert(conversation_id, entry);
    }

    /// Mark a transcript as outdated.
    ///
    /// The messages stay available through [`TranscriptCache::lookup`] as a
    /// fallback until they are replaced, evicted or cleaned up.
    pub fn invalidate(&self, conversation_id: &ConversationId) {
        if let Some(mut entry) = self.entries.get_mut(conversation_id) {
            entry.invalidated = true;
        }
    }

    /// Drop a transcript entirely.
    pub fn remove(&self, conversation_id: &ConversationId) {
        self.entries.remove(conversation_id);
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of cached conversations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let window = self.config.freshness_window;
        let fresh = self
            .entries
            .iter()
            .filter(|entry| entry.is_fresh(now, window))
            .count();
        let entries = self.entries.len();
        CacheStats {
            entries,
            fresh,
            stale: entries.saturating_sub(fresh),
        }
    }

    /// Remove entries not updated within `max_stale_age`. Returns how many were removed.
    pub fn cleanup_stale(&self) -> usize {
        let now = Instant::now();
        let max_age = self.config.max_stale_age;
        let expired: Vec<ConversationId> = self
            .entries
            .iter()
            .filter(|entry| entry.age(now) >= max_age)
            .map(|entry| entry.key().clone())
            .collect();

        let removed = expired.len();
        for key in expired {
            self.entries.remove(&key);
        }
        if removed > 0 {
            debug!(removed, "Removed stale transcripts");
        }
        removed
    }

    /// Evict the oldest entries so that one more fits.
    fn enforce_capacity(&self) {
        let capacity = self.config.capacity;
        let count = self.entries.len();
        if count < capacity {
            return;
        }

        let mut by_age: Vec<(Instant, u64, ConversationId)> = self
            .entries
            .iter()
            .map(|entry| (entry.last_updated, entry.sequence, entry.key().clone()))
            .collect();
        by_age.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let to_remove = count - capacity + 1;
        for (_, _, key) in by_age.into_iter().take(to_remove) {
            debug!(conversation_id = %key, "Evicting transcript");
            self.entries.remove(&key);
        }
    }
}

/// Cache statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cached conversations.
    pub entries: usize,
    /// Entries within the freshness window.
    pub fresh: usize,
    /// Entries past the window or invalidated.
    pub stale: usize,
}
