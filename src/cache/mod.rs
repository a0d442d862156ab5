//! Server-side result cache.
//!
//! The dispatcher never owns a cache; the host injects one as
//! `Arc<dyn Cache>` and shares it across requests. Entries expire at an
//! absolute instant and are never refreshed by reads.
//!
//! [`MemoryCache`] measures time with [`tokio::time::Instant`], so tests can
//! pause and advance the clock.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// How eagerly an entry may be dropped under memory pressure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum CachePriority {
    Low,
    #[default]
    Normal,
    High,
}

/// Expiration settings for one insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// The entry is gone at or after this instant.
    pub absolute_expiry: Instant,
    /// Reset the expiry on every read by this much. The dispatcher never sets it.
    pub sliding_expiry: Option<Duration>,
    pub priority: CachePriority,
}

impl CacheOptions {
    /// Absolute expiry `ttl` from now, no sliding, normal priority.
    pub fn expires_in(ttl: Duration) -> Self {
        Self {
            absolute_expiry: Instant::now() + ttl,
            sliding_expiry: None,
            priority: CachePriority::Normal,
        }
    }
}

/// A shared string cache with per-entry expiry.
///
/// Implementations must be safe to call from many requests at once; the
/// dispatcher applies no locking of its own around get-then-insert.
pub trait Cache: Send + Sync {
    /// Returns the live value under `key`, if any.
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`, replacing any previous entry.
    fn insert(&self, key: &str, value: String, options: CacheOptions);

    fn remove(&self, key: &str) -> Option<String>;
}

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
    sliding: Option<Duration>,
    priority: CachePriority,
}

/// How often inserts sweep out expired entries unless configured otherwise.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// In-process [`Cache`] backed by a concurrent hash map.
///
/// Expired entries are removed when read, and the first insert after each
/// sweep interval purges every expired entry. When `capacity` is set and
/// an insert would exceed it, expired entries are purged first and then the
/// lowest-priority, soonest-expiring entry is evicted.
#[derive(Debug)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    capacity: Option<usize>,
    sweep_interval: Duration,
    next_sweep: Mutex<Instant>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            capacity: None,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            next_sweep: Mutex::new(Instant::now() + DEFAULT_SWEEP_INTERVAL),
        }
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of live entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            ..Self::default()
        }
    }

    /// Sets how often inserts purge expired entries.
    #[must_use]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        *self.next_sweep.get_mut().unwrap_or_else(PoisonError::into_inner) =
            Instant::now() + interval;
        self
    }

    /// Number of stored entries, expired ones included until they are purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry whose expiry has passed.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    fn sweep_if_due(&self, now: Instant) {
        {
            let mut next = self.next_sweep.lock().unwrap_or_else(PoisonError::into_inner);
            if now < *next {
                return;
            }
            *next = now + self.sweep_interval;
        }
        let before = self.entries.len();
        self.purge_expired();
        tracing::debug!(removed = before.saturating_sub(self.entries.len()), "cache swept");
    }

    fn make_room(&self) {
        let Some(capacity) = self.capacity else {
            return;
        };
        if self.entries.len() < capacity {
            return;
        }
        self.purge_expired();
        while self.entries.len() >= capacity {
            let victim = self
                .entries
                .iter()
                .min_by_key(|e| (e.priority, e.expires_at))
                .map(|e| e.key().clone());
            match victim {
                Some(key) => {
                    tracing::debug!(%key, "evicting cache entry");
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.expires_at > now {
                if let Some(sliding) = entry.sliding {
                    entry.expires_at = now + sliding;
                }
                return Some(entry.value.clone());
            }
            drop(entry);
            self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        }
        None
    }

    fn insert(&self, key: &str, value: String, options: CacheOptions) {
        self.sweep_if_due(Instant::now());
        if !self.entries.contains_key(key) {
            self.make_room();
        }
        self.entries.insert(
            key.to_owned(),
            Entry {
                value,
                expires_at: options.absolute_expiry,
                sliding: options.sliding_expiry,
                priority: options.priority,
            },
        );
    }

    fn remove(&self, key: &str) -> Option<String> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }
}
