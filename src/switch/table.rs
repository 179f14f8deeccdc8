use std::hash::Hash;

use rustc_hash::FxHashMap;

use crate::time::{Delta, Time};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Entry {
    pub metric: f64,
    pub stamp: Time,
}

/// Congestion observations that expire after a fixed timeout.
///
/// Reads never return an entry older than the timeout, whether or not it has been swept yet.
#[derive(Debug, Clone, derive_new::new)]
pub struct CongestionTable<K> {
    timeout: Delta,
    #[new(default)]
    entries: FxHashMap<K, Entry>,
}

impl<K: Copy + Eq + Hash> CongestionTable<K> {
    pub fn insert(&mut self, key: K, metric: f64, now: Time) {
        self.entries.insert(key, Entry { metric, stamp: now });
    }

    pub fn get(&self, key: K, now: Time) -> Option<f64> {
        self.entries
            .get(&key)
            .filter(|entry| self.is_fresh(entry, now))
            .map(|entry| entry.metric)
    }

    /// Physically removes expired entries, returning how many were dropped.
    pub fn evict_stale(&mut self, now: Time) -> usize {
        let before = self.entries.len();
        let timeout = self.timeout;
        self.entries
            .retain(|_, entry| now.saturating_since(entry.stamp) <= timeout);
        before - self.entries.len()
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_fresh(&self, entry: &Entry, now: Time) -> bool {
        now.saturating_since(entry.stamp) <= self.timeout
    }
}
