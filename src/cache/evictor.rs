//! Eviction policy: decides which entries leave the store when it is full.
//!
//! Uses a scoring function combining:
//! - Age since insertion (old → evictable)
//! - Inverse access count (rarely read → evictable)

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tokio::time::Instant;

use crate::cache::entry::CacheEntry;

/// An eviction candidate with its computed priority score.
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub key: String,
    pub score: f64,
}

// Higher score = higher eviction priority (should be evicted first).
impl PartialEq for EvictionCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for EvictionCandidate {}

impl PartialOrd for EvictionCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Equal scores pop in key order so eviction is deterministic.
impl Ord for EvictionCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.key.cmp(&self.key))
    }
}

/// The eviction policy engine.
#[derive(Debug, Clone)]
pub struct Evictor {
    /// `K` in the score, in seconds.
    access_weight_secs: f64,
}

impl Evictor {
    pub fn new(access_weight_secs: f64) -> Self {
        Self { access_weight_secs }
    }

    /// Compute eviction priority for a single entry.
    ///
    /// ```text
    /// eviction_priority(entry) =
    ///     age_secs + K / (access_count + 1)
    /// ```
    pub fn compute_priority(&self, entry: &CacheEntry, now: Instant) -> f64 {
        let age_secs = entry.age(now).as_secs_f64();
        let access_component = self.access_weight_secs / (entry.access_count() as f64 + 1.0);
        age_secs + access_component
    }

    /// Select up to `count` entries to evict.
    ///
    /// Returns keys ordered by eviction priority (highest first).
    /// Keys in the protected set (e.g. the entry being inserted) are excluded.
    pub fn select_victims<'a>(
        &self,
        entries: impl Iterator<Item = (&'a String, &'a CacheEntry)>,
        count: usize,
        protected_keys: &[&str],
        now: Instant,
    ) -> Vec<EvictionCandidate> {
        let mut heap = BinaryHeap::new();

        for (key, entry) in entries {
            if protected_keys.contains(&key.as_str()) {
                continue;
            }

            let score = self.compute_priority(entry, now);
            heap.push(EvictionCandidate {
                key: key.clone(),
                score,
            });
        }

        let mut victims = Vec::with_capacity(count);
        for _ in 0..count {
            if let Some(candidate) = heap.pop() {
                victims.push(candidate);
            } else {
                break;
            }
        }

        victims
    }
}
