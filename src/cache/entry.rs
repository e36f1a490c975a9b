//! Cache entry types.
//!
//! An entry holds one type-erased value plus the metadata the store needs for
//! expiry, eviction scoring and diagnostics. Entries are never mutated in place
//! except for the access counter; every write replaces the entry wholesale.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Where a cached value came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
    /// Fetched on behalf of the consumer.
    #[default]
    Direct,
    /// Fetched speculatively ahead of the consumer.
    Prefetch,
    /// Written locally (cache directive, precomputed value).
    Local,
}

impl fmt::Display for EntrySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntrySource::Direct => write!(f, "direct"),
            EntrySource::Prefetch => write!(f, "prefetch"),
            EntrySource::Local => write!(f, "local"),
        }
    }
}

/// A single cached value.
pub struct CacheEntry {
    /// Type-erased payload.
    value: Arc<dyn Any + Send + Sync>,

    /// Name of the stored type, for diagnostics.
    pub type_name: &'static str,

    /// When the entry was written.
    pub inserted_at: Instant,

    /// Lifetime after which the entry must not be returned.
    pub ttl: Duration,

    /// Number of successful reads.
    access_count: AtomicU64,

    /// Approximate payload size in bytes.
    pub estimated_size: usize,

    /// Provenance.
    pub source: EntrySource,

    /// Lifetime category (e.g. "pages"), if any.
    pub category: Option<String>,
}

impl CacheEntry {
    pub fn new<T: Send + Sync + 'static>(
        value: T,
        ttl: Duration,
        estimated_size: usize,
        source: EntrySource,
        category: Option<String>,
    ) -> Self {
        Self {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
            inserted_at: Instant::now(),
            ttl,
            access_count: AtomicU64::new(0),
            estimated_size,
            source,
            category,
        }
    }

    /// Whether `now - inserted_at > ttl`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) > self.ttl
    }

    /// Time since insertion.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.inserted_at)
    }

    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// Record a read.
    pub fn touch(&self) {
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Borrow the payload as `T`, or `None` if it holds another type.
    pub fn value_as<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("type_name", &self.type_name)
            .field("inserted_at", &self.inserted_at)
            .field("ttl", &self.ttl)
            .field("access_count", &self.access_count())
            .field("estimated_size", &self.estimated_size)
            .field("source", &self.source)
            .field("category", &self.category)
            .finish()
    }
}

/// Approximate size of a value as its JSON encoding.
pub fn estimate_size<T: Serialize>(value: &T) -> usize {
    serde_json::to_vec(value)
        .map(|bytes| bytes.len())
        .unwrap_or(std::mem::size_of::<T>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast() {
        let entry = CacheEntry::new(
            vec![1u32, 2, 3],
            Duration::from_secs(1),
            12,
            EntrySource::Direct,
            None,
        );
        assert_eq!(entry.value_as::<Vec<u32>>(), Some(&vec![1, 2, 3]));
        assert!(entry.value_as::<String>().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_is_strictly_after_ttl() {
        let entry = CacheEntry::new(1u8, Duration::from_millis(100), 1, EntrySource::Local, None);
        let start = entry.inserted_at;
        assert!(!entry.is_expired(start + Duration::from_millis(100)));
        assert!(entry.is_expired(start + Duration::from_millis(101)));
    }

    #[test]
    fn test_touch_counts_reads() {
        let entry = CacheEntry::new("x", Duration::from_secs(1), 3, EntrySource::Prefetch, None);
        entry.touch();
        entry.touch();
        assert_eq!(entry.access_count(), 2);
    }

    #[test]
    fn test_estimate_size_uses_json_length() {
        assert_eq!(estimate_size(&"abc"), 5);
        assert_eq!(estimate_size(&vec![1, 2]), 5);
    }
}
