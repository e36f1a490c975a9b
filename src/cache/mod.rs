//! Page and item cache.
//!
//! This module contains the core cache data structures and algorithms:
//! - [`entry`]: CacheEntry and provenance tags
//! - [`store`]: the shared store (TTL, capacity, invalidation, sweep)
//! - [`evictor`]: Eviction policy (age + access-count scoring)
//! - [`key`]: canonical cache keys and glob patterns
//! - [`prefetcher`]: scroll-driven speculative page fetching
//! - [`stats`]: hit/miss counters and diagnostics snapshot

pub mod entry;
pub mod evictor;
pub mod key;
pub mod prefetcher;
pub mod stats;
pub mod store;

pub use entry::EntrySource;
pub use prefetcher::{PrefetchManager, ScrollPosition};
pub use store::{CacheStore, SetOptions};
