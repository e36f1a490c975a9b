//! Cache store: the single shared, TTL- and capacity-bounded store.
//!
//! The store is the central coordinator for cached pages and items. It:
//! - Holds every entry, whatever its provenance (direct, prefetch, local)
//! - Resolves entry lifetimes (explicit TTL > category default > global default)
//! - Evicts the highest-scoring entries when capacity is exceeded
//! - Sweeps expired entries periodically
//! - Notifies subscribers of explicit invalidations

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cache::entry::{estimate_size, CacheEntry, EntrySource};
use crate::cache::evictor::Evictor;
use crate::cache::key::glob_to_regex;
use crate::cache::stats::{AccessedKey, CacheStats, StatsSnapshot};
use crate::config::CacheConfig;
use crate::invalidation::messages::{InvalidationEvent, InvalidationKind};
use crate::invalidation::subscription::{Listeners, Subscription};

/// How many keys `stats()` lists as most accessed.
const MOST_ACCESSED_LIMIT: usize = 10;

/// A stored entry that could not be read back. Always handled as a miss.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("entry {key:?} holds {stored}, requested {requested}")]
    TypeMismatch {
        key: String,
        stored: &'static str,
        requested: &'static str,
    },
}

/// Per-write options.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    pub ttl: Option<Duration>,
    pub category: Option<String>,
    pub source: EntrySource,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn source(mut self, source: EntrySource) -> Self {
        self.source = source;
        self
    }
}

enum Lookup<T> {
    Hit(T),
    Absent,
    Expired(Instant),
    Unreadable(Instant, CacheError),
}

/// The cache store.
pub struct CacheStore {
    /// All entries indexed by key.
    entries: RwLock<HashMap<String, CacheEntry>>,

    /// Eviction policy.
    evictor: Evictor,

    /// Hit/miss/eviction counters.
    stats: CacheStats,

    /// Subscribers to explicit invalidations.
    listeners: Listeners<InvalidationEvent>,

    /// Background sweep task, if started.
    sweeper: Mutex<Option<JoinHandle<()>>>,

    /// Configuration.
    config: CacheConfig,
}

impl CacheStore {
    /// Create a new store with the given configuration.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            evictor: Evictor::new(config.access_weight_secs),
            stats: CacheStats::new(),
            listeners: Listeners::new(),
            sweeper: Mutex::new(None),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Read a live value. Expired or unreadable entries are removed and count as misses.
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &str) -> Option<T> {
        match self.lookup::<T>(key) {
            Lookup::Hit(value) => {
                self.stats.record_hit();
                Some(value)
            }
            Lookup::Absent => {
                self.stats.record_miss();
                None
            }
            Lookup::Expired(inserted_at) => {
                self.stats.record_miss();
                if self.remove_if_unchanged(key, inserted_at) {
                    self.stats.record_expirations(1);
                    debug!(key, "Expired entry dropped on read");
                }
                None
            }
            Lookup::Unreadable(inserted_at, err) => {
                self.stats.record_miss();
                self.stats.record_type_mismatch();
                warn!(error = %err, "Unreadable cache entry, treating as miss");
                self.remove_if_unchanged(key, inserted_at);
                None
            }
        }
    }

    fn lookup<T: Clone + 'static>(&self, key: &str) -> Lookup<T> {
        let now = Instant::now();
        let entries = self.entries.read();
        let Some(entry) = entries.get(key) else {
            return Lookup::Absent;
        };

        if entry.is_expired(now) {
            return Lookup::Expired(entry.inserted_at);
        }

        match entry.value_as::<T>() {
            Some(value) => {
                entry.touch();
                Lookup::Hit(value.clone())
            }
            None => Lookup::Unreadable(
                entry.inserted_at,
                CacheError::TypeMismatch {
                    key: key.to_string(),
                    stored: entry.type_name,
                    requested: std::any::type_name::<T>(),
                },
            ),
        }
    }

    /// Remove `key` only if it is still the entry written at `inserted_at`.
    fn remove_if_unchanged(&self, key: &str, inserted_at: Instant) -> bool {
        let mut entries = self.entries.write();
        if entries
            .get(key)
            .is_some_and(|entry| entry.inserted_at == inserted_at)
        {
            entries.remove(key);
            true
        } else {
            false
        }
    }

    /// Insert or replace an entry, evicting others if capacity is exceeded.
    pub fn set<T>(&self, key: impl Into<String>, data: T, options: SetOptions)
    where
        T: Serialize + Send + Sync + 'static,
    {
        let key = key.into();
        let ttl = self
            .config
            .resolve_ttl(options.ttl, options.category.as_deref());
        let size = estimate_size(&data);
        let entry = CacheEntry::new(data, ttl, size, options.source, options.category);

        let evicted = {
            let mut entries = self.entries.write();
            entries.insert(key.clone(), entry);
            self.evict_excess(&mut entries, &key)
        };

        debug!(key, size, ttl_ms = ttl.as_millis() as u64, source = %options.source, "Cache SET");

        if evicted > 0 {
            self.stats.record_evictions(evicted);
            info!(evicted, "Eviction round complete");
        }
    }

    /// Evict until the store is back within `max_entries`. The fresh entry is protected.
    fn evict_excess(&self, entries: &mut HashMap<String, CacheEntry>, fresh_key: &str) -> usize {
        let excess = entries.len().saturating_sub(self.config.max_entries);
        if excess == 0 {
            return 0;
        }

        let victims =
            self.evictor
                .select_victims(entries.iter(), excess, &[fresh_key], Instant::now());

        let mut evicted = 0;
        for victim in victims {
            if entries.remove(&victim.key).is_some() {
                evicted += 1;
                debug!(key = victim.key, score = victim.score, "Evicted entry");
            }
        }
        evicted
    }

    /// Remove and return a live value.
    pub fn take<T: Send + Sync + 'static>(&self, key: &str) -> Option<T>
    where
        T: Clone,
    {
        let removed = self.entries.write().remove(key)?;
        if removed.is_expired(Instant::now()) {
            self.stats.record_miss();
            self.stats.record_expirations(1);
            return None;
        }
        match removed.value_as::<T>() {
            Some(value) => {
                removed.touch();
                self.stats.record_hit();
                Some(value.clone())
            }
            None => {
                self.stats.record_miss();
                self.stats.record_type_mismatch();
                warn!(key, stored = removed.type_name, "Unreadable cache entry taken, treating as miss");
                None
            }
        }
    }

    /// Provenance of a live entry.
    pub fn source_of(&self, key: &str) -> Option<EntrySource> {
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.source)
    }

    /// Whether a live entry exists, without counting a read.
    pub fn contains(&self, key: &str) -> bool {
        self.source_of(key).is_some()
    }

    /// Remove one key.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.entries.write().remove(key).is_some();
        if removed {
            self.stats.record_invalidations(1);
            debug!(key, "Cache DELETE");
            self.listeners
                .emit(&InvalidationEvent::new(InvalidationKind::Specific, key, 1));
        }
        removed
    }

    /// Remove every key matching a `*` glob. Returns the number removed.
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let regex = match glob_to_regex(pattern) {
            Ok(regex) => regex,
            Err(err) => {
                warn!(pattern, error = %err, "Invalid invalidation pattern");
                return 0;
            }
        };

        let removed = {
            let mut entries = self.entries.write();
            let before = entries.len();
            entries.retain(|key, _| !regex.is_match(key));
            before - entries.len()
        };

        self.stats.record_invalidations(removed);
        debug!(pattern, removed, "Cache DELETE pattern");
        self.listeners.emit(&InvalidationEvent::new(
            InvalidationKind::Pattern,
            pattern,
            removed,
        ));
        removed
    }

    /// Remove every entry written under `category`.
    pub fn invalidate_category(&self, category: &str) -> usize {
        let removed = {
            let mut entries = self.entries.write();
            let before = entries.len();
            entries.retain(|_, entry| entry.category.as_deref() != Some(category));
            before - entries.len()
        };

        self.stats.record_invalidations(removed);
        debug!(category, removed, "Cache DELETE category");
        self.listeners.emit(&InvalidationEvent::new(
            InvalidationKind::Category,
            category,
            removed,
        ));
        removed
    }

    /// Remove everything.
    pub fn clear(&self) -> usize {
        let removed = {
            let mut entries = self.entries.write();
            let count = entries.len();
            entries.clear();
            count
        };

        self.stats.record_invalidations(removed);
        info!(removed, "Cache cleared");
        self.listeners
            .emit(&InvalidationEvent::new(InvalidationKind::Clear, "", removed));
        removed
    }

    /// Drop expired entries. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let removed = {
            let mut entries = self.entries.write();
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired(now));
            before - entries.len()
        };
        self.stats.record_expirations(removed);
        removed
    }

    /// Subscribe to explicit invalidations (pattern, specific, category, clear).
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&InvalidationEvent) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Number of stored entries, including not-yet-swept expired ones.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn counters(&self) -> &CacheStats {
        &self.stats
    }

    /// Diagnostics snapshot.
    pub fn stats(&self) -> StatsSnapshot {
        let entries = self.entries.read();
        let total_entries = entries.len();
        let total_size_bytes: usize = entries.values().map(|e| e.estimated_size).sum();
        let avg_size_bytes = if total_entries > 0 {
            total_size_bytes / total_entries
        } else {
            0
        };

        let mut most_accessed: Vec<AccessedKey> = entries
            .iter()
            .map(|(key, entry)| AccessedKey {
                key: key.clone(),
                access_count: entry.access_count(),
            })
            .collect();
        most_accessed.sort_by(|a, b| {
            b.access_count
                .cmp(&a.access_count)
                .then_with(|| a.key.cmp(&b.key))
        });
        most_accessed.truncate(MOST_ACCESSED_LIMIT);

        StatsSnapshot {
            total_entries,
            hit_count: self.stats.hits(),
            miss_count: self.stats.misses(),
            hit_rate: self.stats.hit_rate(),
            total_size_bytes,
            avg_size_bytes,
            most_accessed,
            evictions: self.stats.evictions(),
            expirations: self.stats.expirations(),
            invalidations: self.stats.invalidations(),
        }
    }

    /// Start the periodic sweep. The task holds only a weak reference and
    /// stops on [`CacheStore::shutdown`] or when the store is dropped.
    pub fn start_sweeper(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let interval = self.config.sweep_interval().max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(store) = weak.upgrade() else {
                    break;
                };
                let removed = store.sweep();
                if removed > 0 {
                    debug!(removed, "Swept expired entries");
                }
            }
        });

        if let Some(previous) = self.sweeper.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop the periodic sweep.
    pub fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
            info!("Cache sweeper stopped");
        }
    }
}

impl Drop for CacheStore {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.len())
            .field("max_entries", &self.config.max_entries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_config(max_entries: usize) -> CacheConfig {
        CacheConfig {
            max_entries,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_get_counts() {
        let store = CacheStore::new(test_config(10));
        store.set("a", 1u32, SetOptions::new());

        assert_eq!(store.get::<u32>("a"), Some(1));
        assert_eq!(store.get::<u32>("missing"), None);

        let stats = store.stats();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.most_accessed[0].key, "a");
        assert_eq!(stats.most_accessed[0].access_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_type_mismatch_is_a_miss() {
        let store = CacheStore::new(test_config(10));
        store.set("a", "text".to_string(), SetOptions::new());

        assert_eq!(store.get::<u32>("a"), None);
        assert!(!store.contains("a"));
        assert_eq!(store.counters().type_mismatches(), 1);
        assert_eq!(store.counters().misses(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_consumes_once() {
        let store = CacheStore::new(test_config(10));
        store.set(
            "p",
            vec![1u8, 2],
            SetOptions::new().source(EntrySource::Prefetch),
        );

        assert_eq!(store.source_of("p"), Some(EntrySource::Prefetch));
        assert_eq!(store.take::<Vec<u8>>("p"), Some(vec![1, 2]));
        assert_eq!(store.take::<Vec<u8>>("p"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_category_ttl_applied() {
        let mut config = test_config(10);
        config.category_ttls_ms.insert("short".into(), 100);
        let store = CacheStore::new(config);

        store.set("a", 1u8, SetOptions::new().category("short"));
        store.set(
            "b",
            1u8,
            SetOptions::new()
                .category("short")
                .ttl(Duration::from_secs(10)),
        );

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(store.get::<u8>("a"), None);
        assert_eq!(store.get::<u8>("b"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pattern_invalidation_emits_event() {
        let store = CacheStore::new(test_config(10));
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let _sub = store.subscribe(move |event| sink.lock().push(event.clone()));

        store.set("cursor:at:start", 1u8, SetOptions::new());
        store.set("cursor:at:c1", 1u8, SetOptions::new());
        store.set("item:1", 1u8, SetOptions::new());

        assert_eq!(store.invalidate_pattern("cursor:*"), 2);
        assert_eq!(store.len(), 1);

        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, InvalidationKind::Pattern);
        assert_eq!(events[0].target, "cursor:*");
        assert_eq!(events[0].removed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_category_and_clear() {
        let store = CacheStore::new(test_config(10));
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let _sub = store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.set("a", 1u8, SetOptions::new().category("pages"));
        store.set("b", 1u8, SetOptions::new().category("items"));
        store.set("c", 1u8, SetOptions::new().category("pages"));

        assert_eq!(store.invalidate_category("pages"), 2);
        assert_eq!(store.clear(), 1);
        assert!(store.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replacing_key_does_not_evict() {
        let store = CacheStore::new(test_config(2));
        store.set("a", 1u8, SetOptions::new());
        store.set("b", 1u8, SetOptions::new());
        store.set("a", 2u8, SetOptions::new());

        assert_eq!(store.len(), 2);
        assert_eq!(store.counters().evictions(), 0);
        assert_eq!(store.get::<u8>("a"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_write_only_keys() {
        let mut config = test_config(10);
        config.sweep_interval_ms = 1_000;
        let store = Arc::new(CacheStore::new(config));
        store.start_sweeper();

        store.set("w", 1u8, SetOptions::new().ttl(Duration::from_millis(500)));
        assert_eq!(store.len(), 1);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(store.len(), 0);
        assert_eq!(store.counters().expirations(), 1);

        store.shutdown();
    }
}
