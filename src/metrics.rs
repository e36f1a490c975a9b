//! Prometheus metrics, mirrored from the cache, prefetch and bus counters
//! each time they are scraped.

use prometheus::{IntGauge, Registry, TextEncoder};

use crate::cache::prefetcher::PrefetchStatsSnapshot;
use crate::cache::stats::StatsSnapshot;

pub struct FeedMetrics {
    registry: Registry,
    cache_entries: IntGauge,
    cache_bytes: IntGauge,
    cache_hits: IntGauge,
    cache_misses: IntGauge,
    cache_evictions: IntGauge,
    cache_expirations: IntGauge,
    cache_invalidations: IntGauge,
    prefetch_issued: IntGauge,
    prefetch_adopted: IntGauge,
    prefetch_failed: IntGauge,
    invalidation_refreshes: IntGauge,
}

fn gauge(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntGauge> {
    let gauge = IntGauge::new(name, help)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

impl FeedMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("media_feed".to_string()), None)?;
        Ok(Self {
            cache_entries: gauge(&registry, "cache_entries", "Entries currently stored")?,
            cache_bytes: gauge(&registry, "cache_bytes", "Estimated bytes stored")?,
            cache_hits: gauge(&registry, "cache_hits_total", "Cache reads that hit")?,
            cache_misses: gauge(&registry, "cache_misses_total", "Cache reads that missed")?,
            cache_evictions: gauge(&registry, "cache_evictions_total", "Entries evicted for capacity")?,
            cache_expirations: gauge(&registry, "cache_expirations_total", "Entries dropped after their TTL")?,
            cache_invalidations: gauge(&registry, "cache_invalidations_total", "Entries removed by invalidation")?,
            prefetch_issued: gauge(&registry, "prefetch_issued_total", "Speculative page fetches started")?,
            prefetch_adopted: gauge(&registry, "prefetch_adopted_total", "Prefetched pages handed to the consumer")?,
            prefetch_failed: gauge(&registry, "prefetch_failed_total", "Speculative page fetches that failed")?,
            invalidation_refreshes: gauge(&registry, "invalidation_refreshes_total", "Refreshes triggered by invalidations")?,
            registry,
        })
    }

    /// Copy the latest counters into the gauges.
    pub fn observe(&self, cache: &StatsSnapshot, prefetch: &PrefetchStatsSnapshot, refreshes: u64) {
        self.cache_entries.set(cache.total_entries as i64);
        self.cache_bytes.set(cache.total_size_bytes as i64);
        self.cache_hits.set(cache.hit_count as i64);
        self.cache_misses.set(cache.miss_count as i64);
        self.cache_evictions.set(cache.evictions as i64);
        self.cache_expirations.set(cache.expirations as i64);
        self.cache_invalidations.set(cache.invalidations as i64);
        self.prefetch_issued.set(prefetch.issued as i64);
        self.prefetch_adopted.set(prefetch.adopted as i64);
        self.prefetch_failed.set(prefetch.failed as i64);
        self.invalidation_refreshes.set(refreshes as i64);
    }

    /// Text exposition format.
    pub fn render(&self) -> prometheus::Result<String> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}
