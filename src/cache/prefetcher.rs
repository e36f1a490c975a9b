//! Prefetching: fetches pages ahead of the consumer based on scroll position
//! and stores them in the cache tagged as speculative.
//!
//! Strategies:
//! 1. Threshold: once the scrolled fraction passes `threshold`, fetch the next page
//! 2. Predictive: extrapolate scroll velocity and fetch several pages when the
//!    projected position reaches the end of loaded content
//!
//! The manager tracks a *frontier*: the cursor of the next page nobody has
//! fetched yet. Prefetched pages are chained from it sequentially, since every
//! cursor comes from the previous response.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::entry::EntrySource;
use crate::cache::key::page_key;
use crate::cache::store::{CacheStore, SetOptions};
use crate::config::PrefetchConfig;
use crate::error::{PagingError, ProtocolError};
use crate::fetch::fetcher::CursorFetcher;
use crate::fetch::types::{Cursor, PageQuery, PageResult};

/// Cache category of speculatively fetched pages.
pub const PREFETCH_CATEGORY: &str = "prefetch";

type InFlight = Shared<BoxFuture<'static, Result<PageResult, PagingError>>>;

/// Scroll position reported by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScrollPosition {
    /// Distance scrolled from the top.
    pub offset: f64,
    /// Height of the visible area.
    pub viewport: f64,
    /// Height of all loaded content.
    pub content: f64,
}

impl ScrollPosition {
    pub fn new(offset: f64, viewport: f64, content: f64) -> Self {
        Self {
            offset,
            viewport,
            content,
        }
    }

    /// Fraction of content seen so far (0.0 - 1.0).
    pub fn fraction(&self) -> f64 {
        if self.content <= 0.0 {
            return 0.0;
        }
        ((self.offset + self.viewport) / self.content).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Default)]
struct PrefetchStats {
    issued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    adopted: AtomicU64,
    discarded: AtomicU64,
}

/// Prefetch counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrefetchStatsSnapshot {
    pub issued: u64,
    pub completed: u64,
    pub failed: u64,
    pub adopted: u64,
    pub discarded: u64,
    pub buffered: usize,
    pub in_flight: usize,
}

#[derive(Default)]
struct PrefetchState {
    /// Query shape (filters, sort, scope, limit) of the active session.
    context: Option<PageQuery>,
    /// Next cursor to prefetch from. `None` while a chained fetch is pending
    /// or when the source has no more pages.
    frontier: Option<Cursor>,
    /// Request cursors of pages fetched or being fetched ahead of the consumer.
    buffered: VecDeque<Cursor>,
    in_flight: HashMap<String, InFlight>,
    /// When a scroll signal last started a prefetch.
    last_trigger: Option<Instant>,
    /// Latest signal held back by the debounce; a timer evaluates it when
    /// the interval ends.
    deferred: Option<ScrollPosition>,
    samples: VecDeque<(Instant, f64)>,
}

/// The prefetch manager.
pub struct PrefetchManager {
    fetcher: CursorFetcher,
    cache: Arc<CacheStore>,
    config: PrefetchConfig,
    /// Bumped on every reset; results of an older epoch are dropped.
    epoch: AtomicU64,
    state: Mutex<PrefetchState>,
    stats: PrefetchStats,
}

impl PrefetchManager {
    pub fn new(fetcher: CursorFetcher, cache: Arc<CacheStore>, config: PrefetchConfig) -> Self {
        Self {
            fetcher,
            cache,
            config,
            epoch: AtomicU64::new(0),
            state: Mutex::new(PrefetchState::default()),
            stats: PrefetchStats::default(),
        }
    }

    pub fn config(&self) -> &PrefetchConfig {
        &self.config
    }

    /// Start over for a new query shape. Pending speculative work is abandoned
    /// and previously prefetched pages are dropped.
    pub fn reset(&self, query: PageQuery) {
        {
            let mut state = self.state.lock();
            self.epoch.fetch_add(1, Ordering::SeqCst);
            *state = PrefetchState {
                context: Some(query.at(None)),
                ..PrefetchState::default()
            };
        }
        self.cache.invalidate_category(PREFETCH_CATEGORY);
    }

    /// Record the consumer's position: `cursor` is the next page it will ask for.
    pub fn update_current_cursor(&self, cursor: Option<Cursor>, has_more: bool) {
        let mut state = self.state.lock();

        let Some(cursor) = cursor.filter(|_| has_more) else {
            state.buffered.clear();
            state.frontier = None;
            return;
        };

        while let Some(front) = state.buffered.front() {
            if *front == cursor {
                return;
            }
            state.buffered.pop_front();
        }

        // Nothing buffered at the consumer's position: restart the chain there.
        state.frontier = Some(cursor);
    }

    /// Evaluate a scroll signal. Returns how many pages were requested: the
    /// first is registered at once, the rest are chained as cursors arrive and
    /// the chain stops early when the source runs out of pages.
    ///
    /// Signals arriving within `debounce_ms` of the last trigger are held
    /// back; the latest one is evaluated when the interval ends.
    pub fn on_scroll(self: &Arc<Self>, position: ScrollPosition) -> usize {
        if !self.config.enabled {
            return 0;
        }

        let now = Instant::now();
        {
            let mut state = self.state.lock();
            self.record_sample(&mut state, now, position.fraction());

            if let Some(last) = state.last_trigger {
                let due = last + self.config.debounce();
                if now < due {
                    if state.deferred.replace(position).is_none() {
                        self.spawn_trailing(due);
                    }
                    return 0;
                }
            }
            state.deferred = None;
        }

        self.evaluate(position)
    }

    fn evaluate(self: &Arc<Self>, position: ScrollPosition) -> usize {
        let fraction = position.fraction();
        let (projected, wanted) = {
            let state = self.state.lock();
            let projected = self.project(&state, fraction);
            if projected < self.config.threshold {
                return 0;
            }

            let room = self
                .config
                .max_prefetch_pages
                .saturating_sub(state.buffered.len());
            let wanted = if self.config.predictive && projected >= 1.0 {
                room
            } else {
                room.min(1)
            };
            (projected, wanted)
        };

        if wanted == 0 {
            return 0;
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let Some(first) = self.schedule_next(epoch) else {
            return 0;
        };
        self.state.lock().last_trigger = Some(Instant::now());

        debug!(fraction, projected, wanted, "Prefetch triggered");
        self.spawn_driver(first, epoch, wanted - 1);
        wanted
    }

    /// Evaluate the held-back signal once the debounce interval is over.
    fn spawn_trailing(self: &Arc<Self>, due: Instant) {
        let weak = Arc::downgrade(self);
        let epoch = self.epoch.load(Ordering::SeqCst);
        tokio::spawn(async move {
            tokio::time::sleep_until(due).await;
            let Some(manager) = weak.upgrade() else {
                return;
            };
            let deferred = {
                let mut state = manager.state.lock();
                if manager.epoch.load(Ordering::SeqCst) != epoch {
                    return;
                }
                state.deferred.take()
            };
            if let Some(position) = deferred {
                manager.evaluate(position);
            }
        });
    }

    fn record_sample(&self, state: &mut PrefetchState, now: Instant, fraction: f64) {
        state.samples.push_back((now, fraction));
        let window = std::time::Duration::from_millis(self.config.velocity_window_ms);
        while let Some((at, _)) = state.samples.front() {
            if now.duration_since(*at) > window {
                state.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Scrolled fraction, projected forward when predictive mode is on.
    fn project(&self, state: &PrefetchState, fraction: f64) -> f64 {
        if !self.config.predictive {
            return fraction;
        }
        let horizon_secs = self.config.predictive_horizon_ms as f64 / 1000.0;
        fraction + velocity(&state.samples) * horizon_secs
    }

    /// Register the fetch of the frontier page, if there is room and a frontier.
    fn schedule_next(self: &Arc<Self>, epoch: u64) -> Option<InFlight> {
        let mut state = self.state.lock();
        if self.epoch.load(Ordering::SeqCst) != epoch
            || state.buffered.len() >= self.config.max_prefetch_pages
        {
            return None;
        }

        let base = state.context.clone()?;
        let cursor = state.frontier.take()?;
        let query = base.at(Some(cursor.clone()));
        let key = page_key(&query);

        if state.in_flight.contains_key(&key) {
            return None;
        }

        let fetcher = self.fetcher.clone();
        let weak: Weak<Self> = Arc::downgrade(self);
        let fut_key = key.clone();
        let fetch = async move {
            let result = fetcher.fetch(&query).await;
            if let Some(manager) = weak.upgrade() {
                manager.complete(epoch, &query, &fut_key, &result);
            }
            result
        }
        .boxed()
        .shared();

        state.in_flight.insert(key.clone(), fetch.clone());
        state.buffered.push_back(cursor);
        self.stats.issued.fetch_add(1, Ordering::Relaxed);
        debug!(key, "Prefetch issued");
        Some(fetch)
    }

    /// Drive a chain of prefetches: each next cursor comes from the previous page.
    fn spawn_driver(self: &Arc<Self>, first: InFlight, epoch: u64, mut remaining: usize) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut next = Some(first);
            while let Some(fetch) = next.take() {
                if fetch.await.is_err() || remaining == 0 {
                    break;
                }
                remaining -= 1;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                next = manager.schedule_next(epoch);
            }
        });
    }

    fn complete(
        &self,
        epoch: u64,
        query: &PageQuery,
        key: &str,
        result: &Result<PageResult, PagingError>,
    ) {
        let mut state = self.state.lock();
        state.in_flight.remove(key);

        if self.epoch.load(Ordering::SeqCst) != epoch {
            self.stats.discarded.fetch_add(1, Ordering::Relaxed);
            debug!(key, "Discarding prefetch from a previous session");
            return;
        }

        let outcome = match result {
            Ok(page) if page.next_cursor.is_some() && page.next_cursor == query.cursor => {
                Err(PagingError::from(ProtocolError::CursorLoop {
                    cursor: query.cursor.clone().unwrap_or_else(|| Cursor::new("")),
                }))
            }
            Ok(page) => Ok(page),
            Err(err) => Err(err.clone()),
        };

        match outcome {
            Ok(page) => {
                self.cache.set(
                    key,
                    page.clone(),
                    SetOptions::new()
                        .category(PREFETCH_CATEGORY)
                        .source(EntrySource::Prefetch),
                );
                state.frontier = page.next_cursor.clone().filter(|_| page.has_more);
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(key, error = %err, "Prefetch failed");
                if let Some(cursor) = &query.cursor {
                    state.buffered.retain(|c| c != cursor);
                    // Allow a later scroll to retry from the same place.
                    if state.frontier.is_none() && !err.requires_full_refresh() {
                        state.frontier = Some(cursor.clone());
                    }
                }
            }
        }
    }

    /// Hand the page for `query` to the consumer if it was prefetched or is
    /// being prefetched. A prefetched page is handed out at most once.
    pub async fn claim(&self, query: &PageQuery) -> Option<PageResult> {
        let key = page_key(query);

        if self.cache.source_of(&key) == Some(EntrySource::Prefetch) {
            if let Some(page) = self.cache.take::<PageResult>(&key) {
                self.stats.adopted.fetch_add(1, Ordering::Relaxed);
                debug!(key, "Adopted prefetched page");
                return Some(page);
            }
        }

        let pending = self.state.lock().in_flight.remove(&key)?;
        debug!(key, "Awaiting in-flight prefetch");
        match pending.await {
            Ok(page) => {
                if self.cache.source_of(&key) == Some(EntrySource::Prefetch) {
                    self.cache.invalidate(&key);
                }
                self.stats.adopted.fetch_add(1, Ordering::Relaxed);
                Some(page)
            }
            Err(_) => None,
        }
    }

    /// Whether a fetch for `query` is currently pending.
    pub fn is_in_flight(&self, query: &PageQuery) -> bool {
        self.state.lock().in_flight.contains_key(&page_key(query))
    }

    pub fn stats(&self) -> PrefetchStatsSnapshot {
        let state = self.state.lock();
        PrefetchStatsSnapshot {
            issued: self.stats.issued.load(Ordering::Relaxed),
            completed: self.stats.completed.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            adopted: self.stats.adopted.load(Ordering::Relaxed),
            discarded: self.stats.discarded.load(Ordering::Relaxed),
            buffered: state.buffered.len(),
            in_flight: state.in_flight.len(),
        }
    }
}

/// Scroll velocity in fractions per second over the sample window.
fn velocity(samples: &VecDeque<(Instant, f64)>) -> f64 {
    let (Some((t0, f0)), Some((t1, f1))) = (samples.front(), samples.back()) else {
        return 0.0;
    };
    let dt = t1.duration_since(*t0).as_secs_f64();
    if dt <= 0.0 {
        return 0.0;
    }
    ((f1 - f0) / dt).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fraction_clamped() {
        assert_eq!(ScrollPosition::new(0.0, 100.0, 0.0).fraction(), 0.0);
        assert_eq!(ScrollPosition::new(700.0, 300.0, 2000.0).fraction(), 0.5);
        assert_eq!(ScrollPosition::new(5000.0, 300.0, 2000.0).fraction(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_velocity_ignores_upward_scroll() {
        let start = Instant::now();
        let mut samples = VecDeque::new();
        samples.push_back((start, 0.2));
        samples.push_back((start + Duration::from_millis(500), 0.4));
        assert!((velocity(&samples) - 0.4).abs() < 1e-9);

        samples.push_back((start + Duration::from_millis(1000), 0.1));
        assert_eq!(velocity(&samples), 0.0);
    }
}
