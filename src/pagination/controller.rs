//! PaginationController: owns one pagination session.
//!
//! Consumers call [`load_initial`](PaginationController::load_initial),
//! [`load_more`](PaginationController::load_more),
//! [`set_filters`](PaginationController::set_filters) and
//! [`refresh`](PaginationController::refresh); the controller checks the
//! prefetch buffer and the cache before going to the network, merges pages
//! without duplicates and keeps the prefetch frontier in step.
//!
//! Initial loads are superseded by newer ones through a generation counter.
//! `load_more` always runs to completion; its result is dropped if the
//! session was reset meanwhile.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::key::page_key;
use crate::cache::prefetcher::{PrefetchManager, ScrollPosition};
use crate::cache::store::{CacheStore, SetOptions};
use crate::config::PaginationConfig;
use crate::error::{PagingError, ProtocolError, Result};
use crate::fetch::fetcher::CursorFetcher;
use crate::fetch::types::{Cursor, MediaItem, PageQuery, PageResult, Scope, SortOrder};
use crate::invalidation::bus::RefreshTarget;
use crate::pagination::filters::{validate_limit, validate_sort_field, FilterSet};
use crate::pagination::merge::merge_unique;
use crate::pagination::state::{FeedSnapshot, LoadOutcome, Phase, ScrollState, SkipReason};

/// Cache category of pages fetched on demand.
pub const PAGES_CATEGORY: &str = "pages";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheMode {
    /// Prefetch buffer, then cache, then network.
    Use,
    /// Network only. The result is still written to the cache.
    Bypass,
}

struct Session {
    phase: Phase,
    scroll: ScrollState,
    items: Vec<MediaItem>,
    seen: HashSet<String>,
    filters: FilterSet,
    sort_by: Option<String>,
    sort_order: SortOrder,
    limit: usize,
    needs_full_refresh: bool,
}

impl Session {
    /// Forget position and items; keep filters and sorting.
    fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.reset_scroll();
        self.items.clear();
        self.seen.clear();
        self.needs_full_refresh = false;
    }

    /// Fresh scroll state. A running `load_more` keeps its flag until it returns.
    fn reset_scroll(&mut self) {
        let loading_more = self.scroll.loading_more;
        self.scroll = ScrollState::fresh();
        self.scroll.loading_more = loading_more;
    }
}

pub struct PaginationController {
    fetcher: CursorFetcher,
    cache: Arc<CacheStore>,
    prefetch: Arc<PrefetchManager>,
    config: PaginationConfig,
    scope: Option<Scope>,
    session: Mutex<Session>,
    generation: AtomicU64,
}

impl PaginationController {
    pub fn new(
        fetcher: CursorFetcher,
        cache: Arc<CacheStore>,
        prefetch: Arc<PrefetchManager>,
        config: PaginationConfig,
        scope: Option<Scope>,
    ) -> Self {
        let session = Session {
            phase: Phase::Idle,
            scroll: ScrollState::fresh(),
            items: Vec::new(),
            seen: HashSet::new(),
            filters: FilterSet::from(config.initial_filters.clone()),
            sort_by: config.default_sort_by.clone(),
            sort_order: config.default_sort_order,
            limit: config.page_size,
            needs_full_refresh: false,
        };

        let controller = Self {
            fetcher,
            cache,
            prefetch,
            config,
            scope,
            session: Mutex::new(session),
            generation: AtomicU64::new(0),
        };
        let query = controller.base_query(&controller.session.lock());
        controller.prefetch.reset(query);
        controller
    }

    fn base_query(&self, session: &Session) -> PageQuery {
        let order = session.sort_by.as_ref().map(|_| session.sort_order);
        PageQuery::first(session.filters.clone(), session.limit)
            .sorted(session.sort_by.clone(), order)
            .scoped(self.scope.clone())
    }

    /// Load the first page for `filters`, replacing the displayed list.
    ///
    /// Different filters than the active ones reset the session first.
    pub async fn load_initial(&self, filters: FilterSet) -> Result<LoadOutcome> {
        filters.validate()?;
        let changed = self.session.lock().filters != filters;
        if changed {
            self.reset_with(|session| session.filters = filters);
        }
        self.run_initial(CacheMode::Use).await
    }

    /// Replace the active filters and reload from the start.
    pub async fn set_filters(&self, filters: FilterSet) -> Result<LoadOutcome> {
        filters.validate()?;
        self.reset_with(|session| session.filters = filters);
        self.run_initial(CacheMode::Use).await
    }

    /// Merge `patch` into the active filters (empty values remove keys) and reload.
    pub async fn merge_filters(&self, patch: &FilterSet) -> Result<LoadOutcome> {
        let mut merged = self.session.lock().filters.clone();
        merged.merge(patch);
        self.set_filters(merged).await
    }

    /// Change the sort and reload from the start.
    pub async fn set_sort(&self, sort_by: Option<String>, order: SortOrder) -> Result<LoadOutcome> {
        if let Some(field) = &sort_by {
            validate_sort_field(field)?;
        }
        self.reset_with(|session| {
            session.sort_by = sort_by;
            session.sort_order = order;
        });
        self.run_initial(CacheMode::Use).await
    }

    /// Change the page size and reload from the start.
    pub async fn set_page_size(&self, limit: usize) -> Result<LoadOutcome> {
        validate_limit(limit, self.config.max_page_size)?;
        self.reset_with(|session| session.limit = limit);
        self.run_initial(CacheMode::Use).await
    }

    /// Re-run the initial load with the active filters, skipping the cache.
    ///
    /// The displayed list and its position stay until the new first page
    /// replaces them; after a failure `load_more` continues from the old cursor.
    pub async fn refresh(&self) -> Result<LoadOutcome> {
        let query = self.base_query(&self.session.lock());
        self.prefetch.reset(query);

        let result = self.run_initial(CacheMode::Bypass).await;
        if result.is_err() {
            let (cursor, has_more) = {
                let session = self.session.lock();
                (session.scroll.cursor.clone(), session.scroll.has_more)
            };
            self.prefetch.update_current_cursor(cursor, has_more);
        }
        result
    }

    fn reset_with(&self, apply: impl FnOnce(&mut Session)) {
        let query = {
            let mut session = self.session.lock();
            apply(&mut session);
            session.reset();
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.base_query(&session)
        };
        self.prefetch.reset(query);
    }

    async fn run_initial(&self, mode: CacheMode) -> Result<LoadOutcome> {
        let (generation, query) = {
            let mut session = self.session.lock();
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            session.phase = Phase::LoadingInitial;
            session.scroll.loading_initial = true;
            session.scroll.error = None;
            (generation, self.base_query(&session))
        };

        let result = self.fetch_guarded(&query, mode).await;

        let mut session = self.session.lock();
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "Discarding superseded initial load");
            return Ok(LoadOutcome::Superseded);
        }
        session.scroll.loading_initial = false;

        match result {
            Ok(page) => {
                let (stats, total) = {
                    let s = &mut *session;
                    s.items.clear();
                    s.seen.clear();
                    let stats = merge_unique(&mut s.items, &mut s.seen, page.items);
                    s.scroll.cursor = page.next_cursor.clone();
                    s.scroll.has_more = page.has_more;
                    s.scroll.initial_loaded = true;
                    s.phase = Phase::Ready;
                    s.needs_full_refresh = false;
                    (stats, s.items.len())
                };
                drop(session);

                self.prefetch
                    .update_current_cursor(page.next_cursor, page.has_more);
                info!(items = total, has_more = page.has_more, "Initial page loaded");
                Ok(LoadOutcome::Loaded {
                    added: stats.added,
                    duplicates: stats.duplicates,
                })
            }
            Err(err) => {
                Self::record_failure(&mut session, &err);
                warn!(error = %err, "Initial load failed");
                Err(err)
            }
        }
    }

    /// Append the next page. Returns immediately when a load is already
    /// running, the collection is exhausted, or there is no cursor.
    pub async fn load_more(&self) -> Result<LoadOutcome> {
        if self.session.lock().needs_full_refresh {
            info!("Previous protocol error, performing full refresh");
            return self.refresh().await;
        }

        let (generation, query) = {
            let mut session = self.session.lock();
            if session.scroll.loading_more {
                return Ok(LoadOutcome::Skipped {
                    reason: SkipReason::AlreadyLoading,
                });
            }
            if session.scroll.loading_initial {
                return Ok(LoadOutcome::Skipped {
                    reason: SkipReason::InitialInFlight,
                });
            }
            if !session.scroll.has_more {
                return Ok(LoadOutcome::Skipped {
                    reason: SkipReason::Exhausted,
                });
            }
            let Some(cursor) = session.scroll.cursor.clone() else {
                return Ok(LoadOutcome::Skipped {
                    reason: SkipReason::NoCursor,
                });
            };
            session.scroll.loading_more = true;
            session.scroll.error = None;
            session.phase = Phase::LoadingMore;
            (
                self.generation.load(Ordering::SeqCst),
                self.base_query(&session).at(Some(cursor)),
            )
        };

        let mut result = self.fetch_guarded(&query, CacheMode::Use).await;
        let retry = match &result {
            Err(err) if err.is_transient() => {
                warn!(error = %err, "Load more failed, retrying once");
                true
            }
            _ => false,
        };
        if retry {
            result = self.fetch_guarded(&query, CacheMode::Use).await;
        }

        let mut session = self.session.lock();
        session.scroll.loading_more = false;
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("Discarding page for a reset session");
            return Ok(LoadOutcome::Superseded);
        }

        match result {
            Ok(page) => {
                let (stats, total) = {
                    let s = &mut *session;
                    let stats = merge_unique(&mut s.items, &mut s.seen, page.items);
                    s.scroll.cursor = page.next_cursor.clone();
                    s.scroll.has_more = page.has_more;
                    s.phase = Phase::Ready;
                    (stats, s.items.len())
                };
                drop(session);

                self.prefetch
                    .update_current_cursor(page.next_cursor, page.has_more);
                debug!(
                    added = stats.added,
                    duplicates = stats.duplicates,
                    total,
                    "Page appended"
                );
                Ok(LoadOutcome::Loaded {
                    added: stats.added,
                    duplicates: stats.duplicates,
                })
            }
            Err(err) => {
                Self::record_failure(&mut session, &err);
                warn!(error = %err, "Load more failed");
                Err(err)
            }
        }
    }

    fn record_failure(session: &mut Session, err: &PagingError) {
        session.phase = Phase::Error;
        session.scroll.error = Some(err.to_string());
        if err.requires_full_refresh() {
            session.needs_full_refresh = true;
        }
    }

    /// Fetch with the cursor-loop guard: a page whose next cursor is the
    /// requested cursor is dropped and fetched once more from the network.
    async fn fetch_guarded(&self, query: &PageQuery, mode: CacheMode) -> Result<PageResult> {
        let page = self.fetch_page(query, mode).await?;
        let Some(cursor) = looping_cursor(query, &page) else {
            return Ok(page);
        };

        let key = page_key(query);
        warn!(cursor = %cursor, "Cursor loop detected, refetching once");
        self.cache.invalidate(&key);

        let page = self.fetch_page(query, CacheMode::Bypass).await?;
        if looping_cursor(query, &page).is_some() {
            return Err(ProtocolError::CursorLoop { cursor }.into());
        }
        Ok(page)
    }

    async fn fetch_page(&self, query: &PageQuery, mode: CacheMode) -> Result<PageResult> {
        let key = page_key(query);

        if mode == CacheMode::Use {
            if let Some(page) = self.prefetch.claim(query).await {
                return Ok(page);
            }
            if let Some(page) = self.cache.get::<PageResult>(&key) {
                debug!(key, "Page served from cache");
                return Ok(page);
            }
        }

        let page = self.fetcher.fetch(query).await?;
        if looping_cursor(query, &page).is_none() {
            self.cache.set(
                key,
                page.clone(),
                SetOptions::new().category(PAGES_CATEGORY),
            );
        }
        Ok(page)
    }

    /// Forward a scroll signal to the prefetcher.
    pub fn report_scroll(&self, position: ScrollPosition) -> usize {
        self.prefetch.on_scroll(position)
    }

    pub fn items(&self) -> Vec<MediaItem> {
        self.session.lock().items.clone()
    }

    pub fn scroll_state(&self) -> ScrollState {
        self.session.lock().scroll.clone()
    }

    pub fn phase(&self) -> Phase {
        self.session.lock().phase
    }

    pub fn filters(&self) -> FilterSet {
        self.session.lock().filters.clone()
    }

    pub fn needs_full_refresh(&self) -> bool {
        self.session.lock().needs_full_refresh
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        let session = self.session.lock();
        FeedSnapshot {
            phase: session.phase,
            scroll: session.scroll.clone(),
            items: session.items.clone(),
            filters: session.filters.clone(),
            sort_by: session.sort_by.clone(),
            sort_order: session.sort_order,
            needs_full_refresh: session.needs_full_refresh,
        }
    }
}

/// The cursor a page loops on, if its next cursor repeats the requested one.
fn looping_cursor(query: &PageQuery, page: &PageResult) -> Option<Cursor> {
    match (&query.cursor, &page.next_cursor) {
        (Some(requested), Some(next)) if requested == next => Some(requested.clone()),
        _ => None,
    }
}

#[async_trait]
impl RefreshTarget for PaginationController {
    async fn refresh_after_invalidation(&self) {
        if let Err(err) = self.refresh().await {
            warn!(error = %err, "Refresh after invalidation failed");
        }
    }
}
