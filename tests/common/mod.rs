//! Shared fixtures: a scripted in-memory page source and a wired-up session.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use media_feed_cache::cache::prefetcher::PrefetchManager;
use media_feed_cache::cache::store::CacheStore;
use media_feed_cache::config::{CacheConfig, PaginationConfig, PrefetchConfig};
use media_feed_cache::error::PagingError;
use media_feed_cache::fetch::fetcher::{CursorFetcher, PageSource};
use media_feed_cache::fetch::types::{PageRequest, PageResponse, Scope};
use media_feed_cache::pagination::controller::PaginationController;

pub const START: &str = "start";

type Reply = Result<PageResponse, PagingError>;

/// Page source answering from a script keyed by request cursor (`start` for
/// the first page). With several replies queued for one cursor they are used
/// in order and the last one repeats.
#[derive(Default)]
pub struct ScriptedSource {
    script: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<HashMap<String, usize>>,
    requests: Mutex<Vec<PageRequest>>,
    total: AtomicUsize,
    delay: Mutex<Duration>,
    remote_removed: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        let source = Self::default();
        *source.delay.lock() = delay;
        Arc::new(source)
    }

    pub fn reply(&self, cursor: &str, reply: Reply) {
        self.script
            .lock()
            .entry(cursor.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn page(&self, cursor: &str, ids: &[String], next: Option<&str>, has_more: bool) {
        self.reply(cursor, Ok(page_response(ids, next, has_more)));
    }

    pub fn calls_for(&self, cursor: &str) -> usize {
        self.calls.lock().get(cursor).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().clone()
    }

    pub fn set_remote_removed(&self, count: usize) {
        self.remote_removed.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl PageSource for ScriptedSource {
    async fn read_page(
        &self,
        _scope: Option<&Scope>,
        request: &PageRequest,
    ) -> Result<PageResponse, PagingError> {
        let cursor = request
            .cursor
            .as_ref()
            .map(|c| c.as_str().to_string())
            .unwrap_or_else(|| START.to_string());

        self.total.fetch_add(1, Ordering::SeqCst);
        *self.calls.lock().entry(cursor.clone()).or_default() += 1;
        self.requests.lock().push(request.clone());

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.script.lock();
        let Some(queue) = script.get_mut(&cursor) else {
            return Err(PagingError::Network(format!("no page scripted for {cursor}")));
        };
        if queue.len() > 1 {
            queue
                .pop_front()
                .unwrap_or_else(|| Err(PagingError::Network("empty script".into())))
        } else {
            queue
                .front()
                .cloned()
                .unwrap_or_else(|| Err(PagingError::Network("empty script".into())))
        }
    }

    async fn invalidate_remote(&self, _pattern: &str) -> Result<u64, PagingError> {
        Ok(self.remote_removed.load(Ordering::SeqCst) as u64)
    }
}

/// `count` ids `<prefix>0`, `<prefix>1`, ...
pub fn ids(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{prefix}{i}")).collect()
}

pub fn page_response(ids: &[String], next: Option<&str>, has_more: bool) -> PageResponse {
    let data: Vec<_> = ids.iter().map(|id| json!({"id": id, "title": format!("Item {id}")})).collect();
    serde_json::from_value(json!({
        "success": true,
        "data": data,
        "pagination": {"next_cursor": next, "has_more": has_more},
        "performance": {"query_time_ms": 1.0}
    }))
    .expect("valid page response")
}

/// A fully wired session over a scripted source.
pub struct Harness {
    pub source: Arc<ScriptedSource>,
    pub cache: Arc<CacheStore>,
    pub fetcher: CursorFetcher,
    pub prefetch: Arc<PrefetchManager>,
    pub controller: Arc<PaginationController>,
}

pub fn no_prefetch() -> PrefetchConfig {
    PrefetchConfig {
        enabled: false,
        ..Default::default()
    }
}

pub fn harness(source: Arc<ScriptedSource>, prefetch: PrefetchConfig) -> Harness {
    harness_with(source, CacheConfig::default(), PaginationConfig::default(), prefetch)
}

pub fn harness_with(
    source: Arc<ScriptedSource>,
    cache_config: CacheConfig,
    pagination: PaginationConfig,
    prefetch: PrefetchConfig,
) -> Harness {
    let cache = Arc::new(CacheStore::new(cache_config));
    let fetcher = CursorFetcher::new(source.clone(), Duration::from_secs(5));
    let prefetch = Arc::new(PrefetchManager::new(fetcher.clone(), cache.clone(), prefetch));
    let controller = Arc::new(PaginationController::new(
        fetcher.clone(),
        cache.clone(),
        prefetch.clone(),
        pagination,
        None,
    ));
    Harness {
        source,
        cache,
        fetcher,
        prefetch,
        controller,
    }
}
