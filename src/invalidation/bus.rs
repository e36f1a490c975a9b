//! InvalidationBus: turns push notifications into cache invalidations and
//! coalesced refreshes.
//!
//! Any number of invalidations arriving within `coalesce_window_ms` of the
//! first one produce a single refresh. After the push channel drops, the
//! next successful connection clears the whole cache and refreshes
//! immediately, since changes may have been missed in between.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::key::{item_key, LISTING_PREFIX};
use crate::cache::store::CacheStore;
use crate::config::InvalidationConfig;
use crate::fetch::fetcher::CursorFetcher;
use crate::invalidation::messages::{
    CacheDirective, InvalidationNotice, ItemChange, NoticeCause, PushMessage,
};
use crate::invalidation::subscription::{Listeners, Subscription};
use crate::invalidation::transport::{PushError, PushTransport};

/// Whatever must reload after cached data was invalidated.
#[async_trait]
pub trait RefreshTarget: Send + Sync {
    async fn refresh_after_invalidation(&self);
}

/// Outcome of an administrative invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminInvalidation {
    pub pattern: String,
    pub local_removed: usize,
    /// `None` when the source could not be reached.
    pub remote_removed: Option<u64>,
}

pub struct InvalidationBus {
    cache: Arc<CacheStore>,
    config: InvalidationConfig,
    listeners: Listeners<InvalidationNotice>,
    target: Mutex<Option<Arc<dyn RefreshTarget>>>,
    refresh_pending: Arc<AtomicBool>,
    refreshes: Arc<AtomicU64>,
    connected: AtomicBool,
}

impl InvalidationBus {
    pub fn new(cache: Arc<CacheStore>, config: InvalidationConfig) -> Self {
        Self {
            cache,
            config,
            listeners: Listeners::new(),
            target: Mutex::new(None),
            refresh_pending: Arc::new(AtomicBool::new(false)),
            refreshes: Arc::new(AtomicU64::new(0)),
            connected: AtomicBool::new(false),
        }
    }

    /// Set the component refreshed after invalidations.
    pub fn bind_refresh(&self, target: Arc<dyn RefreshTarget>) {
        *self.target.lock() = Some(target);
    }

    /// Register a listener for invalidation notices.
    pub fn on_invalidation<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&InvalidationNotice) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Apply one push message. Returns the number of cache entries removed.
    pub fn handle(&self, message: PushMessage) -> usize {
        let removed = match message {
            PushMessage::ItemChanged(change) => self.apply_item_change(change),
            PushMessage::CacheDirective(directive) => self.apply_directive(directive),
        };
        self.schedule_refresh();
        removed
    }

    fn apply_item_change(&self, change: ItemChange) -> usize {
        let mut removed = self
            .cache
            .invalidate_pattern(&format!("*{}*", item_key(&change.item_id)));
        removed += self
            .cache
            .invalidate_pattern(&format!("{LISTING_PREFIX}:*"));

        if let Some((old, new)) = change.group_move() {
            for group in [old, new].into_iter().flatten() {
                removed += self
                    .cache
                    .invalidate_pattern(&format!("{LISTING_PREFIX}:*group:{group}*"));
            }
        }

        debug!(item_id = change.item_id, action = ?change.action, removed, "Item change applied");
        self.notify(
            NoticeCause::ItemChanged {
                item_id: change.item_id,
                action: change.action,
            },
            removed,
        );
        removed
    }

    fn apply_directive(&self, directive: CacheDirective) -> usize {
        let mut removed = 0;
        for key in &directive.keys {
            if self.cache.invalidate(key) {
                removed += 1;
            }
        }
        for pattern in &directive.patterns {
            removed += self.cache.invalidate_pattern(pattern);
        }

        debug!(reason = ?directive.reason, removed, "Cache directive applied");
        self.notify(
            NoticeCause::Directive {
                reason: directive.reason,
            },
            removed,
        );
        removed
    }

    fn notify(&self, cause: NoticeCause, removed: usize) {
        self.listeners.emit(&InvalidationNotice::new(cause, removed));
    }

    /// Refresh once the coalescing window opened by the first pending event closes.
    pub fn schedule_refresh(&self) {
        if self.refresh_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(target) = self.target.lock().clone() else {
            self.refresh_pending.store(false, Ordering::SeqCst);
            return;
        };

        let pending = self.refresh_pending.clone();
        let refreshes = self.refreshes.clone();
        let window = self.config.coalesce_window();
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            pending.store(false, Ordering::SeqCst);
            refreshes.fetch_add(1, Ordering::Relaxed);
            debug!("Running coalesced refresh");
            target.refresh_after_invalidation().await;
        });
    }

    /// Refresh now, outside the coalescing window.
    pub async fn force_refresh(&self) {
        let target = self.target.lock().clone();
        if let Some(target) = target {
            self.refreshes.fetch_add(1, Ordering::Relaxed);
            target.refresh_after_invalidation().await;
        }
    }

    /// Invalidate `pattern` on the source's cache, then locally, then refresh.
    pub async fn admin_invalidate(&self, pattern: &str, fetcher: &CursorFetcher) -> AdminInvalidation {
        let remote_removed = match fetcher.invalidate_remote(pattern).await {
            Ok(count) => Some(count),
            Err(err) => {
                warn!(pattern, error = %err, "Remote invalidation failed");
                None
            }
        };

        let local_removed = self.cache.invalidate_pattern(pattern);
        info!(pattern, local_removed, ?remote_removed, "Administrative invalidation");
        self.notify(
            NoticeCause::Administrative {
                pattern: pattern.to_string(),
            },
            local_removed,
        );
        self.schedule_refresh();

        AdminInvalidation {
            pattern: pattern.to_string(),
            local_removed,
            remote_removed,
        }
    }

    /// Drop everything and reload: the cache may have missed changes.
    pub async fn resync(&self) {
        let removed = self.cache.clear();
        info!(removed, "Resynchronising after push channel reconnect");
        self.notify(NoticeCause::Resync, removed);
        self.force_refresh().await;
    }

    /// Run the push loop on `transport` until the task is aborted.
    pub fn spawn(self: &Arc<Self>, transport: Arc<dyn PushTransport>) -> JoinHandle<()> {
        let bus = Arc::clone(self);
        tokio::spawn(async move { bus.run(transport).await })
    }

    async fn run(&self, transport: Arc<dyn PushTransport>) {
        let reconnect = self.config.reconnect.clone();
        let mut backoff = reconnect.initial_ms;
        let mut needs_resync = false;

        loop {
            match transport.connect().await {
                Ok(mut stream) => {
                    self.connected.store(true, Ordering::SeqCst);
                    backoff = reconnect.initial_ms;
                    info!("Push channel connected");
                    if needs_resync {
                        self.resync().await;
                    }

                    while let Some(frame) = stream.next().await {
                        match frame {
                            Ok(message) => {
                                self.handle(message);
                            }
                            Err(PushError::Decode(err)) => {
                                warn!(error = %err, "Ignoring undecodable push message");
                            }
                            Err(err) => {
                                warn!(error = %err, "Push channel error");
                                break;
                            }
                        }
                    }

                    self.connected.store(false, Ordering::SeqCst);
                    warn!("Push channel disconnected");
                }
                Err(err) => {
                    warn!(error = %err, backoff_ms = backoff, "Push channel connect failed");
                }
            }

            needs_resync = true;
            let delay = jittered_backoff(backoff, reconnect.jitter_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;

            let next = (backoff as f64 * reconnect.multiplier) as u64;
            backoff = next.min(reconnect.max_ms);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Refreshes triggered so far.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }
}

fn jittered_backoff(base_ms: u64, jitter_ms: u64) -> u64 {
    if jitter_ms == 0 {
        return base_ms;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_nanos(0))
        .subsec_nanos() as u64;
    base_ms.saturating_add(nanos % jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    #[test]
    fn test_jitter_bounded() {
        assert_eq!(jittered_backoff(500, 0), 500);
        let delay = jittered_backoff(500, 250);
        assert!((500..750).contains(&delay));
    }

    #[tokio::test(start_paused = true)]
    async fn test_directive_without_target_only_invalidates() {
        let cache = Arc::new(CacheStore::new(CacheConfig::default()));
        cache.set("item:1", 1u8, Default::default());
        cache.set("cursor:at:start", 1u8, Default::default());

        let bus = InvalidationBus::new(cache.clone(), InvalidationConfig::default());
        let removed = bus.handle(PushMessage::CacheDirective(CacheDirective {
            keys: vec!["item:1".into(), "item:missing".into()],
            patterns: vec!["cursor:*".into()],
            reason: None,
        }));

        assert_eq!(removed, 2);
        assert!(cache.is_empty());
        assert_eq!(bus.refresh_count(), 0);
    }
}
