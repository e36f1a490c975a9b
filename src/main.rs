//! media-feed-cache server binary.
//!
//! Wires the cache store, source, prefetcher, pagination session and
//! invalidation bus together and serves them over HTTP.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use media_feed_cache::cache::prefetcher::PrefetchManager;
use media_feed_cache::cache::store::CacheStore;
use media_feed_cache::config::{Cli, Config};
use media_feed_cache::fetch::fetcher::CursorFetcher;
use media_feed_cache::fetch::http_source::HttpPageSource;
use media_feed_cache::invalidation::bus::InvalidationBus;
use media_feed_cache::invalidation::transport::WebSocketTransport;
use media_feed_cache::metrics::FeedMetrics;
use media_feed_cache::pagination::controller::PaginationController;
use media_feed_cache::pagination::filters::FilterSet;
use media_feed_cache::server::admin_api::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "media_feed_cache=debug,tower_http=debug"
    } else {
        "media_feed_cache=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("media-feed-cache v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    config.apply_cli(&cli);

    info!(
        source = config.source.base_url,
        max_entries = config.cache.max_entries,
        page_size = config.pagination.page_size,
        prefetch = config.prefetch.enabled,
        "Configuration loaded"
    );

    // Cache store with its background sweep.
    let cache = Arc::new(CacheStore::new(config.cache.clone()));
    cache.start_sweeper();

    // Source and fetcher.
    let source = HttpPageSource::new(config.source.base_url.clone(), config.source.timeout())?;
    let fetcher = CursorFetcher::new(Arc::new(source), config.source.timeout());

    // Prefetcher and pagination session.
    let prefetch = Arc::new(PrefetchManager::new(
        fetcher.clone(),
        cache.clone(),
        config.prefetch.clone(),
    ));
    let controller = Arc::new(PaginationController::new(
        fetcher.clone(),
        cache.clone(),
        prefetch.clone(),
        config.pagination.clone(),
        config.source.scope.clone(),
    ));

    // Invalidation bus refreshing the session.
    let bus = Arc::new(InvalidationBus::new(cache.clone(), config.invalidation.clone()));
    bus.bind_refresh(controller.clone());

    let push_task = config.invalidation.push_url.as_ref().map(|url| {
        info!(url, "Starting push channel");
        bus.spawn(Arc::new(WebSocketTransport::new(url.clone())))
    });
    if push_task.is_none() {
        warn!("No push_url configured, cache relies on TTLs only");
    }

    // First page. A failure here is reported in the session state.
    let initial_filters = FilterSet::from(config.pagination.initial_filters.clone());
    if let Err(e) = controller.load_initial(initial_filters).await {
        error!(error = %e, "Initial load failed");
    }

    // Build application state.
    let state = Arc::new(AppState {
        controller,
        cache: cache.clone(),
        prefetch,
        bus,
        fetcher,
        metrics: FeedMetrics::new()?,
        start_time: Instant::now(),
    });

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    let listen_addr = config.server.listen.clone();
    info!(addr = listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
        })
        .await?;

    if let Some(task) = push_task {
        task.abort();
    }
    cache.shutdown();
    info!("Stopped");

    Ok(())
}
