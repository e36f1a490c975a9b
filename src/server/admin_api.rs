//! HTTP API over one pagination session.
//!
//! - GET  /health
//! - GET  /v1/cache/stats
//! - POST /v1/cache/invalidate
//! - GET  /v1/items
//! - POST /v1/items/more
//! - POST /v1/items/refresh
//! - PUT  /v1/filters
//! - POST /v1/scroll
//! - GET  /v1/invalidations/stream
//! - GET  /metrics

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::prefetcher::{PrefetchManager, PrefetchStatsSnapshot, ScrollPosition};
use crate::cache::stats::StatsSnapshot;
use crate::cache::store::CacheStore;
use crate::error::PagingError;
use crate::fetch::fetcher::CursorFetcher;
use crate::invalidation::bus::{AdminInvalidation, InvalidationBus};
use crate::metrics::FeedMetrics;
use crate::pagination::controller::PaginationController;
use crate::pagination::filters::FilterSet;
use crate::pagination::state::{FeedSnapshot, LoadOutcome, ScrollState};
use crate::server::streaming::invalidation_sse_stream;

/// Application state shared across handlers.
pub struct AppState {
    pub controller: Arc<PaginationController>,
    pub cache: Arc<CacheStore>,
    pub prefetch: Arc<PrefetchManager>,
    pub bus: Arc<InvalidationBus>,
    pub fetcher: CursorFetcher,
    pub metrics: FeedMetrics,
    pub start_time: Instant,
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/v1/cache/stats", get(cache_stats))
        .route("/v1/cache/invalidate", post(invalidate))
        .route("/v1/items", get(items))
        .route("/v1/items/more", post(load_more))
        .route("/v1/items/refresh", post(refresh))
        .route("/v1/filters", put(set_filters))
        .route("/v1/scroll", post(scroll))
        .route("/v1/invalidations/stream", get(invalidation_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub push_connected: bool,
    pub cache_entries: usize,
}

#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    pub cache: StatsSnapshot,
    pub prefetch: PrefetchStatsSnapshot,
    pub invalidation_refreshes: u64,
}

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub pattern: String,
}

#[derive(Debug, Deserialize)]
pub struct FiltersRequest {
    pub filters: FilterSet,
    /// Merge into the active filters instead of replacing them.
    #[serde(default)]
    pub merge: bool,
}

/// Result of a load call plus the state it left behind.
#[derive(Debug, Serialize)]
pub struct LoadResponse {
    pub result: LoadOutcome,
    pub scroll: ScrollState,
    pub total_items: usize,
}

#[derive(Debug, Serialize)]
pub struct ScrollResponse {
    pub prefetch_requested: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Handler error: maps the error taxonomy onto HTTP status codes.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Upstream(String),
    Internal(String),
}

impl From<PagingError> for ApiError {
    fn from(err: PagingError) -> Self {
        match err {
            PagingError::FilterValidation(e) => ApiError::BadRequest(e.to_string()),
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}

impl AppState {
    fn load_response(&self, result: LoadOutcome) -> LoadResponse {
        let snapshot = self.controller.snapshot();
        LoadResponse {
            result,
            total_items: snapshot.items.len(),
            scroll: snapshot.scroll,
        }
    }
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        push_connected: state.bus.is_connected(),
        cache_entries: state.cache.len(),
    })
}

async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStatsResponse> {
    Json(CacheStatsResponse {
        cache: state.cache.stats(),
        prefetch: state.prefetch.stats(),
        invalidation_refreshes: state.bus.refresh_count(),
    })
}

async fn invalidate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InvalidateRequest>,
) -> Result<Json<AdminInvalidation>, ApiError> {
    if req.pattern.trim().is_empty() {
        return Err(ApiError::BadRequest("pattern must not be empty".to_string()));
    }
    let outcome = state.bus.admin_invalidate(&req.pattern, &state.fetcher).await;
    Ok(Json(outcome))
}

async fn items(State(state): State<Arc<AppState>>) -> Json<FeedSnapshot> {
    Json(state.controller.snapshot())
}

async fn load_more(State(state): State<Arc<AppState>>) -> Result<Json<LoadResponse>, ApiError> {
    let request_id = Uuid::new_v4().to_string();
    let result = state.controller.load_more().await.inspect_err(|e| {
        warn!(request_id, error = %e, "load more failed");
    })?;
    info!(request_id, ?result, "load more");
    Ok(Json(state.load_response(result)))
}

async fn refresh(State(state): State<Arc<AppState>>) -> Result<Json<LoadResponse>, ApiError> {
    let request_id = Uuid::new_v4().to_string();
    let result = state.controller.refresh().await?;
    info!(request_id, ?result, "refresh");
    Ok(Json(state.load_response(result)))
}

async fn set_filters(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FiltersRequest>,
) -> Result<Json<LoadResponse>, ApiError> {
    let request_id = Uuid::new_v4().to_string();
    info!(request_id, filters = req.filters.len(), merge = req.merge, "set filters");
    let result = if req.merge {
        state.controller.merge_filters(&req.filters).await?
    } else {
        state.controller.set_filters(req.filters).await?
    };
    Ok(Json(state.load_response(result)))
}

async fn scroll(
    State(state): State<Arc<AppState>>,
    Json(position): Json<ScrollPosition>,
) -> Json<ScrollResponse> {
    Json(ScrollResponse {
        prefetch_requested: state.controller.report_scroll(position),
    })
}

async fn invalidation_stream(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Sse::new(invalidation_sse_stream(&state.bus)).keep_alive(KeepAlive::default())
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    state.metrics.observe(
        &state.cache.stats(),
        &state.prefetch.stats(),
        state.bus.refresh_count(),
    );
    let body = state
        .metrics
        .render()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
