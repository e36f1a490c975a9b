//! End-to-end tests: the HTTP source against a local upstream, and the
//! admin API driven through the router.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{to_bytes, Body};
use axum::extract::{Path, Query, State};
use axum::http::{Request, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceExt;

use common::{harness, ids, no_prefetch, Harness, ScriptedSource, START};
use media_feed_cache::config::InvalidationConfig;
use media_feed_cache::error::{PagingError, ProtocolError};
use media_feed_cache::fetch::fetcher::CursorFetcher;
use media_feed_cache::fetch::http_source::HttpPageSource;
use media_feed_cache::fetch::types::{Cursor, PageQuery, Scope};
use media_feed_cache::invalidation::bus::InvalidationBus;
use media_feed_cache::metrics::FeedMetrics;
use media_feed_cache::pagination::filters::FilterSet;
use media_feed_cache::server::admin_api::{build_router, AppState};

// ─── Upstream record store ─────────────────────────────────────────────────

#[derive(Clone, Default)]
struct Upstream {
    seen: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

async fn list_items(
    State(upstream): State<Upstream>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    upstream.seen.lock().push(params.clone());
    match params.get("cursor").map(String::as_str) {
        None => Json(json!({
            "success": true,
            "data": [{"id": "a"}, {"media_id": 2, "name": "Two"}],
            "pagination": {"next_cursor": "c1", "has_more": true},
            "performance": {"query_time_ms": 3.5, "cache_hit": false}
        })),
        Some(_) => Json(json!({
            "success": true,
            "data": [{"id": "z"}],
            "pagination": {"next_cursor": null, "has_more": false}
        })),
    }
}

async fn group_items(Path(id): Path<String>) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": [{"id": "g-item", "folder_id": id}],
        "pagination": {"has_more": false}
    }))
}

async fn remote_invalidate(Json(body): Json<Value>) -> Json<Value> {
    let removed = if body["pattern"] == "cursor:*" { 3 } else { 0 };
    Json(json!({"removed": removed}))
}

async fn unavailable() -> StatusCode {
    StatusCode::SERVICE_UNAVAILABLE
}

async fn rejected() -> Json<Value> {
    Json(json!({"success": false, "error": "unknown filter"}))
}

async fn spawn_upstream() -> (String, Upstream) {
    let upstream = Upstream::default();
    let app = Router::new()
        .route("/api/items", get(list_items))
        .route("/api/groups/{id}/items", get(group_items))
        .route("/api/cache/invalidate", post(remote_invalidate))
        .route("/down/items", get(unavailable))
        .route("/reject/items", get(rejected))
        .with_state(upstream.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), upstream)
}

fn http_fetcher(base: &str) -> CursorFetcher {
    let timeout = Duration::from_secs(5);
    let source = HttpPageSource::new(base, timeout).unwrap();
    CursorFetcher::new(Arc::new(source), timeout)
}

#[tokio::test]
async fn test_http_source_pages_through() {
    let (base, upstream) = spawn_upstream().await;
    let fetcher = http_fetcher(&format!("{base}/api"));

    let query = PageQuery::first(FilterSet::new().with("platform", "x"), 2);
    let first = fetcher.fetch(&query).await.unwrap();
    let got: Vec<&str> = first.items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(got, vec!["a", "2"]);
    assert_eq!(first.items[1].title.as_deref(), Some("Two"));
    assert_eq!(first.next_cursor, Some(Cursor::new("c1")));
    assert_eq!(first.query_time_ms, Some(3.5));
    assert!(first.has_more);

    let second = fetcher.fetch(&query.at(first.next_cursor.clone())).await.unwrap();
    assert_eq!(second.items.len(), 1);
    assert!(!second.has_more);

    let seen = upstream.seen.lock();
    assert_eq!(seen[0].get("platform").map(String::as_str), Some("x"));
    assert_eq!(seen[0].get("limit").map(String::as_str), Some("2"));
    assert!(!seen[0].contains_key("cursor"));
    assert_eq!(seen[1].get("cursor").map(String::as_str), Some("c1"));
}

#[tokio::test]
async fn test_http_source_scoped_read() {
    let (base, _upstream) = spawn_upstream().await;
    let fetcher = http_fetcher(&format!("{base}/api"));

    let query = PageQuery::first(FilterSet::new(), 10).scoped(Some(Scope::group("g9")));
    let page = fetcher.fetch(&query).await.unwrap();
    assert_eq!(page.items[0].group_id.as_deref(), Some("g9"));
}

#[tokio::test]
async fn test_http_source_error_classes() {
    let (base, _upstream) = spawn_upstream().await;

    let down = http_fetcher(&format!("{base}/down"));
    let err = down
        .fetch(&PageQuery::first(FilterSet::new(), 10))
        .await
        .unwrap_err();
    assert!(err.is_transient());

    let reject = http_fetcher(&format!("{base}/reject"));
    let err = reject
        .fetch(&PageQuery::first(FilterSet::new(), 10))
        .await
        .unwrap_err();
    assert!(matches!(err, PagingError::Protocol(ProtocolError::Rejected(_))));
}

#[tokio::test]
async fn test_http_source_remote_invalidation() {
    let (base, _upstream) = spawn_upstream().await;
    let fetcher = http_fetcher(&format!("{base}/api"));

    assert_eq!(fetcher.invalidate_remote("cursor:*").await.unwrap(), 3);
    assert_eq!(fetcher.invalidate_remote("item:1").await.unwrap(), 0);
}

// ─── Admin API ─────────────────────────────────────────────────────────────

fn app(h: &Harness) -> Router {
    let bus = Arc::new(InvalidationBus::new(
        h.cache.clone(),
        InvalidationConfig::default(),
    ));
    bus.bind_refresh(h.controller.clone());
    build_router(Arc::new(AppState {
        controller: h.controller.clone(),
        cache: h.cache.clone(),
        prefetch: h.prefetch.clone(),
        bus,
        fetcher: h.fetcher.clone(),
        metrics: FeedMetrics::new().unwrap(),
        start_time: Instant::now(),
    }))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn get_req(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_req(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn loaded_harness() -> Harness {
    let source = ScriptedSource::new();
    source.page(START, &ids("a", 3), Some("c1"), true);
    source.page("c1", &ids("b", 3), None, false);
    let h = harness(source, no_prefetch());
    h.controller.load_initial(FilterSet::new()).await.unwrap();
    h
}

#[tokio::test]
async fn test_api_health_and_items() {
    let h = loaded_harness().await;
    let app = app(&h);

    let (status, body) = send(&app, get_req("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["push_connected"], false);
    assert_eq!(body["cache_entries"], 1);

    let (status, body) = send(&app, get_req("/v1/items")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "ready");
    assert_eq!(body["items"].as_array().unwrap().len(), 3);
    assert_eq!(body["scroll"]["cursor"], "c1");
}

#[tokio::test]
async fn test_api_load_more() {
    let h = loaded_harness().await;
    let app = app(&h);

    let (status, body) = send(&app, json_req("POST", "/v1/items/more", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], json!({"outcome": "loaded", "added": 3, "duplicates": 0}));
    assert_eq!(body["total_items"], 6);
    assert_eq!(body["scroll"]["has_more"], false);

    let (_, body) = send(&app, json_req("POST", "/v1/items/more", json!({}))).await;
    assert_eq!(body["result"], json!({"outcome": "skipped", "reason": "exhausted"}));
}

#[tokio::test]
async fn test_api_upstream_failure_is_bad_gateway() {
    let source = ScriptedSource::new();
    source.page(START, &ids("a", 3), Some("c1"), true);
    source.reply("c1", Err(PagingError::Network("connection refused".into())));
    let h = harness(source, no_prefetch());
    h.controller.load_initial(FilterSet::new()).await.unwrap();
    let app = app(&h);

    let (status, body) = send(&app, json_req("POST", "/v1/items/more", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn test_api_filters() {
    let h = loaded_harness().await;
    let app = app(&h);

    let (status, body) = send(
        &app,
        json_req("PUT", "/v1/filters", json!({"filters": {"limit": "5"}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("reserved"));
    assert_eq!(h.source.total_calls(), 1);

    let (status, body) = send(
        &app,
        json_req("PUT", "/v1/filters", json!({"filters": {"platform": "x"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_items"], 3);

    let (status, _) = send(
        &app,
        json_req(
            "PUT",
            "/v1/filters",
            json!({"filters": {"kind": "video"}, "merge": true}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let filters = h.controller.filters();
    assert_eq!(filters.get("platform"), Some("x"));
    assert_eq!(filters.get("kind"), Some("video"));
}

#[tokio::test]
async fn test_api_invalidate() {
    let h = loaded_harness().await;
    h.source.set_remote_removed(7);
    let app = app(&h);

    let (status, _) = send(
        &app,
        json_req("POST", "/v1/cache/invalidate", json!({"pattern": "  "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        json_req("POST", "/v1/cache/invalidate", json!({"pattern": "cursor:*"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pattern"], "cursor:*");
    assert_eq!(body["local_removed"], 1);
    assert_eq!(body["remote_removed"], 7);
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn test_api_stats_and_metrics() {
    let h = loaded_harness().await;
    h.controller.load_initial(FilterSet::new()).await.unwrap();
    let app = app(&h);

    let (status, body) = send(&app, get_req("/v1/cache/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cache"]["total_entries"], 1);
    assert_eq!(body["cache"]["hit_count"], 1);
    assert_eq!(body["prefetch"]["issued"], 0);
    assert_eq!(body["invalidation_refreshes"], 0);

    let response = app.clone().oneshot(get_req("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("media_feed_cache_entries 1"));
    assert!(text.contains("media_feed_cache_hits_total 1"));
}
