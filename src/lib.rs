//! media-feed-cache: pagination and cache coordination for media feeds.
//!
//! Serves a large, continuously changing collection of media records to a
//! scrolling consumer page by page, while keeping a local cache consistent
//! with server-side changes delivered over a push channel:
//!   consumer → PaginationController → (prefetch buffer / cache) → CursorFetcher → source
//!
//! Components are constructed explicitly and shared through `Arc`; there is no
//! global state.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod invalidation;
pub mod metrics;
pub mod pagination;
pub mod server;
