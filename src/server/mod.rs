//! HTTP server exposing the feed session and cache administration.
//!
//! - [`admin_api`]: routes, handlers and shared state
//! - [`streaming`]: SSE stream of invalidation notices

pub mod admin_api;
pub mod streaming;
