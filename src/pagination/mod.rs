//! Pagination session management.
//!
//! - [`controller`]: the consumer-facing `PaginationController`
//! - [`filters`]: active filter set and request validation
//! - [`merge`]: deduplicating page merge
//! - [`state`]: phase, scroll state and load outcomes

pub mod controller;
pub mod filters;
pub mod merge;
pub mod state;

pub use controller::PaginationController;
pub use filters::FilterSet;
pub use state::{LoadOutcome, Phase, ScrollState, SkipReason};
