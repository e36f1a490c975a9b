//! Pagination session state.

use serde::Serialize;

use crate::fetch::types::{Cursor, MediaItem, SortOrder};
use crate::pagination::filters::FilterSet;

/// Controller phase.
///
/// `Idle → LoadingInitial → Ready ⇄ LoadingMore`, with `Error` reachable from
/// either loading phase and left again by the next successful load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    LoadingInitial,
    Ready,
    LoadingMore,
    Error,
}

/// Position of the consumer in the paginated collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScrollState {
    pub cursor: Option<Cursor>,
    pub has_more: bool,
    pub loading_initial: bool,
    pub loading_more: bool,
    pub initial_loaded: bool,
    pub error: Option<String>,
}

impl ScrollState {
    /// State of a session that has not loaded anything yet.
    pub fn fresh() -> Self {
        Self {
            cursor: None,
            has_more: true,
            loading_initial: false,
            loading_more: false,
            initial_loaded: false,
            error: None,
        }
    }
}

impl Default for ScrollState {
    fn default() -> Self {
        Self::fresh()
    }
}

/// Why `load_more` returned without fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyLoading,
    InitialInFlight,
    Exhausted,
    NoCursor,
}

/// Result of a load call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoadOutcome {
    /// A page was applied.
    Loaded { added: usize, duplicates: usize },
    /// Nothing was fetched.
    Skipped { reason: SkipReason },
    /// A newer load made this result stale; it was discarded.
    Superseded,
}

/// Everything a presentation layer needs to render the list.
#[derive(Debug, Clone, Serialize)]
pub struct FeedSnapshot {
    pub phase: Phase,
    pub scroll: ScrollState,
    pub items: Vec<MediaItem>,
    pub filters: FilterSet,
    pub sort_by: Option<String>,
    pub sort_order: SortOrder,
    pub needs_full_refresh: bool,
}
