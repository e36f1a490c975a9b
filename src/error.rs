//! Error taxonomy for the pagination and cache layer.
//!
//! - [`PagingError`]: surfaced by the fetcher and the pagination controller
//! - [`ProtocolError`]: the source answered, but not in a usable way
//! - [`FilterValidationError`]: rejected before any request is dispatched
//!
//! Cache read failures never appear here; see [`crate::cache::store::CacheError`].

use thiserror::Error;

use crate::fetch::types::Cursor;

/// Errors returned by fetch and pagination operations.
///
/// `Clone` so that one in-flight fetch can be adopted by several waiters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PagingError {
    /// Transport failure or timeout. Transient.
    #[error("network error: {0}")]
    Network(String),

    /// Malformed response or cursor loop. Fatal for the current operation.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Request parameters rejected locally.
    #[error("invalid request: {0}")]
    FilterValidation(#[from] FilterValidationError),
}

impl PagingError {
    /// Whether an automatic retry may help.
    pub fn is_transient(&self) -> bool {
        matches!(self, PagingError::Network(_))
    }

    /// Whether this error should force a full refresh on the next interaction.
    pub fn requires_full_refresh(&self) -> bool {
        matches!(self, PagingError::Protocol(_))
    }
}

/// Ways a paginated response can violate the cursor contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The source replied with `success: false`.
    #[error("source rejected the request: {0}")]
    Rejected(String),

    /// The body or status could not be interpreted.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// A record arrived without any recognisable identifier.
    #[error("record at position {index} has no id")]
    MissingItemId { index: usize },

    /// `next_cursor` kept pointing at the cursor that was requested.
    #[error("cursor loop at {cursor}")]
    CursorLoop { cursor: Cursor },
}

/// Filter, sort and limit validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterValidationError {
    #[error("filter key is empty")]
    EmptyKey,

    #[error("filter key {0:?} contains characters outside [A-Za-z0-9_.-]")]
    InvalidKey(String),

    #[error("filter key {0:?} is reserved for pagination parameters")]
    ReservedKey(String),

    #[error("filter {key:?} value exceeds {max} characters")]
    ValueTooLong { key: String, max: usize },

    #[error("filter {0:?} value contains control characters")]
    ControlCharacter(String),

    #[error("too many filters ({count}, max {max})")]
    TooManyFilters { count: usize, max: usize },

    #[error("limit {limit} outside 1..={max}")]
    InvalidLimit { limit: usize, max: usize },

    #[error("sort field {0:?} is not a valid field name")]
    InvalidSortField(String),
}

pub type Result<T, E = PagingError> = std::result::Result<T, E>;
