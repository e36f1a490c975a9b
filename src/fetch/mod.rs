//! Paginated reads against the external record store.
//!
//! - [`types`]: wire protocol and normalized page model
//! - [`fetcher`]: `PageSource` seam and the stateless `CursorFetcher`
//! - [`http_source`]: reqwest-backed `PageSource`

pub mod fetcher;
pub mod http_source;
pub mod types;

pub use fetcher::{CursorFetcher, PageSource};
pub use http_source::HttpPageSource;
pub use types::{Cursor, Direction, MediaItem, PageQuery, PageResult, Scope, SortOrder};
