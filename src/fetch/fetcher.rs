//! CursorFetcher: one paginated request against the source, normalized.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{PagingError, ProtocolError};
use crate::fetch::types::{MediaItem, PageQuery, PageRequest, PageResponse, PageResult, Scope};

/// The external record store answering paginated reads.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Perform one paginated read.
    async fn read_page(
        &self,
        scope: Option<&Scope>,
        request: &PageRequest,
    ) -> Result<PageResponse, PagingError>;

    /// Drop matching entries from the source's own cache, if it has one.
    async fn invalidate_remote(&self, _pattern: &str) -> Result<u64, PagingError> {
        Ok(0)
    }
}

/// Stateless fetcher: shapes the request, enforces the timeout and maps the
/// response into a [`PageResult`].
#[derive(Clone)]
pub struct CursorFetcher {
    source: Arc<dyn PageSource>,
    timeout: Duration,
}

impl CursorFetcher {
    pub fn new(source: Arc<dyn PageSource>, timeout: Duration) -> Self {
        Self { source, timeout }
    }

    pub fn source(&self) -> &Arc<dyn PageSource> {
        &self.source
    }

    /// Fetch one page. A timeout is reported as a network error.
    pub async fn fetch(&self, query: &PageQuery) -> Result<PageResult, PagingError> {
        let request = query.to_request();
        let response = tokio::time::timeout(
            self.timeout,
            self.source.read_page(query.scope.as_ref(), &request),
        )
        .await
        .map_err(|_| {
            PagingError::Network(format!("request timed out after {:?}", self.timeout))
        })??;

        let page = normalize(response)?;
        debug!(
            cursor = query.cursor.as_ref().map(|c| c.as_str()).unwrap_or("start"),
            items = page.items.len(),
            has_more = page.has_more,
            "Fetched page"
        );
        Ok(page)
    }

    /// Forward an administrative invalidation to the source.
    pub async fn invalidate_remote(&self, pattern: &str) -> Result<u64, PagingError> {
        tokio::time::timeout(self.timeout, self.source.invalidate_remote(pattern))
            .await
            .map_err(|_| PagingError::Network("remote invalidation timed out".to_string()))?
    }
}

impl std::fmt::Debug for CursorFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorFetcher")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Map a wire response into a page, rejecting unusable ones.
pub fn normalize(response: PageResponse) -> Result<PageResult, ProtocolError> {
    if !response.success {
        return Err(ProtocolError::Rejected(
            response
                .error
                .unwrap_or_else(|| "unspecified error".to_string()),
        ));
    }

    let items = response
        .data
        .into_iter()
        .enumerate()
        .map(|(index, record)| MediaItem::from_record(index, record))
        .collect::<Result<Vec<_>, _>>()?;

    let performance = response.performance.unwrap_or_default();
    Ok(PageResult {
        items,
        next_cursor: response.pagination.next_cursor,
        prev_cursor: response.pagination.prev_cursor,
        has_more: response.pagination.has_more,
        query_time_ms: Some(performance.query_time_ms),
        source_cache_hit: performance.cache_hit,
    })
}
