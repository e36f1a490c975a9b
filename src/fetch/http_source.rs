//! HTTP record store client.
//!
//! `GET {base}/items` (or `{base}/groups/{id}/items`, `{base}/owners/{id}/items`)
//! with the pagination parameters and every filter as query parameters.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PagingError, ProtocolError};
use crate::fetch::fetcher::PageSource;
use crate::fetch::types::{PageRequest, PageResponse, Scope};

#[derive(Debug, Clone)]
pub struct HttpPageSource {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct InvalidateBody<'a> {
    pattern: &'a str,
}

#[derive(Deserialize)]
struct InvalidateReply {
    #[serde(default)]
    removed: u64,
}

impl HttpPageSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, PagingError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PagingError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn items_url(&self, scope: Option<&Scope>) -> String {
        match scope {
            Some(scope) => format!("{}/{}/items", self.base_url, scope.path_segment()),
            None => format!("{}/items", self.base_url),
        }
    }
}

/// Flatten a request into query parameters. Filters go in as plain parameters.
pub fn query_params(request: &PageRequest) -> Vec<(String, String)> {
    let mut params = vec![
        ("direction".to_string(), request.direction.as_str().to_string()),
        ("limit".to_string(), request.limit.to_string()),
    ];
    if let Some(cursor) = &request.cursor {
        params.push(("cursor".to_string(), cursor.as_str().to_string()));
    }
    if let Some(sort_by) = &request.sort_by {
        params.push(("sort_by".to_string(), sort_by.clone()));
    }
    if let Some(order) = request.sort_order {
        params.push(("sort_order".to_string(), order.as_str().to_string()));
    }
    for (key, value) in request.filters.iter() {
        params.push((key.to_string(), value.to_string()));
    }
    params
}

fn classify_status(status: StatusCode) -> Option<PagingError> {
    if status.is_success() {
        None
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Some(PagingError::Network(format!("source returned {status}")))
    } else {
        Some(ProtocolError::Malformed(format!("source returned {status}")).into())
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn read_page(
        &self,
        scope: Option<&Scope>,
        request: &PageRequest,
    ) -> Result<PageResponse, PagingError> {
        let url = self.items_url(scope);
        debug!(url, cursor = ?request.cursor, "GET page");

        let response = self
            .client
            .get(&url)
            .query(&query_params(request))
            .send()
            .await
            .map_err(|e| PagingError::Network(e.to_string()))?;

        if let Some(err) = classify_status(response.status()) {
            return Err(err);
        }

        response
            .json::<PageResponse>()
            .await
            .map_err(|e| ProtocolError::Malformed(e.to_string()).into())
    }

    async fn invalidate_remote(&self, pattern: &str) -> Result<u64, PagingError> {
        let url = format!("{}/cache/invalidate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&InvalidateBody { pattern })
            .send()
            .await
            .map_err(|e| PagingError::Network(e.to_string()))?;

        if let Some(err) = classify_status(response.status()) {
            return Err(err);
        }

        let reply = response
            .json::<InvalidateReply>()
            .await
            .map_err(|e| PagingError::from(ProtocolError::Malformed(e.to_string())))?;
        debug!(pattern, removed = reply.removed, "Remote cache invalidated");
        Ok(reply.removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::types::{Cursor, PageQuery, SortOrder};
    use crate::pagination::filters::FilterSet;

    #[test]
    fn test_query_params_flatten_filters() {
        let query = PageQuery::first(FilterSet::new().with("platform", "x"), 50)
            .sorted(Some("created_at".into()), Some(SortOrder::Asc))
            .at(Some(Cursor::new("c1")));
        let params = query_params(&query.to_request());

        assert!(params.contains(&("cursor".into(), "c1".into())));
        assert!(params.contains(&("limit".into(), "50".into())));
        assert!(params.contains(&("sort_order".into(), "asc".into())));
        assert!(params.contains(&("platform".into(), "x".into())));
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::OK).is_none());
        assert!(classify_status(StatusCode::BAD_GATEWAY)
            .unwrap()
            .is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS)
            .unwrap()
            .is_transient());
        assert!(classify_status(StatusCode::BAD_REQUEST)
            .unwrap()
            .requires_full_refresh());
    }

    #[test]
    fn test_scoped_urls() {
        let source = HttpPageSource::new("http://host/api/", Duration::from_secs(1)).unwrap();
        assert_eq!(source.items_url(None), "http://host/api/items");
        assert_eq!(
            source.items_url(Some(&Scope::group("g1"))),
            "http://host/api/groups/g1/items"
        );
    }
}
