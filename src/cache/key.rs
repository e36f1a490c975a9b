//! Cache key construction and glob matching.

use regex::Regex;

use crate::fetch::types::PageQuery;

/// Prefix of every listing (page) key.
pub const LISTING_PREFIX: &str = "cursor";

/// Prefix of every per-item key.
pub const ITEM_PREFIX: &str = "item";

/// Build a canonical key: `prefix:k1:v1|k2:v2|...` with keys sorted.
///
/// Identical parameter sets yield identical keys regardless of order.
pub fn build_key<I, K, V>(prefix: &str, params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut pairs: Vec<(String, String)> = params
        .into_iter()
        .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
        .collect();
    pairs.sort();

    if pairs.is_empty() {
        return prefix.to_string();
    }

    let joined = pairs
        .iter()
        .map(|(k, v)| format!("{k}:{v}"))
        .collect::<Vec<_>>()
        .join("|");
    format!("{prefix}:{joined}")
}

/// Key of the page a query would return.
///
/// Filters are namespaced with `f.` so they cannot collide with the
/// pagination parameters.
pub fn page_key(query: &PageQuery) -> String {
    let mut params: Vec<(String, String)> = vec![
        (
            "at".to_string(),
            query
                .cursor
                .as_ref()
                .map(|c| c.as_str().to_string())
                .unwrap_or_else(|| "start".to_string()),
        ),
        ("dir".to_string(), query.direction.as_str().to_string()),
        ("limit".to_string(), query.limit.to_string()),
    ];

    if let Some(sort_by) = &query.sort_by {
        let order = query.sort_order.unwrap_or_default();
        params.push(("sort".to_string(), format!("{sort_by}.{}", order.as_str())));
    }

    if let Some(scope) = &query.scope {
        params.push((scope.key_name().to_string(), scope.id.clone()));
    }

    for (key, value) in query.filters.iter() {
        params.push((format!("f.{key}"), value.to_string()));
    }

    build_key(LISTING_PREFIX, params)
}

/// Key of one item's cached record.
pub fn item_key(item_id: &str) -> String {
    format!("{ITEM_PREFIX}:{item_id}")
}

/// Translate a `*` glob into an anchored regex. Everything else is literal.
pub fn glob_to_regex(glob: &str) -> Result<Regex, regex::Error> {
    let body = glob
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{body}$"))
}
