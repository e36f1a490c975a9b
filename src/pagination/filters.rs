//! Active filter set and request validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::FilterValidationError;

/// Parameter names the paginated read protocol already uses.
pub const RESERVED_KEYS: &[&str] = &["cursor", "direction", "limit", "sort_by", "sort_order"];

pub const MAX_FILTERS: usize = 32;
pub const MAX_VALUE_LEN: usize = 256;

/// Mapping of filter key to value.
///
/// Kept sorted so that iteration order (and therefore cache keys and query
/// strings) does not depend on insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSet(BTreeMap<String, String>);

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    /// Merge `patch` into this set. An empty value removes the key.
    pub fn merge(&mut self, patch: &FilterSet) {
        for (key, value) in patch.iter() {
            if value.is_empty() {
                self.0.remove(key);
            } else {
                self.0.insert(key.to_string(), value.to_string());
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    /// Check every key and value.
    pub fn validate(&self) -> Result<(), FilterValidationError> {
        if self.0.len() > MAX_FILTERS {
            return Err(FilterValidationError::TooManyFilters {
                count: self.0.len(),
                max: MAX_FILTERS,
            });
        }

        for (key, value) in &self.0 {
            if key.is_empty() {
                return Err(FilterValidationError::EmptyKey);
            }
            if !is_field_token(key) {
                return Err(FilterValidationError::InvalidKey(key.clone()));
            }
            if RESERVED_KEYS.contains(&key.as_str()) {
                return Err(FilterValidationError::ReservedKey(key.clone()));
            }
            if value.chars().count() > MAX_VALUE_LEN {
                return Err(FilterValidationError::ValueTooLong {
                    key: key.clone(),
                    max: MAX_VALUE_LEN,
                });
            }
            if value.chars().any(char::is_control) {
                return Err(FilterValidationError::ControlCharacter(key.clone()));
            }
        }

        Ok(())
    }
}

impl From<BTreeMap<String, String>> for FilterSet {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FilterSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Validate a page size against the configured maximum.
pub fn validate_limit(limit: usize, max: usize) -> Result<(), FilterValidationError> {
    if limit == 0 || limit > max {
        return Err(FilterValidationError::InvalidLimit { limit, max });
    }
    Ok(())
}

/// Validate a sort field name.
pub fn validate_sort_field(field: &str) -> Result<(), FilterValidationError> {
    if field.is_empty() || !is_field_token(field) {
        return Err(FilterValidationError::InvalidSortField(field.to_string()));
    }
    Ok(())
}

fn is_field_token(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}
