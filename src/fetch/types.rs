//! Wire types of the paginated read protocol and the normalized page model.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::pagination::filters::FilterSet;

/// Opaque position token issued by the source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Next,
    Prev,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Next => "next",
            Direction::Prev => "prev",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// What a scoped read is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Group,
    Owner,
}

/// Additional path scope for a read (e.g. one group's items).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub kind: ScopeKind,
    pub id: String,
}

impl Scope {
    pub fn group(id: impl Into<String>) -> Self {
        Self {
            kind: ScopeKind::Group,
            id: id.into(),
        }
    }

    pub fn owner(id: impl Into<String>) -> Self {
        Self {
            kind: ScopeKind::Owner,
            id: id.into(),
        }
    }

    /// Cache-key parameter name for this scope.
    pub fn key_name(&self) -> &'static str {
        match self.kind {
            ScopeKind::Group => "group",
            ScopeKind::Owner => "owner",
        }
    }

    /// Path prefix on the record store API.
    pub fn path_segment(&self) -> String {
        match self.kind {
            ScopeKind::Group => format!("groups/{}", self.id),
            ScopeKind::Owner => format!("owners/{}", self.id),
        }
    }
}

/// Everything needed to ask the source for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub cursor: Option<Cursor>,
    pub direction: Direction,
    pub limit: usize,
    pub filters: FilterSet,
    pub sort_by: Option<String>,
    pub sort_order: Option<SortOrder>,
    pub scope: Option<Scope>,
}

impl PageQuery {
    /// Query for the first page.
    pub fn first(filters: FilterSet, limit: usize) -> Self {
        Self {
            cursor: None,
            direction: Direction::Next,
            limit,
            filters,
            sort_by: None,
            sort_order: None,
            scope: None,
        }
    }

    pub fn sorted(mut self, sort_by: Option<String>, sort_order: Option<SortOrder>) -> Self {
        self.sort_by = sort_by;
        self.sort_order = sort_order;
        self
    }

    pub fn scoped(mut self, scope: Option<Scope>) -> Self {
        self.scope = scope;
        self
    }

    /// Same query positioned at `cursor`.
    pub fn at(&self, cursor: Option<Cursor>) -> Self {
        Self {
            cursor,
            ..self.clone()
        }
    }

    /// The request body/params sent to the source.
    pub fn to_request(&self) -> PageRequest {
        PageRequest {
            cursor: self.cursor.clone(),
            direction: self.direction,
            limit: self.limit,
            filters: self.filters.clone(),
            sort_by: self.sort_by.clone(),
            sort_order: self.sort_order,
        }
    }
}

/// Paginated read request as sent over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
    #[serde(default)]
    pub direction: Direction,
    pub limit: usize,
    #[serde(default)]
    pub filters: FilterSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<SortOrder>,
}

/// Paginated read response as received over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub pagination: PaginationInfo,
    #[serde(default)]
    pub performance: Option<PerformanceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaginationInfo {
    #[serde(default)]
    pub next_cursor: Option<Cursor>,
    #[serde(default)]
    pub prev_cursor: Option<Cursor>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceInfo {
    #[serde(default)]
    pub query_time_ms: f64,
    #[serde(default)]
    pub cache_hit: Option<bool>,
}

/// A media record normalized from the source's field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Fields the normalizer does not know about, untouched.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

const ID_FIELDS: &[&str] = &["id", "media_id", "_id"];
const TITLE_FIELDS: &[&str] = &["title", "name"];
const GROUP_FIELDS: &[&str] = &["group_id", "folder_id"];
const OWNER_FIELDS: &[&str] = &["owner_id", "user_id"];
const TYPE_FIELDS: &[&str] = &["media_type", "kind"];
const CREATED_FIELDS: &[&str] = &["created_at", "createdAt"];

impl MediaItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            group_id: None,
            owner_id: None,
            media_type: None,
            created_at: None,
            extra: Map::new(),
        }
    }

    /// Map one external record into a `MediaItem`.
    ///
    /// `index` is the record's position in the page, used for error reporting.
    pub fn from_record(index: usize, record: Value) -> Result<Self, ProtocolError> {
        let Value::Object(mut fields) = record else {
            return Err(ProtocolError::Malformed(format!(
                "record at position {index} is not an object"
            )));
        };

        let id = take_first(&mut fields, ID_FIELDS)
            .and_then(scalar_to_string)
            .filter(|id| !id.is_empty())
            .ok_or(ProtocolError::MissingItemId { index })?;

        let mut item = MediaItem::new(id);
        item.title = take_first(&mut fields, TITLE_FIELDS).and_then(scalar_to_string);
        item.group_id = take_first(&mut fields, GROUP_FIELDS).and_then(scalar_to_string);
        item.owner_id = take_first(&mut fields, OWNER_FIELDS).and_then(scalar_to_string);
        item.media_type = take_first(&mut fields, TYPE_FIELDS).and_then(scalar_to_string);
        item.created_at = take_first(&mut fields, CREATED_FIELDS).and_then(scalar_to_string);
        item.extra = fields;
        Ok(item)
    }
}

/// Remove all aliases of one logical field, returning the first present one.
fn take_first(fields: &mut Map<String, Value>, names: &[&str]) -> Option<Value> {
    let mut found = None;
    for name in names {
        if let Some(value) = fields.remove(*name) {
            if found.is_none() && !value.is_null() {
                found = Some(value);
            }
        }
    }
    found
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// One normalized page, items in display order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub items: Vec<MediaItem>,
    pub next_cursor: Option<Cursor>,
    #[serde(default)]
    pub prev_cursor: Option<Cursor>,
    pub has_more: bool,
    #[serde(default)]
    pub query_time_ms: Option<f64>,
    #[serde(default)]
    pub source_cache_hit: Option<bool>,
}

impl PageResult {
    pub fn new(items: Vec<MediaItem>, next_cursor: Option<Cursor>, has_more: bool) -> Self {
        Self {
            items,
            next_cursor,
            prev_cursor: None,
            has_more,
            query_time_ms: None,
            source_cache_hit: None,
        }
    }

    /// Whether the source claims more items but gave no way to reach them.
    pub fn is_dead_end(&self) -> bool {
        self.has_more && self.next_cursor.is_none()
    }
}
