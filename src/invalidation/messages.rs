//! Invalidation events and push channel messages.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What an invalidation targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationKind {
    Pattern,
    Specific,
    Category,
    Clear,
}

/// Emitted by the cache store whenever entries are explicitly removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    pub kind: InvalidationKind,
    /// Glob, key or category name; empty for `clear`.
    pub target: String,
    /// Entries removed.
    pub removed: usize,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl InvalidationEvent {
    pub fn new(kind: InvalidationKind, target: impl Into<String>, removed: usize) -> Self {
        Self {
            kind,
            target: target.into(),
            removed,
            timestamp: now_millis(),
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A message delivered over the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    /// One item changed on the server.
    ItemChanged(ItemChange),
    /// Explicit instruction to drop cache entries.
    CacheDirective(CacheDirective),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemAction {
    Update,
    Delete,
    Restore,
    Move,
}

/// Item-level change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemChange {
    #[serde(alias = "item_id")]
    pub item_id: String,
    pub action: ItemAction,
    #[serde(default, alias = "changed_fields")]
    pub changed_fields: BTreeMap<String, FieldChange>,
}

/// Before/after values of one changed field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    #[serde(default)]
    pub old: Value,
    #[serde(default)]
    pub new: Value,
}

/// Field names that carry an item's group membership.
const GROUP_FIELDS: &[&str] = &["group_id", "groupId", "folder_id"];

impl ItemChange {
    /// Old and new group when the change moved the item between groups.
    pub fn group_move(&self) -> Option<(Option<String>, Option<String>)> {
        let change = GROUP_FIELDS
            .iter()
            .find_map(|name| self.changed_fields.get(*name))?;

        let old = value_to_id(&change.old);
        let new = value_to_id(&change.new);
        if old == new {
            return None;
        }
        Some((old, new))
    }
}

fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Cache directive: literal keys and/or glob patterns to drop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheDirective {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Why the bus invalidated something; delivered to `on_invalidation` listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum NoticeCause {
    ItemChanged { item_id: String, action: ItemAction },
    Directive { reason: Option<String> },
    Administrative { pattern: String },
    Resync,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvalidationNotice {
    #[serde(flatten)]
    pub cause: NoticeCause,
    pub removed: usize,
    pub timestamp: u64,
}

impl InvalidationNotice {
    pub fn new(cause: NoticeCause, removed: usize) -> Self {
        Self {
            cause,
            removed,
            timestamp: now_millis(),
        }
    }
}
