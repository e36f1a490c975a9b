//! Order-preserving deduplicating append.

use std::collections::HashSet;

use crate::fetch::types::MediaItem;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub added: usize,
    pub duplicates: usize,
}

/// Append every item of `incoming` whose id is not in `seen`, keeping
/// first-seen order. `seen` must mirror the ids in `items`.
pub fn merge_unique(
    items: &mut Vec<MediaItem>,
    seen: &mut HashSet<String>,
    incoming: Vec<MediaItem>,
) -> MergeStats {
    let mut stats = MergeStats::default();
    items.reserve(incoming.len());

    for item in incoming {
        if seen.insert(item.id.clone()) {
            items.push(item);
            stats.added += 1;
        } else {
            stats.duplicates += 1;
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(items: &[MediaItem]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn test_keeps_first_seen_order() {
        let mut items = Vec::new();
        let mut seen = HashSet::new();

        merge_unique(
            &mut items,
            &mut seen,
            vec![MediaItem::new("a"), MediaItem::new("b")],
        );
        let stats = merge_unique(
            &mut items,
            &mut seen,
            vec![MediaItem::new("b"), MediaItem::new("c"), MediaItem::new("a")],
        );

        assert_eq!(ids(&items), vec!["a", "b", "c"]);
        assert_eq!(stats, MergeStats { added: 1, duplicates: 2 });
    }

    #[test]
    fn test_duplicates_within_one_page() {
        let mut items = Vec::new();
        let mut seen = HashSet::new();
        let stats = merge_unique(
            &mut items,
            &mut seen,
            vec![MediaItem::new("x"), MediaItem::new("x")],
        );
        assert_eq!(ids(&items), vec!["x"]);
        assert_eq!(stats.duplicates, 1);
    }
}
