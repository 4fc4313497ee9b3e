//! Snapshot merging
//! id で重複排除しながら新着を既存コレクションへ追加

use std::collections::HashSet;

use crate::models::CatalogItem;

/// Result of folding a batch into an existing collection.
#[derive(Debug, Clone)]
pub struct Merged {
    pub items: Vec<CatalogItem>,
    pub added: usize,
}

/// Keeps `existing` in order and appends every batch item whose id is not
/// already present. Duplicates inside the batch collapse to their first copy.
pub fn merge_items(existing: &[CatalogItem], batch: Vec<CatalogItem>) -> Merged {
    let mut seen: HashSet<String> = existing.iter().map(|i| i.id.clone()).collect();
    let mut items = existing.to_vec();
    let before = items.len();

    for item in batch {
        if seen.insert(item.id.clone()) {
            items.push(item);
        }
    }

    Merged {
        added: items.len() - before,
        items,
    }
}

/// Drops repeated ids, first occurrence wins.
pub fn dedupe_items(items: Vec<CatalogItem>) -> Vec<CatalogItem> {
    merge_items(&[], items).items
}
