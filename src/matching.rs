//! Matching Engine
//! ウォントリストとセラー在庫の突き合わせ（リリース ID 優先、なければタイトル/アーティストのあいまい一致）

use std::collections::{HashMap, HashSet};

use crate::models::{CatalogItem, MatchKind, MatchRecord, WantlistItem};

pub const TITLE_THRESHOLD: f64 = 0.4;
pub const CREATOR_THRESHOLD: f64 = 0.5;
/// Normalized titles shorter than this never match by containment.
const MIN_SUBSTRING_LEN: usize = 4;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
];

/// One pass over the inventory; each item yields at most one record.
pub fn find_matches(wantlist: &[WantlistItem], inventory: &[CatalogItem]) -> Vec<MatchRecord> {
    // 同じリリース ID が複数ある場合は先頭のウォントを採用
    let mut by_ref: HashMap<&str, &WantlistItem> = HashMap::new();
    for want in wantlist {
        if let Some(ref_id) = want.catalog_ref_id.as_deref() {
            by_ref.entry(ref_id).or_insert(want);
        }
    }

    let normalized: Vec<(Vec<String>, &WantlistItem)> =
        wantlist.iter().map(|w| (tokens(&w.title), w)).collect();

    inventory
        .iter()
        .filter_map(|item| {
            if let Some(want) = item.catalog_ref_id.as_deref().and_then(|id| by_ref.get(id)) {
                return Some(MatchRecord {
                    item: item.clone(),
                    wanted: (*want).clone(),
                    match_confidence: 1.0,
                    kind: MatchKind::Exact,
                });
            }

            let item_tokens = tokens(&item.title);
            normalized.iter().find_map(|(want_tokens, want)| {
                let confidence = fuzzy_confidence(&item_tokens, item, want_tokens, want)?;
                Some(MatchRecord {
                    item: item.clone(),
                    wanted: (*want).clone(),
                    match_confidence: confidence,
                    kind: MatchKind::Fuzzy,
                })
            })
        })
        .collect()
}

fn fuzzy_confidence(
    item_tokens: &[String],
    item: &CatalogItem,
    want_tokens: &[String],
    want: &WantlistItem,
) -> Option<f64> {
    let ratio = overlap_ratio(item_tokens, want_tokens);
    let contained = contains_either(&item_tokens.join(" "), &want_tokens.join(" "));
    if ratio < TITLE_THRESHOLD && !contained {
        return None;
    }

    if let Some(creator) = item.creator.as_deref().filter(|c| !c.trim().is_empty()) {
        if !want.creators.is_empty() {
            let best = want
                .creators
                .iter()
                .map(|other| creator_similarity(creator, other))
                .fold(0.0, f64::max);
            if best < CREATOR_THRESHOLD {
                return None;
            }
        }
    }

    // 部分一致だけで通った場合は閾値を下限にする
    let confidence = if ratio < TITLE_THRESHOLD { TITLE_THRESHOLD } else { ratio };
    Some(confidence.clamp(0.0, 1.0))
}

/// Lowercased word tokens with punctuation and stop-words removed.
pub fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty() && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Share of the longer token list found in the other one.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    overlap_ratio(&tokens(a), &tokens(b))
}

/// 1.0 on equality or containment, otherwise word overlap.
pub fn creator_similarity(a: &str, b: &str) -> f64 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b || a.contains(&b) || b.contains(&a) {
        return 1.0;
    }
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();
    let overlap = words_a.intersection(&words_b).count();
    overlap as f64 / words_a.len().max(words_b.len()) as f64
}

fn overlap_ratio(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.iter().filter(|w| b.contains(w)).count();
    shared as f64 / a.len().max(b.len()) as f64
}

fn contains_either(a: &str, b: &str) -> bool {
    a.len() >= MIN_SUBSTRING_LEN && b.len() >= MIN_SUBSTRING_LEN && (a.contains(b) || b.contains(a))
}
