//! Data Models
//! カタログ商品・在庫スナップショット・ウォントリスト・マッチ結果の定義

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ========================================
// Catalog Item
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AvailabilityStatus {
    #[default]
    Available,
    Unavailable,
    Other,
}

impl AvailabilityStatus {
    /// Maps the marketplace's free-form listing status.
    pub fn from_upstream(status: Option<&str>) -> Self {
        match status.map(|s| s.trim().to_ascii_lowercase()) {
            None => Self::Available,
            Some(s) if s.is_empty() || s == "for sale" => Self::Available,
            Some(s) if matches!(s.as_str(), "sold" | "expired" | "deleted" | "suspended" | "draft") => {
                Self::Unavailable
            }
            Some(_) => Self::Other,
        }
    }
}

/// One unit offered by a seller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    /// Release identifier shared with want-list entries.
    pub catalog_ref_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub creator: Option<String>,
    pub price_amount: Decimal,
    pub price_currency: String,
    pub condition_primary: String,
    #[serde(default)]
    pub condition_secondary: Option<String>,
    pub detail_url: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub availability_status: AvailabilityStatus,
    pub listed_at: Option<DateTime<Utc>>,
}

// ========================================
// Pagination
// ========================================

/// `pagination` block of every paged catalog response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub items: u64,
    #[serde(default)]
    pub pages: u32,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub per_page: u32,
}

#[derive(Debug, Clone)]
pub struct CatalogPage<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
    /// Entries upstream sent on this page, including ones dropped as malformed.
    pub received: usize,
}

impl<T> CatalogPage<T> {
    /// Page whose every entry parsed.
    pub fn new(items: Vec<T>, pagination: Pagination) -> Self {
        Self {
            received: items.len(),
            items,
            pagination,
        }
    }
}

/// Sort requested from the seller inventory endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub field: &'static str,
    pub descending: bool,
}

impl SortSpec {
    /// Newest listings first.
    pub const LISTED_DESC: SortSpec = SortSpec { field: "listed", descending: true };

    pub fn order(&self) -> &'static str {
        if self.descending {
            "desc"
        } else {
            "asc"
        }
    }
}

// ========================================
// Snapshot / Metadata
// ========================================

/// Cached mirror of one seller's catalog for one requesting credential.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SellerInventorySnapshot {
    pub seller_name: String,
    pub items: Vec<CatalogItem>,
}

impl SellerInventorySnapshot {
    pub fn empty(seller_name: &str) -> Self {
        Self {
            seller_name: seller_name.to_string(),
            items: Vec::new(),
        }
    }
}

/// Provenance record for a snapshot, stored under `seller_metadata:{seller}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellerSyncMetadata {
    pub seller_name: String,
    pub item_count: usize,
    pub cached_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub is_large_seller: bool,
    pub known_item_ids: BTreeSet<String>,
    pub most_recent_listed_at: Option<DateTime<Utc>>,
}

impl SellerSyncMetadata {
    /// Fresh metadata derived from a complete item collection.
    pub fn describe(
        seller_name: &str,
        items: &[CatalogItem],
        is_large_seller: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            seller_name: seller_name.to_string(),
            item_count: items.len(),
            cached_at: now,
            last_updated: now,
            is_large_seller,
            known_item_ids: items.iter().map(|i| i.id.clone()).collect(),
            most_recent_listed_at: most_recent_listed_at(items),
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.cached_at
    }
}

/// Newest `listed_at` across a collection.
pub fn most_recent_listed_at(items: &[CatalogItem]) -> Option<DateTime<Utc>> {
    items.iter().filter_map(|i| i.listed_at).max()
}

// ========================================
// Wantlist
// ========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WantlistItem {
    pub id: String,
    pub catalog_ref_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub creators: Vec<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub formats: Vec<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub date_added: Option<DateTime<Utc>>,
}

// ========================================
// Credentials
// ========================================

/// A user's access token pair for the remote catalog API.
#[derive(Clone, PartialEq, Eq)]
pub struct CatalogCredentials {
    pub access_token: String,
    pub access_secret: String,
}

impl CatalogCredentials {
    pub fn new(access_token: impl Into<String>, access_secret: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            access_secret: access_secret.into(),
        }
    }

    pub fn is_usable(&self) -> bool {
        !self.access_token.trim().is_empty() && !self.access_secret.trim().is_empty()
    }
}

// トークンをログに出さない
impl fmt::Debug for CatalogCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogCredentials")
            .field("access_token", &"***")
            .field("access_secret", &"***")
            .finish()
    }
}

// ========================================
// Matching results
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Fuzzy,
}

/// Join of one inventory item with one want-list entry. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub item: CatalogItem,
    pub wanted: WantlistItem,
    pub match_confidence: f64,
    pub kind: MatchKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub is_cached: bool,
    pub is_large_seller: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellerMatches {
    pub seller_name: String,
    pub total_matches: usize,
    pub inventory_count: usize,
    pub matches: Vec<MatchRecord>,
    pub cache_info: CacheInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Full result of `get_matches_for_user`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchReport {
    pub user_id: i64,
    pub username: String,
    pub wantlist_count: usize,
    pub sellers_checked: usize,
    pub registered_sellers: Vec<String>,
    pub sellers: Vec<SellerMatches>,
    /// Largest retry hint among rate-limited sellers in this run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

impl MatchReport {
    pub fn total_matches(&self) -> usize {
        self.sellers.iter().map(|s| s.total_matches).sum()
    }

    /// True when any seller failed this run.
    pub fn is_partial(&self) -> bool {
        self.sellers.iter().any(|s| s.error.is_some())
    }
}
