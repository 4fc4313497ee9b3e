//! Inventory Synchronizer
//! セラー在庫のキャッシュ状態を判定し、キャッシュ返却・差分更新・全件取得を切り替える

pub mod backfill;
pub mod merge;

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{keys, to_json, CacheService};
use crate::catalog::{CatalogClient, FullCatalog};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::models::{
    CacheInfo, CatalogCredentials, CatalogItem, SellerInventorySnapshot, SellerSyncMetadata,
};

pub use backfill::{BackfillFetcher, BackfillOutcome};
pub use merge::{dedupe_items, merge_items};

/// Which branch of the state machine produced a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPath {
    /// Fresh cache, no network call.
    CacheHit,
    FullFetch,
    /// Stale cache, new listings merged.
    Incremental,
    /// Stale cache, nothing newer than the watermark.
    IncrementalNoop,
    /// Catalog exceeds the page ceiling; prior snapshot kept.
    Unobservable,
}

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub snapshot: SellerInventorySnapshot,
    pub metadata: SellerSyncMetadata,
    pub path: SyncPath,
}

impl SyncOutcome {
    pub fn cache_info(&self) -> CacheInfo {
        CacheInfo {
            is_cached: self.path == SyncPath::CacheHit,
            is_large_seller: self.metadata.is_large_seller,
            last_updated: Some(self.metadata.last_updated),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    pub metadata: SellerSyncMetadata,
    pub added: usize,
    pub total_items: u64,
    pub sample: Vec<CatalogItem>,
}

pub struct InventorySynchronizer {
    client: Arc<CatalogClient>,
    backfill: BackfillFetcher,
    cache: CacheService,
    config: SyncConfig,
}

impl InventorySynchronizer {
    pub fn new(client: Arc<CatalogClient>, cache: CacheService, config: SyncConfig) -> Self {
        let backfill = BackfillFetcher::new(client.clone(), config.backfill_lookback_pages);
        Self {
            client,
            backfill,
            cache,
            config,
        }
    }

    pub fn client(&self) -> &Arc<CatalogClient> {
        &self.client
    }

    // ========================================
    // Entry points
    // ========================================

    pub async fn get_current_snapshot(
        &self,
        seller_name: &str,
        user_id: i64,
        creds: &CatalogCredentials,
        bypass_cache: bool,
    ) -> Result<SyncOutcome, SyncError> {
        if !creds.is_usable() {
            return Err(SyncError::CredentialsMissing { user_id });
        }

        if !bypass_cache {
            let metadata = self.load_metadata(seller_name).await;
            let snapshot = self.load_snapshot(seller_name, user_id).await;

            if let (Some(metadata), Some(snapshot)) = (metadata, snapshot) {
                let ttl = if metadata.is_large_seller {
                    self.config.large_seller_ttl_secs
                } else {
                    self.config.regular_ttl_secs
                };
                let age = metadata.age(Utc::now());

                if age <= Duration::seconds(ttl) {
                    debug!("Cache fresh for {} ({}s old)", seller_name, age.num_seconds());
                    return Ok(SyncOutcome {
                        snapshot,
                        metadata,
                        path: SyncPath::CacheHit,
                    });
                }

                info!(
                    "Cache stale for {} ({}s old, ttl {}s), refreshing incrementally",
                    seller_name,
                    age.num_seconds(),
                    ttl
                );
                return self
                    .incremental_refresh(seller_name, user_id, creds, snapshot, metadata)
                    .await;
            }
            debug!("No cache for {}:{}", seller_name, user_id);
        }

        self.full_fetch(seller_name, user_id, creds).await
    }

    /// Always full-fetches, then drops every memoized match result.
    pub async fn force_refresh(
        &self,
        seller_name: &str,
        user_id: i64,
        creds: &CatalogCredentials,
    ) -> Result<SyncOutcome, SyncError> {
        info!("🔁 Force refresh for {} (user {})", seller_name, user_id);
        let outcome = self.get_current_snapshot(seller_name, user_id, creds, true).await?;
        let purged = self.cache.delete_pattern(keys::MATCHES_PATTERN).await;
        debug!("Purged {} memoized match results", purged);
        Ok(outcome)
    }

    /// Refresh-if-stale, for schedulers.
    pub async fn background_refresh(
        &self,
        seller_name: &str,
        user_id: i64,
        creds: &CatalogCredentials,
    ) -> Result<SyncOutcome, SyncError> {
        self.get_current_snapshot(seller_name, user_id, creds, false).await
    }

    /// Runs the tail backfill against the cached snapshot and writes the
    /// result back when anything was found.
    pub async fn reconcile_seller(
        &self,
        seller_name: &str,
        user_id: i64,
        creds: &CatalogCredentials,
    ) -> Result<ReconcileOutcome, SyncError> {
        if !creds.is_usable() {
            return Err(SyncError::CredentialsMissing { user_id });
        }

        let cached = self
            .load_snapshot(seller_name, user_id)
            .await
            .unwrap_or_else(|| SellerInventorySnapshot::empty(seller_name));
        let prior = self.load_metadata(seller_name).await;

        let outcome = self.backfill.reconcile(seller_name, creds, &cached).await?;
        let now = Utc::now();

        let metadata = match prior {
            Some(prior) if outcome.added == 0 => SellerSyncMetadata {
                is_large_seller: outcome.is_large_seller,
                ..prior
            },
            prior => {
                let mut metadata = SellerSyncMetadata::describe(
                    seller_name,
                    &outcome.snapshot.items,
                    outcome.is_large_seller,
                    now,
                );
                if let Some(prior) = prior {
                    metadata.most_recent_listed_at =
                        metadata.most_recent_listed_at.max(prior.most_recent_listed_at);
                }
                metadata
            }
        };

        if outcome.added > 0 {
            self.store(user_id, &outcome.snapshot, &metadata).await;
        }

        Ok(ReconcileOutcome {
            metadata,
            added: outcome.added,
            total_items: outcome.total_items,
            sample: outcome.sample,
        })
    }

    pub async fn load_metadata(&self, seller_name: &str) -> Option<SellerSyncMetadata> {
        self.cache.get_json(&keys::metadata(seller_name)).await
    }

    pub async fn load_snapshot(
        &self,
        seller_name: &str,
        user_id: i64,
    ) -> Option<SellerInventorySnapshot> {
        self.cache.get_json(&keys::inventory(seller_name, user_id)).await
    }

    // ========================================
    // Paths
    // ========================================

    async fn full_fetch(
        &self,
        seller_name: &str,
        user_id: i64,
        creds: &CatalogCredentials,
    ) -> Result<SyncOutcome, SyncError> {
        info!("📦 Full fetch for {}", seller_name);
        let now = Utc::now();

        match self.client.fetch_full_seller_catalog(seller_name, creds).await? {
            FullCatalog::Complete { items, .. } => {
                let items = dedupe_items(items);
                let metadata = SellerSyncMetadata::describe(seller_name, &items, false, now);
                let snapshot = SellerInventorySnapshot {
                    seller_name: seller_name.to_string(),
                    items,
                };
                self.store(user_id, &snapshot, &metadata).await;
                info!("✅ Cached {} items for {}", metadata.item_count, seller_name);

                Ok(SyncOutcome {
                    snapshot,
                    metadata,
                    path: SyncPath::FullFetch,
                })
            }
            FullCatalog::Unobservable { total_pages, .. } => {
                warn!(
                    "Seller {} is unobservable via full fetch ({} pages), keeping prior snapshot",
                    seller_name, total_pages
                );
                let snapshot = self
                    .load_snapshot(seller_name, user_id)
                    .await
                    .unwrap_or_else(|| SellerInventorySnapshot::empty(seller_name));
                let mut metadata =
                    SellerSyncMetadata::describe(seller_name, &snapshot.items, true, now);
                if let Some(prior) = self.load_metadata(seller_name).await {
                    metadata.most_recent_listed_at =
                        metadata.most_recent_listed_at.max(prior.most_recent_listed_at);
                }
                self.store(user_id, &snapshot, &metadata).await;

                Ok(SyncOutcome {
                    snapshot,
                    metadata,
                    path: SyncPath::Unobservable,
                })
            }
        }
    }

    async fn incremental_refresh(
        &self,
        seller_name: &str,
        user_id: i64,
        creds: &CatalogCredentials,
        snapshot: SellerInventorySnapshot,
        metadata: SellerSyncMetadata,
    ) -> Result<SyncOutcome, SyncError> {
        let Some(watermark) = metadata.most_recent_listed_at else {
            info!("No watermark for {}, falling back to full fetch", seller_name);
            return self.full_fetch(seller_name, user_id, creds).await;
        };

        let fresh = self.client.fetch_listed_since(seller_name, watermark, creds).await?;
        let is_large_seller = self.client.paging().is_unobservable(fresh.pagination.pages);
        let now = Utc::now();

        if fresh.items.is_empty() {
            debug!("No listings newer than {} for {}", watermark, seller_name);
            let metadata = SellerSyncMetadata {
                cached_at: now,
                last_updated: now,
                is_large_seller,
                ..metadata
            };
            self.store(user_id, &snapshot, &metadata).await;
            return Ok(SyncOutcome {
                snapshot,
                metadata,
                path: SyncPath::IncrementalNoop,
            });
        }

        let merged = merge_items(&snapshot.items, fresh.items);
        let mut refreshed =
            SellerSyncMetadata::describe(seller_name, &merged.items, is_large_seller, now);
        refreshed.most_recent_listed_at = refreshed.most_recent_listed_at.max(Some(watermark));

        let snapshot = SellerInventorySnapshot {
            seller_name: seller_name.to_string(),
            items: merged.items,
        };
        self.store(user_id, &snapshot, &refreshed).await;
        info!(
            "➕ Merged {} new listings for {} (checked {})",
            merged.added, seller_name, fresh.checked
        );

        Ok(SyncOutcome {
            snapshot,
            metadata: refreshed,
            path: SyncPath::Incremental,
        })
    }

    /// Snapshot and metadata go out in one atomic write.
    async fn store(
        &self,
        user_id: i64,
        snapshot: &SellerInventorySnapshot,
        metadata: &SellerSyncMetadata,
    ) {
        let ttl = self.config.snapshot_ttl_secs;
        let inventory_key = keys::inventory(&snapshot.seller_name, user_id);
        let metadata_key = keys::metadata(&snapshot.seller_name);
        let written = self
            .cache
            .set_entries(&[
                (inventory_key.as_str(), to_json(snapshot), ttl),
                (metadata_key.as_str(), to_json(metadata), ttl),
            ])
            .await;
        if !written && self.cache.is_enabled() {
            warn!("Snapshot for {} was not cached", snapshot.seller_name);
        }
    }
}
