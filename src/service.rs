//! Wantlist Matching Service
//! ユーザーのウォントリストと登録セラー全員の在庫を突き合わせるトップレベル処理

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use tracing::{debug, info, warn};

use crate::cache::{keys, CacheService};
use crate::config::SyncConfig;
use crate::db::{self, DbPool, UserAccount};
use crate::error::SyncError;
use crate::matching::find_matches;
use crate::models::{
    CacheInfo, CatalogCredentials, CatalogItem, MatchReport, SellerMatches, SellerSyncMetadata,
    WantlistItem,
};
use crate::sync::{InventorySynchronizer, ReconcileOutcome, SyncOutcome};

type MatchFuture = Shared<BoxFuture<'static, Result<MatchReport, SyncError>>>;
type RunKey = (i64, bool);

/// Registered run: id plus a handle that dies with the last waiter.
type InflightRuns = HashMap<RunKey, (u64, WeakShared<BoxFuture<'static, Result<MatchReport, SyncError>>>)>;

/// Clears its own registry entry when the run finishes or every waiter is
/// dropped.
struct InflightGuard {
    service: Arc<WantlistMatchingService>,
    key: RunKey,
    run_id: u64,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        let mut inflight = self.service.inflight_runs();
        if inflight.get(&self.key).is_some_and(|(id, _)| *id == self.run_id) {
            inflight.remove(&self.key);
        }
    }
}

pub struct WantlistMatchingService {
    db: DbPool,
    sync: Arc<InventorySynchronizer>,
    cache: CacheService,
    config: SyncConfig,
    /// In-flight computations keyed by `(user_id, bypass_cache)`.
    inflight: Mutex<InflightRuns>,
    next_run_id: AtomicU64,
}

impl WantlistMatchingService {
    pub fn new(
        db: DbPool,
        sync: Arc<InventorySynchronizer>,
        cache: CacheService,
        config: SyncConfig,
    ) -> Self {
        Self {
            db,
            sync,
            cache,
            config,
            inflight: Mutex::new(HashMap::new()),
            next_run_id: AtomicU64::new(0),
        }
    }

    pub fn synchronizer(&self) -> &Arc<InventorySynchronizer> {
        &self.sync
    }

    pub fn cache(&self) -> &CacheService {
        &self.cache
    }

    pub fn db(&self) -> &DbPool {
        &self.db
    }

    // ========================================
    // Matches
    // ========================================

    /// Concurrent calls with the same key share one computation.
    pub async fn get_matches_for_user(
        self: &Arc<Self>,
        user_id: i64,
        bypass_cache: bool,
    ) -> Result<MatchReport, SyncError> {
        let key = (user_id, bypass_cache);
        let shared = {
            let mut inflight = self.inflight_runs();
            match inflight.get(&key).and_then(|(_, weak)| weak.upgrade()) {
                Some(running) => {
                    debug!("Joining in-flight match run for user {}", user_id);
                    running
                }
                None => {
                    let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
                    let guard = InflightGuard {
                        service: Arc::clone(self),
                        key,
                        run_id,
                    };
                    let run: MatchFuture = async move {
                        guard.service.compute_matches(user_id, bypass_cache).await
                    }
                    .boxed()
                    .shared();
                    if let Some(weak) = run.downgrade() {
                        inflight.insert(key, (run_id, weak));
                    }
                    run
                }
            }
        };
        shared.await
    }

    fn inflight_runs(&self) -> std::sync::MutexGuard<'_, InflightRuns> {
        self.inflight.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn compute_matches(
        &self,
        user_id: i64,
        bypass_cache: bool,
    ) -> Result<MatchReport, SyncError> {
        let (user, creds) = self.user_credentials(user_id).await?;

        let memo_key = keys::matches(user_id);
        if !bypass_cache {
            if let Some(report) = self.cache.get_json::<MatchReport>(&memo_key).await {
                info!("✅ Serving memoized matches for user {}", user_id);
                return Ok(report);
            }
        }

        let wantlist = self.load_wantlist(&user, &creds, bypass_cache).await?;
        let registered = self.registered_sellers().await?;

        let mut report = MatchReport {
            user_id,
            username: user.username.clone(),
            wantlist_count: wantlist.len(),
            sellers_checked: 0,
            registered_sellers: registered.clone(),
            sellers: Vec::new(),
            retry_after_seconds: None,
        };

        if wantlist.is_empty() {
            info!("User {} has an empty wantlist", user_id);
            return Ok(report);
        }

        for seller_name in &registered {
            let seller = match self
                .sync
                .get_current_snapshot(seller_name, user_id, &creds, bypass_cache)
                .await
            {
                Ok(outcome) => seller_matches(seller_name, &wantlist, &outcome),
                Err(e) => {
                    warn!("Skipping seller {} for user {}: {}", seller_name, user_id, e);
                    if let Some(wait) = e.retry_after() {
                        report.retry_after_seconds = report.retry_after_seconds.max(Some(wait));
                    }
                    let provenance = self.sync.load_metadata(seller_name).await;
                    failed_seller(seller_name, provenance.as_ref(), &e)
                }
            };
            report.sellers_checked += 1;
            report.sellers.push(seller);
        }

        info!(
            "🎯 {} matches for user {} across {} sellers",
            report.total_matches(),
            user_id,
            report.sellers_checked
        );

        if !report.is_partial() {
            self.cache
                .set_json(&memo_key, &report, self.config.matches_ttl_secs)
                .await;
        }
        Ok(report)
    }

    // ========================================
    // Wantlist
    // ========================================

    async fn load_wantlist(
        &self,
        user: &UserAccount,
        creds: &CatalogCredentials,
        bypass_cache: bool,
    ) -> Result<Vec<WantlistItem>, SyncError> {
        let key = keys::wantlist(user.id);
        if !bypass_cache {
            if let Some(wants) = self.cache.get_json::<Vec<WantlistItem>>(&key).await {
                return Ok(wants);
            }
        }

        let wants = self
            .sync
            .client()
            .fetch_wantlist(user.catalog_username(), creds)
            .await
            .map_err(|e| match e {
                SyncError::RateLimitExceeded { .. } => e,
                other => SyncError::WantlistUnavailable(other.to_string()),
            })?;

        self.cache
            .set_json(&key, &wants, self.config.wantlist_ttl_secs)
            .await;
        info!("Mirrored {} wantlist items for user {}", wants.len(), user.id);
        Ok(wants)
    }

    /// Re-fetches and re-caches a user's want-list.
    pub async fn refresh_wantlist(&self, user_id: i64) -> Result<usize, SyncError> {
        let (user, creds) = self.user_credentials(user_id).await?;
        Ok(self.load_wantlist(&user, &creds, true).await?.len())
    }

    // ========================================
    // Sellers
    // ========================================

    pub async fn registered_sellers(&self) -> Result<Vec<String>, SyncError> {
        if let Some(sellers) = self
            .cache
            .get_json::<Vec<String>>(keys::REGISTERED_SELLERS)
            .await
        {
            return Ok(sellers);
        }

        let sellers = db::registered_seller_names(&self.db)
            .await
            .map_err(database_error)?;
        self.cache
            .set_json(keys::REGISTERED_SELLERS, &sellers, self.config.sellers_ttl_secs)
            .await;
        debug!("Found {} registered sellers", sellers.len());
        Ok(sellers)
    }

    pub async fn active_sellers(&self) -> Result<Vec<String>, SyncError> {
        db::active_seller_names(&self.db).await.map_err(database_error)
    }

    /// `force` always full-fetches, otherwise refresh-if-stale.
    pub async fn refresh_seller(
        &self,
        seller_name: &str,
        user_id: i64,
        force: bool,
    ) -> Result<SyncOutcome, SyncError> {
        let (_, creds) = self.user_credentials(user_id).await?;
        if force {
            self.sync.force_refresh(seller_name, user_id, &creds).await
        } else {
            self.sync.background_refresh(seller_name, user_id, &creds).await
        }
    }

    pub async fn reconcile_seller(
        &self,
        seller_name: &str,
        user_id: i64,
    ) -> Result<ReconcileOutcome, SyncError> {
        let (_, creds) = self.user_credentials(user_id).await?;
        self.sync.reconcile_seller(seller_name, user_id, &creds).await
    }

    pub async fn seller_metadata(&self, seller_name: &str) -> Result<SellerSyncMetadata, SyncError> {
        self.sync
            .load_metadata(seller_name)
            .await
            .ok_or_else(|| SyncError::NotFound(format!("no sync metadata for seller {}", seller_name)))
    }

    pub async fn fetch_item_detail(
        &self,
        user_id: i64,
        item_id: &str,
    ) -> Result<CatalogItem, SyncError> {
        let (_, creds) = self.user_credentials(user_id).await?;
        self.sync.client().fetch_item_detail(item_id, &creds).await
    }

    // ========================================
    // Users
    // ========================================

    pub async fn user_credentials(
        &self,
        user_id: i64,
    ) -> Result<(UserAccount, CatalogCredentials), SyncError> {
        let user = db::find_user(&self.db, user_id)
            .await
            .map_err(database_error)?
            .ok_or_else(|| SyncError::NotFound(format!("user {}", user_id)))?;
        let creds = user
            .credentials()
            .ok_or(SyncError::CredentialsMissing { user_id })?;
        Ok((user, creds))
    }
}

fn seller_matches(seller_name: &str, wantlist: &[WantlistItem], outcome: &SyncOutcome) -> SellerMatches {
    let matches = find_matches(wantlist, &outcome.snapshot.items);
    SellerMatches {
        seller_name: seller_name.to_string(),
        total_matches: matches.len(),
        inventory_count: outcome.snapshot.items.len(),
        matches,
        cache_info: outcome.cache_info(),
        error: None,
    }
}

fn failed_seller(
    seller_name: &str,
    provenance: Option<&SellerSyncMetadata>,
    error: &SyncError,
) -> SellerMatches {
    SellerMatches {
        seller_name: seller_name.to_string(),
        total_matches: 0,
        inventory_count: 0,
        matches: Vec::new(),
        cache_info: CacheInfo {
            is_cached: false,
            is_large_seller: provenance.map(|m| m.is_large_seller).unwrap_or(false),
            last_updated: provenance.map(|m| m.last_updated),
        },
        error: Some(error.to_string()),
    }
}

fn database_error(e: anyhow::Error) -> SyncError {
    SyncError::Database(e.to_string())
}
