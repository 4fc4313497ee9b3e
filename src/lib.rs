//! Seller inventory synchronization and wantlist matching for group purchases.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod matching;
pub mod models;
pub mod rate_limit;
pub mod service;
pub mod sync;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::cache::CacheService;
use crate::catalog::{CatalogClient, HttpCatalogClient, PagingPolicy};
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::rate_limit::RateLimiter;
use crate::service::WantlistMatchingService;
use crate::sync::InventorySynchronizer;

/// Shared state handed to every handler and job.
pub struct AppState {
    pub db: DbPool,
    pub service: Arc<WantlistMatchingService>,
}

/// Builds every component once, in dependency order.
pub async fn build_state(config: &AppConfig) -> Result<Arc<AppState>> {
    let db = db::init_db(&config.database_path).await?;

    // キャッシュが使えなくても起動は続ける（常に全件取得モード）
    let cache = match CacheService::connect(config.redis_url.as_deref()).await {
        Ok(cache) => cache,
        Err(e) => {
            warn!("⚠️ Cache unavailable, running uncached: {}", e);
            CacheService::disabled()
        }
    };

    let api = HttpCatalogClient::new(&config.catalog)?;
    let limiter = Arc::new(RateLimiter::new(config.catalog.rate_limit_per_minute));
    let client = Arc::new(CatalogClient::new(
        Arc::new(api),
        limiter,
        PagingPolicy::from(&config.catalog),
    ));
    let sync = Arc::new(InventorySynchronizer::new(
        client,
        cache.clone(),
        config.sync.clone(),
    ));
    let service = Arc::new(WantlistMatchingService::new(
        db.clone(),
        sync,
        cache,
        config.sync.clone(),
    ));

    info!(
        "Catalog client ready ({} calls/min, {} per page)",
        config.catalog.rate_limit_per_minute, config.catalog.page_size
    );
    Ok(Arc::new(AppState { db, service }))
}
