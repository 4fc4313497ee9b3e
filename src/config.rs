//! Configuration
//! デフォルト値 + 環境変数による上書き

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Result};

// ========================================
// 設定
// ========================================

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_path: String,
    /// `redis://...` → Redis, `memory://` → in-process store, `None` → cache disabled
    pub redis_url: Option<String>,
    pub enable_background_jobs: bool,
    pub catalog: CatalogConfig,
    pub sync: SyncConfig,
}

/// Remote catalog API settings.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub base_url: String,
    pub user_agent: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub rate_limit_per_minute: u32,
    pub http_timeout: Duration,
    pub page_size: u32,
    /// Upstream refuses pages beyond this.
    pub page_ceiling: u32,
    /// Safety stop for any single walk.
    pub max_pages: u32,
    pub page_delay: Duration,
}

/// Cache freshness policy.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub regular_ttl_secs: i64,
    pub large_seller_ttl_secs: i64,
    pub snapshot_ttl_secs: u64,
    pub matches_ttl_secs: u64,
    pub wantlist_ttl_secs: u64,
    pub sellers_ttl_secs: u64,
    pub backfill_lookback_pages: u32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.discogs.com".to_string(),
            user_agent: "MutualOrder/1.0".to_string(),
            consumer_key: String::new(),
            consumer_secret: String::new(),
            rate_limit_per_minute: 25,
            http_timeout: Duration::from_secs(30),
            page_size: 100,
            page_ceiling: 100,
            max_pages: 200,
            page_delay: default_page_delay(25),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            regular_ttl_secs: 3600,
            large_seller_ttl_secs: 7200,
            snapshot_ttl_secs: 86400,
            matches_ttl_secs: 600,
            wantlist_ttl_secs: 1800,
            sellers_ttl_secs: 300,
            backfill_lookback_pages: 2,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            database_path: "data/mutual_order.db".to_string(),
            redis_url: None,
            enable_background_jobs: false,
            catalog: CatalogConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl AppConfig {
    /// `.env` を読み込んでから環境変数で上書き
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = Self::default();

        if let Ok(v) = env::var("BIND_ADDR") {
            config.bind_addr = v;
        }
        if let Ok(v) = env::var("DATABASE_PATH") {
            config.database_path = v;
        }
        config.redis_url = env::var("REDIS_URL").ok().filter(|v| !v.trim().is_empty());
        config.enable_background_jobs =
            parse_var("ENABLE_BACKGROUND_JOBS")?.unwrap_or(config.enable_background_jobs);

        let catalog = &mut config.catalog;
        if let Ok(v) = env::var("CATALOG_BASE_URL") {
            catalog.base_url = v.trim_end_matches('/').to_string();
        }
        if let Ok(v) = env::var("CATALOG_USER_AGENT") {
            catalog.user_agent = v;
        }
        if let Ok(v) = env::var("CATALOG_CONSUMER_KEY") {
            catalog.consumer_key = v;
        }
        if let Ok(v) = env::var("CATALOG_CONSUMER_SECRET") {
            catalog.consumer_secret = v;
        }
        if let Some(v) = parse_var("CATALOG_RATE_LIMIT_PER_MINUTE")? {
            catalog.rate_limit_per_minute = v;
        }
        if let Some(v) = parse_var("CATALOG_HTTP_TIMEOUT_SECS")? {
            catalog.http_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_var("CATALOG_PAGE_SIZE")? {
            catalog.page_size = v;
        }
        if let Some(v) = parse_var("CATALOG_PAGE_CEILING")? {
            catalog.page_ceiling = v;
        }
        if let Some(v) = parse_var("CATALOG_MAX_PAGES")? {
            catalog.max_pages = v;
        }
        // ページ間ディレイ: 未指定ならレート上限の逆数
        catalog.page_delay = match parse_var::<u64>("CATALOG_PAGE_DELAY_MS")? {
            Some(ms) => Duration::from_millis(ms),
            None => default_page_delay(catalog.rate_limit_per_minute),
        };

        let sync = &mut config.sync;
        if let Some(v) = parse_var("REGULAR_TTL_SECS")? {
            sync.regular_ttl_secs = v;
        }
        if let Some(v) = parse_var("LARGE_SELLER_TTL_SECS")? {
            sync.large_seller_ttl_secs = v;
        }
        if let Some(v) = parse_var("SNAPSHOT_TTL_SECS")? {
            sync.snapshot_ttl_secs = v;
        }
        if let Some(v) = parse_var("MATCHES_TTL_SECS")? {
            sync.matches_ttl_secs = v;
        }
        if let Some(v) = parse_var("WANTLIST_TTL_SECS")? {
            sync.wantlist_ttl_secs = v;
        }
        if let Some(v) = parse_var("SELLERS_TTL_SECS")? {
            sync.sellers_ttl_secs = v;
        }
        if let Some(v) = parse_var("BACKFILL_LOOKBACK_PAGES")? {
            sync.backfill_lookback_pages = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.catalog.rate_limit_per_minute == 0 {
            bail!("CATALOG_RATE_LIMIT_PER_MINUTE must be > 0");
        }
        if self.catalog.page_size == 0 {
            bail!("CATALOG_PAGE_SIZE must be > 0");
        }
        if self.catalog.page_ceiling == 0 {
            bail!("CATALOG_PAGE_CEILING must be > 0");
        }
        if self.sync.regular_ttl_secs < 0 || self.sync.large_seller_ttl_secs < 0 {
            bail!("TTL values must not be negative");
        }
        Ok(())
    }
}

fn default_page_delay(rate_limit_per_minute: u32) -> Duration {
    Duration::from_millis(60_000 / u64::from(rate_limit_per_minute.max(1)))
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => Ok(Some(v)),
            Err(_) => bail!("invalid value for {}: {:?}", name, raw),
        },
        Err(_) => Ok(None),
    }
}
