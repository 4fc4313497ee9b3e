//! Cache Module
//! 外部 KV ストア（Redis）と、障害時に黙って縮退するラッパー

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::CacheError;

// ========================================
// Key scheme
// ========================================

pub mod keys {
    pub const REGISTERED_SELLERS: &str = "registered_sellers";
    pub const MATCHES_PATTERN: &str = "wantlist_matches_full:*";

    pub fn inventory(seller_name: &str, user_id: i64) -> String {
        format!("seller_inventory:{}:{}", seller_name, user_id)
    }

    pub fn metadata(seller_name: &str) -> String {
        format!("seller_metadata:{}", seller_name)
    }

    pub fn matches(user_id: i64) -> String {
        format!("wantlist_matches_full:{}", user_id)
    }

    pub fn wantlist(user_id: i64) -> String {
        format!("wantlist:{}", user_id)
    }
}

// ========================================
// Store trait
// ========================================

/// One whole-value write.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    pub ttl_secs: u64,
}

/// TTL-keyed string store with atomic per-key get/set.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Writes every entry or none of them.
    async fn set_all(&self, entries: Vec<CacheEntry>) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Deletes keys matching a glob (`*`, `?`). Returns the number removed.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError>;
}

// ========================================
// Redis
// ========================================

pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connects and pings once so a dead server fails here, not on first use.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let mut conn = ConnectionManager::new(client).await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value = redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<String>>(&mut conn)
            .await?;
        Ok(value)
    }

    async fn set_all(&self, entries: Vec<CacheEntry>) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for entry in &entries {
            pipe.cmd("SET")
                .arg(&entry.key)
                .arg(&entry.value)
                .arg("EX")
                .arg(entry.ttl_secs.max(1))
                .ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL").arg(key).query_async::<_, i64>(&mut conn).await?;
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(pattern)
            .query_async(&mut conn)
            .await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let removed: u64 = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
        Ok(removed)
    }
}

// ========================================
// In-process store
// ========================================

/// Single-process store, used for `memory://` deployments and tests.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set_all(&self, new_entries: Vec<CacheEntry>) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        for entry in new_entries {
            let expires_at = now + Duration::from_secs(entry.ttl_secs.max(1));
            entries.insert(entry.key, (entry.value, expires_at));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|key, _| !glob_match(pattern, key));
        Ok((before - entries.len()) as u64)
    }
}

/// Redis-style glob supporting `*` and `?`.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

// ========================================
// Failure-tolerant wrapper
// ========================================

/// Every read and write is optional: store failures are logged and the
/// engine carries on as if nothing was cached.
#[derive(Clone, Default)]
pub struct CacheService {
    store: Option<Arc<dyn CacheStore>>,
}

impl CacheService {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store: Some(store) }
    }

    /// No backing store: always-miss, writes dropped.
    pub fn disabled() -> Self {
        Self { store: None }
    }

    /// Builds the store named by `REDIS_URL`. The caller decides whether a
    /// failure here should fall back to [`CacheService::disabled`].
    pub async fn connect(url: Option<&str>) -> Result<Self, CacheError> {
        match url {
            None => {
                info!("Cache disabled (no REDIS_URL)");
                Ok(Self::disabled())
            }
            Some(url) if url.starts_with("memory://") => {
                info!("Using in-process cache");
                Ok(Self::new(Arc::new(MemoryCache::new())))
            }
            Some(url) => {
                info!("Connecting to Redis at {}", url);
                let store = RedisCache::connect(url).await?;
                info!("✅ Redis connected");
                Ok(Self::new(Arc::new(store)))
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub async fn get_raw(&self, key: &str) -> Option<String> {
        let store = self.store.as_ref()?;
        match store.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Cache get error for {}: {}", key, e);
                None
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!("Cache HIT: {}", key);
                Some(value)
            }
            Err(e) => {
                warn!("Discarding undecodable cache value for {}: {}", key, e);
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> bool {
        self.set_entries(&[(key, to_json(value), ttl_secs)]).await
    }

    /// Writes several serialized values in one atomic step.
    pub async fn set_entries(&self, entries: &[(&str, Option<String>, u64)]) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };
        let mut batch = Vec::with_capacity(entries.len());
        for (key, value, ttl_secs) in entries {
            let Some(value) = value else {
                warn!("Skipping cache write for {}: value not serializable", key);
                return false;
            };
            batch.push(CacheEntry {
                key: key.to_string(),
                value: value.clone(),
                ttl_secs: *ttl_secs,
            });
        }
        match store.set_all(batch).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Cache set error: {}", e);
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };
        match store.delete(key).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Cache delete error for {}: {}", key, e);
                false
            }
        }
    }

    pub async fn delete_pattern(&self, pattern: &str) -> u64 {
        let Some(store) = self.store.as_ref() else {
            return 0;
        };
        match store.delete_pattern(pattern).await {
            Ok(n) => n,
            Err(e) => {
                warn!("Cache invalidation error for {}: {}", pattern, e);
                0
            }
        }
    }
}

/// Serializes for [`CacheService::set_entries`].
pub fn to_json<T: Serialize>(value: &T) -> Option<String> {
    serde_json::to_string(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_redis_style_patterns() {
        assert!(glob_match("wantlist_matches_full:*", "wantlist_matches_full:42"));
        assert!(glob_match("seller_?etadata:*", "seller_metadata:acme"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("wantlist_matches_full:*", "wantlist:42"));
        assert!(!glob_match("a?c", "abbc"));
    }

    #[tokio::test]
    async fn memory_cache_round_trips_and_deletes_by_pattern() {
        let cache = CacheService::new(Arc::new(MemoryCache::new()));
        assert!(cache.set_json(&keys::matches(1), &vec![1, 2, 3], 60).await);
        assert!(cache.set_json(&keys::matches(2), &vec![4], 60).await);
        assert!(cache.set_json(&keys::wantlist(1), &vec![5], 60).await);

        let first: Option<Vec<i32>> = cache.get_json(&keys::matches(1)).await;
        assert_eq!(first, Some(vec![1, 2, 3]));

        assert_eq!(cache.delete_pattern(keys::MATCHES_PATTERN).await, 2);
        assert!(cache.get_raw(&keys::matches(1)).await.is_none());
        assert!(cache.get_raw(&keys::wantlist(1)).await.is_some());
    }

    #[tokio::test]
    async fn disabled_cache_always_misses() {
        let cache = CacheService::disabled();
        assert!(!cache.set_json("k", &1, 60).await);
        assert!(cache.get_json::<i32>("k").await.is_none());
        assert_eq!(cache.delete_pattern("*").await, 0);
    }

    #[tokio::test]
    async fn undecodable_values_are_treated_as_misses() {
        let store = Arc::new(MemoryCache::new());
        store
            .set_all(vec![CacheEntry {
                key: "k".to_string(),
                value: "not json".to_string(),
                ttl_secs: 60,
            }])
            .await
            .unwrap();
        let cache = CacheService::new(store);
        assert!(cache.get_json::<Vec<i32>>("k").await.is_none());
    }
}
