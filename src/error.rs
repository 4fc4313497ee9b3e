//! Error Types
//! 同期エンジン全体で使うエラー分類

use thiserror::Error;

/// Errors surfaced by the synchronization and matching engine.
///
/// `Clone` so that a single in-flight match computation can hand the same
/// result to every caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// The local limiter refused the call. Never retried internally.
    #[error("rate limit exceeded, retry after {retry_after_seconds}s")]
    RateLimitExceeded { retry_after_seconds: u64 },

    /// Non-2xx, timed out or malformed response from the catalog API.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// The requested page lies beyond the upstream pagination ceiling.
    #[error("seller {seller_name} is unobservable ({total_pages} pages)")]
    Unobservable { seller_name: String, total_pages: u32 },

    /// The requesting user has no usable remote-API credentials.
    #[error("no catalog credentials for user {user_id}")]
    CredentialsMissing { user_id: i64 },

    /// The requesting user's own want-list could not be loaded.
    #[error("wantlist unavailable: {0}")]
    WantlistUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),
}

impl SyncError {
    /// Seconds the caller should wait before retrying, if any.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            SyncError::RateLimitExceeded { retry_after_seconds } => Some(*retry_after_seconds),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SyncError::Upstream(format!("request timed out: {}", e))
        } else {
            SyncError::Upstream(e.to_string())
        }
    }
}

/// Failures of the external key-value store. Never escapes `CacheService`.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
