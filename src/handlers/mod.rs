//! HTTP Handlers
//! 同期エンジンの操作を JSON API として公開

pub mod listings;
pub mod matches;
pub mod sellers;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

use crate::error::SyncError;
use crate::AppState;

// ========================================
// Shared response types
// ========================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// ヘルスチェック
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "seller-sync-server".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ========================================
// Router
// ========================================

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/users/:user_id/matches", get(matches::get_matches))
        .route("/api/sellers/:seller_name/refresh", post(sellers::refresh_seller))
        .route("/api/sellers/:seller_name/reconcile", post(sellers::reconcile_seller))
        .route("/api/sellers/:seller_name/metadata", get(sellers::get_metadata))
        .route("/api/listings/:listing_id", get(listings::get_listing))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ========================================
// エラーレスポンスヘルパー
// ========================================

pub fn error_response(status: StatusCode, message: String) -> ApiError {
    warn!("API Error: {}", message);
    (
        status,
        Json(ErrorResponse {
            success: false,
            error: message,
            retry_after_seconds: None,
        }),
    )
}

pub fn sync_error_response(e: SyncError) -> ApiError {
    let status = match &e {
        SyncError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        SyncError::CredentialsMissing { .. } => StatusCode::UNAUTHORIZED,
        SyncError::Upstream(_) | SyncError::WantlistUnavailable(_) | SyncError::Unobservable { .. } => {
            StatusCode::BAD_GATEWAY
        }
        SyncError::NotFound(_) => StatusCode::NOT_FOUND,
        SyncError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let retry_after = e.retry_after();
    let (status, Json(mut body)) = error_response(status, e.to_string());
    body.retry_after_seconds = retry_after;
    (status, Json(body))
}
