//! Sellers API Handlers
//! /api/sellers/:seller_name 以下（再同期・バックフィル・メタデータ）

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::{error_response, sync_error_response, ApiError};
use crate::models::{CatalogItem, SellerSyncMetadata};
use crate::sync::SyncPath;
use crate::AppState;

// ========================================
// Request / Response Types
// ========================================

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub user_id: i64,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReconcileRequest {
    pub user_id: i64,
}

#[derive(Serialize)]
pub struct RefreshResponse {
    pub success: bool,
    pub seller_name: String,
    pub path: SyncPath,
    pub item_count: usize,
    pub is_large_seller: bool,
    pub last_updated: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct ReconcileResponse {
    pub success: bool,
    pub seller_name: String,
    pub added: usize,
    pub total_items: u64,
    pub item_count: usize,
    pub sample: Vec<CatalogItem>,
}

#[derive(Serialize)]
pub struct MetadataResponse {
    pub success: bool,
    pub metadata: SellerSyncMetadata,
}

fn checked_seller(seller_name: String) -> Result<String, ApiError> {
    let trimmed = seller_name.trim();
    if trimmed.is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "seller_name is required".to_string()));
    }
    Ok(trimmed.to_string())
}

// ========================================
// Handlers
// ========================================

/// POST /api/sellers/:seller_name/refresh - 在庫の再同期（force なら全件取得）
pub async fn refresh_seller(
    State(state): State<Arc<AppState>>,
    Path(seller_name): Path<String>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let seller_name = checked_seller(seller_name)?;
    let outcome = state
        .service
        .refresh_seller(&seller_name, req.user_id, req.force)
        .await
        .map_err(sync_error_response)?;

    info!("Seller {} refreshed via {:?}", seller_name, outcome.path);
    Ok(Json(RefreshResponse {
        success: true,
        seller_name,
        path: outcome.path,
        item_count: outcome.metadata.item_count,
        is_large_seller: outcome.metadata.is_large_seller,
        last_updated: outcome.metadata.last_updated,
    }))
}

/// POST /api/sellers/:seller_name/reconcile - 末尾ページのバックフィル
pub async fn reconcile_seller(
    State(state): State<Arc<AppState>>,
    Path(seller_name): Path<String>,
    Json(req): Json<ReconcileRequest>,
) -> Result<Json<ReconcileResponse>, ApiError> {
    let seller_name = checked_seller(seller_name)?;
    let outcome = state
        .service
        .reconcile_seller(&seller_name, req.user_id)
        .await
        .map_err(sync_error_response)?;

    Ok(Json(ReconcileResponse {
        success: true,
        seller_name,
        added: outcome.added,
        total_items: outcome.total_items,
        item_count: outcome.metadata.item_count,
        sample: outcome.sample,
    }))
}

/// GET /api/sellers/:seller_name/metadata - 同期メタデータ
pub async fn get_metadata(
    State(state): State<Arc<AppState>>,
    Path(seller_name): Path<String>,
) -> Result<Json<MetadataResponse>, ApiError> {
    let seller_name = checked_seller(seller_name)?;
    let metadata = state
        .service
        .seller_metadata(&seller_name)
        .await
        .map_err(sync_error_response)?;

    Ok(Json(MetadataResponse {
        success: true,
        metadata,
    }))
}
