//! Listings API Handlers
//! /api/listings エンドポイント（カタログ上の単一商品）

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{error_response, sync_error_response, ApiError};
use crate::models::CatalogItem;
use crate::AppState;

#[derive(Serialize)]
pub struct ListingDetailResponse {
    pub success: bool,
    pub listing: CatalogItem,
}

#[derive(Debug, Deserialize)]
pub struct ListingQuery {
    /// Whose credentials sign the upstream call.
    pub user_id: i64,
}

/// GET /api/listings/:listing_id - 商品詳細取得
pub async fn get_listing(
    State(state): State<Arc<AppState>>,
    Path(listing_id): Path<String>,
    Query(query): Query<ListingQuery>,
) -> Result<Json<ListingDetailResponse>, ApiError> {
    if listing_id.trim().is_empty() || !listing_id.chars().all(|c| c.is_ascii_digit()) {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            format!("Invalid listing id: {}", listing_id),
        ));
    }

    let listing = state
        .service
        .fetch_item_detail(query.user_id, &listing_id)
        .await
        .map_err(sync_error_response)?;

    Ok(Json(ListingDetailResponse {
        success: true,
        listing,
    }))
}
