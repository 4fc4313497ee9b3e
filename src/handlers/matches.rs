//! Matches API Handler
//! /api/users/:user_id/matches エンドポイント

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::{sync_error_response, ApiError};
use crate::models::MatchReport;
use crate::AppState;

#[derive(Serialize)]
pub struct MatchesResponse {
    pub success: bool,
    pub total_matches: usize,
    #[serde(flatten)]
    pub report: MatchReport,
}

#[derive(Debug, Default, Deserialize)]
pub struct MatchesQuery {
    #[serde(default)]
    pub bypass_cache: bool,
}

/// GET /api/users/:user_id/matches - ウォントリスト一致の取得
pub async fn get_matches(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    Query(query): Query<MatchesQuery>,
) -> Result<Json<MatchesResponse>, ApiError> {
    info!("📥 Matches requested for user {} (bypass={})", user_id, query.bypass_cache);

    let report = state
        .service
        .get_matches_for_user(user_id, query.bypass_cache)
        .await
        .map_err(sync_error_response)?;

    Ok(Json(MatchesResponse {
        success: true,
        total_matches: report.total_matches(),
        report,
    }))
}
