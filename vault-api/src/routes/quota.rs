//! Quota endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use vault_core::ledger::QuotaLedger;

use crate::dto::QuotaResponse;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Get a subject's quota state
pub async fn get_quota(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> ApiResult<Json<QuotaResponse>> {
    let quota = state
        .services
        .quota
        .get_quota(&subject_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No quota state for subject {}", subject_id)))?;
    Ok(Json(QuotaResponse::from(&quota)))
}
