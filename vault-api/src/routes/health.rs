//! Health check endpoints

use axum::{extract::State, Json};

use crate::dto::HealthResponse;
use crate::error::ApiResult;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        stats: None,
    }))
}

/// Ready check endpoint (verifies storage is readable)
pub async fn ready_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let (status, stats) = match state.services.store.get_stats().await {
        Ok(stats) => ("ready", Some(stats)),
        Err(e) => {
            tracing::warn!(error = %e, "Storage stats unavailable");
            ("degraded", None)
        }
    };

    Ok(Json(HealthResponse {
        status: status.to_string(),
        version: state.version.clone(),
        stats,
    }))
}
