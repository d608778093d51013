//! Access attempt endpoints

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::net::SocketAddr;
use vault_core::ledger::{AccessLedger, QueryOptions};

use crate::context::request_context;
use crate::dto::{
    AttemptResponse, CreateAttemptBody, ListAttemptsQuery, PaginatedResponse, TransitionBody,
    TransitionEventResponse,
};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const API_ACTOR: &str = "api";

/// Open a new attempt
pub async fn create_attempt(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<CreateAttemptBody>,
) -> ApiResult<(StatusCode, Json<AttemptResponse>)> {
    let ctx = request_context(&headers, peer.as_ref(), &body.subject_id);
    let attempt = state.services.access.create_attempt(&ctx, body.into()).await?;
    Ok((StatusCode::CREATED, Json(AttemptResponse::from(&attempt))))
}

/// Apply a status transition and outcome fields
pub async fn update_attempt(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<TransitionBody>,
) -> ApiResult<Json<AttemptResponse>> {
    let ctx = request_context(&headers, peer.as_ref(), API_ACTOR);
    let attempt = state
        .services
        .access
        .transition(&ctx, &attempt_id, body.into())
        .await?;
    Ok(Json(AttemptResponse::from(&attempt)))
}

/// Get attempt by caller-facing id
pub async fn get_attempt(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
) -> ApiResult<Json<AttemptResponse>> {
    let attempt = state
        .services
        .access
        .get_attempt(&attempt_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Attempt {} not found", attempt_id)))?;
    Ok(Json(AttemptResponse::from(&attempt)))
}

/// Transition log of an attempt
pub async fn get_history(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
) -> ApiResult<Json<Vec<TransitionEventResponse>>> {
    let history = state.services.access.history(&attempt_id).await?;
    Ok(Json(history.iter().map(Into::into).collect()))
}

/// List a subject's attempts, newest first
pub async fn list_attempts(
    State(state): State<AppState>,
    Query(params): Query<ListAttemptsQuery>,
) -> ApiResult<Json<PaginatedResponse<AttemptResponse>>> {
    if params.subject_id.trim().is_empty() {
        return Err(ApiError::BadRequest("subjectId is required".to_string()));
    }
    let options = QueryOptions {
        limit: params.limit,
        offset: params.offset,
    };
    let limit = options.effective_limit() as u32;
    let offset = options.effective_offset() as u32;

    let attempts = state
        .services
        .access
        .list_by_subject(&params.subject_id, options)
        .await?;

    Ok(Json(PaginatedResponse {
        total: attempts.len() as u64,
        items: attempts.iter().map(AttemptResponse::from).collect(),
        limit,
        offset,
    }))
}

/// Attempts are permanent
pub async fn delete_attempt(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let ctx = request_context(&headers, peer.as_ref(), API_ACTOR);
    state.services.access.delete_attempt(&ctx, &attempt_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Attempts are permanent
pub async fn delete_attempts(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let ctx = request_context(&headers, peer.as_ref(), API_ACTOR);
    state.services.access.delete_attempts(&ctx).await?;
    Ok(StatusCode::NO_CONTENT)
}
