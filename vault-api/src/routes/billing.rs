//! Billing webhook endpoints

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, Query, State},
    http::HeaderMap,
    Json,
};
use std::net::SocketAddr;
use vault_core::ledger::{BillingEventLedger, EventDelivery, QueryOptions};
use vault_core::types::EventStatus;

use crate::context::request_context;
use crate::dto::{EventResponse, IngestResponse, ListEventsQuery, PaginatedResponse};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const ADMIN_ACTOR: &str = "admin";

/// Receive a billing provider notification
///
/// The raw body is kept as received; the signature covers its exact bytes.
/// Handler failures are recorded on the event and still acknowledged.
pub async fn ingest_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<IngestResponse>> {
    let signature = headers
        .get(state.signature_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let outcome = state
        .services
        .billing
        .ingest(&EventDelivery::new(body.to_vec(), signature))
        .await?;

    Ok(Json(IngestResponse {
        received: true,
        duplicate: outcome.duplicate,
        event: EventResponse::from(&outcome.record),
    }))
}

/// Get event record by provider event id
pub async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> ApiResult<Json<EventResponse>> {
    let record = state
        .services
        .billing
        .get_event(&event_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Event {} not found", event_id)))?;
    Ok(Json(EventResponse::from(&record)))
}

/// List event records
pub async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<ListEventsQuery>,
) -> ApiResult<Json<PaginatedResponse<EventResponse>>> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<EventStatus>)
        .transpose()?;

    let options = QueryOptions {
        limit: params.limit,
        offset: params.offset,
    };
    let limit = options.effective_limit() as u32;
    let offset = options.effective_offset() as u32;

    let records = state.services.billing.list_events(status, options).await?;

    Ok(Json(PaginatedResponse {
        total: records.len() as u64,
        items: records.iter().map(EventResponse::from).collect(),
        limit,
        offset,
    }))
}

/// Re-apply a failed event
pub async fn redrive_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> ApiResult<Json<EventResponse>> {
    let ctx = request_context(&headers, peer.as_ref(), ADMIN_ACTOR);
    let record = state.services.billing.redrive(&ctx, &event_id).await?;
    Ok(Json(EventResponse::from(&record)))
}
