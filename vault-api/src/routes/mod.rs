//! API route handlers

pub mod attempt;
pub mod billing;
pub mod health;
pub mod quota;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))
        // Access attempts
        .route(
            "/access-attempts",
            post(attempt::create_attempt)
                .get(attempt::list_attempts)
                .delete(attempt::delete_attempts),
        )
        .route(
            "/access-attempts/:attempt_id",
            get(attempt::get_attempt)
                .patch(attempt::update_attempt)
                .delete(attempt::delete_attempt),
        )
        .route("/access-attempts/:attempt_id/history", get(attempt::get_history))
        // Quotas
        .route("/quotas/:subject_id", get(quota::get_quota))
        // Billing events
        .route("/billing-events", post(billing::ingest_event).get(billing::list_events))
        .route("/billing-events/:event_id", get(billing::get_event))
        .route("/billing-events/:event_id/redrive", post(billing::redrive_event))
        // State
        .with_state(state)
}
