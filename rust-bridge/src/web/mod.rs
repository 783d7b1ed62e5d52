//! HTTP entry point for SES events.
//!
//! - `POST /events`: process an SES receipt event batch
//! - `GET /health`: liveness

pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{health, ses_events, AppState, HealthResponse};

/// Router with all endpoints and request tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events", post(ses_events))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
