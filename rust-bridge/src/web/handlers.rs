//! HTTP endpoint handlers.
//!
//! `POST /events` runs an SES receipt event through the pipeline and answers
//! with the invocation response; the HTTP status mirrors its `statusCode`.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use tracing::info;

use crate::ingest::{EmailIngestPipeline, SesEvent};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<EmailIngestPipeline>,
}

impl AppState {
    pub fn new(pipeline: EmailIngestPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// SES Events
// =============================================================================

/// Process an SES event batch.
pub async fn ses_events(
    State(state): State<AppState>,
    Json(event): Json<SesEvent>,
) -> impl IntoResponse {
    info!(records = event.records.len(), "ses_event_received");

    let response = state.pipeline.handle_event(&event).await;
    let status = StatusCode::from_u16(response.status_code)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    (status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::response::Response;
    use serde_json::{json, Value};

    use crate::delivery::DeliveryClient;
    use crate::ingest::InvocationResponse;
    use crate::routing::{ConfigStore, LegacySettings, SystemClock};
    use crate::storage::InMemoryObjectStore;

    fn state() -> AppState {
        let legacy = LegacySettings {
            domain_name: Some("company.org".to_string()),
            webhook_url: Some("http://127.0.0.1:1/hook".to_string()),
            max_retries: 1,
            timeout_seconds: 1,
            max_email_size_mb: 1,
            ..LegacySettings::default()
        };
        let config_store = Arc::new(ConfigStore::new(
            None,
            legacy,
            Duration::from_secs(300),
            Arc::new(SystemClock),
        ));

        AppState::new(EmailIngestPipeline::new(
            config_store,
            Arc::new(InMemoryObjectStore::new()),
            DeliveryClient::new(reqwest::Client::new()),
            "mail-bucket",
        ))
    }

    async fn invocation(response: Response) -> InvocationResponse {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let Json(body) = health().await;
        assert_eq!(body.status, "ok");
    }

    #[tokio::test]
    async fn test_events_without_ses_records() {
        let event: SesEvent =
            serde_json::from_value(json!({ "Records": [{ "eventSource": "aws:sqs" }] })).unwrap();

        let response = ses_events(State(state()), Json(event)).await.into_response();

        assert_eq!(response.status(), StatusCode::OK);
        let invocation = invocation(response).await;
        assert_eq!(invocation.status_code, 200);
        let body: Value = serde_json::from_str(&invocation.body).unwrap();
        assert_eq!(body["message"], "Email processed successfully");
    }

    #[tokio::test]
    async fn test_events_rejected_recipient_is_ok() {
        let event: SesEvent = serde_json::from_value(json!({
            "Records": [{
                "eventSource": "aws:ses",
                "ses": {
                    "mail": {
                        "messageId": "m1",
                        "timestamp": "2024-01-15T10:00:00.000Z",
                        "source": "user@example.com",
                        "destination": ["someone@elsewhere.net"]
                    }
                }
            }]
        }))
        .unwrap();

        let response = ses_events(State(state()), Json(event)).await.into_response();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_events_malformed_record_is_500() {
        let event: SesEvent = serde_json::from_value(json!({
            "Records": [{ "eventSource": "aws:ses", "ses": {} }]
        }))
        .unwrap();

        let response = ses_events(State(state()), Json(event)).await.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let invocation = invocation(response).await;
        let body: Value = serde_json::from_str(&invocation.body).unwrap();
        assert!(body["error"].is_string());
        assert!(body["correlation_id"].is_string());
    }
}
