//! SES event ingestion: from a receipt event to a delivered webhook.
//!
//! ## Flow
//!
//! ```text
//! SES record → InboundMessage → ConfigStore::is_allowed() → raw body (S3) → MIME parse → DeliveryClient
//! ```
//!
//! Records are processed one at a time. The first record that fails aborts the
//! batch; a record rejected by routing policy does not.

pub mod content;
pub mod email_parser;
pub mod event;

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::delivery::{DeliveryClient, DeliveryError};
use crate::payload::OutboundPayload;
use crate::routing::{ConfigStore, ObjectStoreSource, RoutingSource, SystemClock};
use crate::storage::{ObjectStore, S3ObjectStore};

pub use content::{retrieve_content, ContentStatus, RetrievedContent, TOO_LARGE_SENTINEL};
pub use email_parser::parse_raw_email;
pub use event::{EventRecord, SesEvent, SesNotification, SES_EVENT_SOURCE};

/// Why a record could not be processed.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed SES record: {0}")]
    MalformedEvent(#[from] serde_json::Error),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// A record failure, tagged with the invocation's correlation id.
#[derive(Debug, Error)]
#[error("Failed to process email {}: {source}", .message_id.as_deref().unwrap_or("<unknown>"))]
pub struct ProcessingError {
    pub correlation_id: String,
    pub message_id: Option<String>,
    #[source]
    pub source: IngestError,
}

/// Result of one record that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Delivered to the webhook of `domain`
    Delivered {
        message_id: String,
        domain: String,
        status: u16,
        attempts: u32,
        content: ContentStatus,
    },
    /// No route accepted the message
    Rejected { message_id: String },
    /// Not an SES record
    Skipped { event_source: String },
}

/// Invocation result in the Lambda proxy shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    /// JSON-encoded message or error, with the correlation id
    pub body: String,
}

/// Turns SES receipt events into webhook deliveries.
pub struct EmailIngestPipeline {
    config_store: Arc<ConfigStore>,
    store: Arc<dyn ObjectStore>,
    delivery: DeliveryClient,
    default_bucket: String,
}

impl EmailIngestPipeline {
    pub fn new(
        config_store: Arc<ConfigStore>,
        store: Arc<dyn ObjectStore>,
        delivery: DeliveryClient,
        default_bucket: impl Into<String>,
    ) -> Self {
        Self {
            config_store,
            store,
            delivery,
            default_bucket: default_bucket.into(),
        }
    }

    /// Production wiring: S3 storage, S3 routing document, pooled HTTP client.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::from_env().await);

        let source = config.routing_document_location().map(|location| {
            let source: Arc<dyn RoutingSource> =
                Arc::new(ObjectStoreSource::new(Arc::clone(&store), location));
            source
        });

        let config_store = Arc::new(ConfigStore::new(
            source,
            config.legacy_settings(),
            config.config_cache_ttl,
            Arc::new(SystemClock),
        ));

        Ok(Self::new(
            config_store,
            store,
            DeliveryClient::from_defaults()?,
            config.s3_bucket.clone(),
        ))
    }

    /// Process one record.
    pub async fn process_record(
        &self,
        record: &EventRecord,
        correlation_id: &str,
    ) -> Result<ProcessOutcome, ProcessingError> {
        if !record.is_ses() {
            info!(
                correlation_id = %correlation_id,
                event_source = %record.event_source,
                "record_skipped"
            );
            return Ok(ProcessOutcome::Skipped {
                event_source: record.event_source.clone(),
            });
        }

        let notification = record.notification().map_err(|e| {
            error!(correlation_id = %correlation_id, error = %e, "record_malformed");
            ProcessingError {
                correlation_id: correlation_id.to_string(),
                message_id: None,
                source: IngestError::MalformedEvent(e),
            }
        })?;

        let message = notification.to_message(correlation_id);
        info!(
            correlation_id = %correlation_id,
            message_id = %message.message_id,
            from = %message.from_address,
            to = ?message.to_addresses,
            "email_processing_start"
        );

        let Some(route) = self.config_store.is_allowed(&message).await else {
            warn!(
                correlation_id = %correlation_id,
                message_id = %message.message_id,
                from = %message.from_address,
                to = ?message.to_addresses,
                "email_rejected"
            );
            return Ok(ProcessOutcome::Rejected {
                message_id: message.message_id,
            });
        };

        let location = notification.storage_location(&self.default_bucket);
        let retrieved = retrieve_content(
            self.store.as_ref(),
            &location,
            route.filters.max_size_bytes(),
            correlation_id,
        )
        .await;

        info!(
            correlation_id = %correlation_id,
            domain = %route.domain,
            payload_format = %route.payload_format,
            content_status = ?retrieved.status,
            "webhook_payload_ready"
        );

        let message_id = message.message_id.clone();
        let payload = OutboundPayload::email_received(message, retrieved.body);

        let receipt = self.delivery.deliver(&payload, &route).await.map_err(|e| {
            error!(
                correlation_id = %correlation_id,
                message_id = %message_id,
                error = %e,
                "email_delivery_failed"
            );
            ProcessingError {
                correlation_id: correlation_id.to_string(),
                message_id: Some(message_id.clone()),
                source: e.into(),
            }
        })?;

        Ok(ProcessOutcome::Delivered {
            message_id,
            domain: route.domain,
            status: receipt.status,
            attempts: receipt.attempts,
            content: retrieved.status,
        })
    }

    /// Process records in order, stopping at the first failure.
    pub async fn process_batch(
        &self,
        event: &SesEvent,
        correlation_id: &str,
    ) -> Result<Vec<ProcessOutcome>, ProcessingError> {
        let mut outcomes = Vec::with_capacity(event.records.len());
        for record in &event.records {
            outcomes.push(self.process_record(record, correlation_id).await?);
        }
        Ok(outcomes)
    }

    /// Handle one invocation under a fresh correlation id.
    pub async fn handle_event(&self, event: &SesEvent) -> InvocationResponse {
        let correlation_id = Uuid::new_v4().to_string();
        info!(
            correlation_id = %correlation_id,
            event_records_count = event.records.len(),
            "event_processing_start"
        );

        match self.process_batch(event, &correlation_id).await {
            Ok(outcomes) => {
                info!(
                    correlation_id = %correlation_id,
                    records = outcomes.len(),
                    "event_processing_complete"
                );
                InvocationResponse {
                    status_code: 200,
                    body: json!({
                        "message": "Email processed successfully",
                        "correlation_id": correlation_id,
                    })
                    .to_string(),
                }
            }
            Err(e) => {
                error!(
                    correlation_id = %correlation_id,
                    error = %e,
                    "event_processing_failed"
                );
                InvocationResponse {
                    status_code: 500,
                    body: json!({
                        "error": e.to_string(),
                        "correlation_id": correlation_id,
                    })
                    .to_string(),
                }
            }
        }
    }
}
