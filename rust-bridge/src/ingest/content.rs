//! Raw message retrieval with a size ceiling.

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::email_parser::extract_content;
use crate::payload::MessageBody;
use crate::storage::{ObjectLocation, ObjectStore, StoredObject};

/// Text sent in place of a message over the size limit.
pub const TOO_LARGE_SENTINEL: &str = "Email too large to process";

/// How the delivered content was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    /// Parsed from the stored message
    Processed,
    /// Over the size limit; the sentinel text was used
    NotProcessed,
    /// Could not be read from storage; bodies are empty
    Unavailable,
}

/// Extracted bodies and how they were obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievedContent {
    pub body: MessageBody,
    pub status: ContentStatus,
}

/// Fetch and parse the message at `location`, reading at most `max_bytes`.
///
/// Never fails: storage errors yield empty bodies so the message metadata is
/// still delivered.
pub async fn retrieve_content(
    store: &dyn ObjectStore,
    location: &ObjectLocation,
    max_bytes: u64,
    correlation_id: &str,
) -> RetrievedContent {
    info!(
        correlation_id = %correlation_id,
        location = %location,
        max_bytes = max_bytes,
        "email_content_fetch_start"
    );

    match store.get_object(location, max_bytes).await {
        Ok(StoredObject::Body(raw)) => RetrievedContent {
            body: extract_content(&raw, correlation_id),
            status: ContentStatus::Processed,
        },
        Ok(StoredObject::TooLarge { size }) => {
            warn!(
                correlation_id = %correlation_id,
                location = %location,
                size = size,
                max_bytes = max_bytes,
                "email_content_too_large"
            );
            RetrievedContent {
                body: MessageBody::new(TOO_LARGE_SENTINEL, ""),
                status: ContentStatus::NotProcessed,
            }
        }
        Err(e) => {
            error!(
                correlation_id = %correlation_id,
                error = %e,
                "email_content_fetch_failed"
            );
            RetrievedContent {
                body: MessageBody::default(),
                status: ContentStatus::Unavailable,
            }
        }
    }
}
