//! SES receipt event types.
//!
//! Field names match the SES event JSON. Only the fields the bridge reads are
//! modelled; everything else is ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::payload::InboundMessage;
use crate::storage::ObjectLocation;

/// Event source of records the bridge handles.
pub const SES_EVENT_SOURCE: &str = "aws:ses";

/// Key prefix used when the receipt names no S3 action.
pub const DEFAULT_KEY_PREFIX: &str = "emails/";

/// Batch of records delivered in one invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SesEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<EventRecord>,
}

/// One record. `ses` stays untyped until the record is known to be SES.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "eventSource", default)]
    pub event_source: String,
    #[serde(default)]
    pub ses: Option<Value>,
}

/// The `ses` object of a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SesNotification {
    pub mail: SesMail,
    #[serde(default)]
    pub receipt: Option<SesReceipt>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SesMail {
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub timestamp: String,
    pub source: String,
    pub destination: Vec<String>,
    #[serde(rename = "commonHeaders", default)]
    pub common_headers: CommonHeaders,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommonHeaders {
    #[serde(default)]
    pub subject: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SesReceipt {
    #[serde(default)]
    pub action: Option<ReceiptActions>,
}

/// `receipt.action` is a single object or a list of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReceiptActions {
    Single(ReceiptAction),
    Multiple(Vec<ReceiptAction>),
    Other(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptAction {
    #[serde(rename = "type", default)]
    pub action_type: String,
    #[serde(rename = "bucketName", default)]
    pub bucket_name: Option<String>,
    #[serde(rename = "objectKey", default)]
    pub object_key: Option<String>,
}

impl EventRecord {
    pub fn is_ses(&self) -> bool {
        self.event_source == SES_EVENT_SOURCE
    }

    /// Parse the `ses` object.
    pub fn notification(&self) -> Result<SesNotification, serde_json::Error> {
        match &self.ses {
            Some(value) => SesNotification::deserialize(value),
            None => SesNotification::deserialize(&Value::Null),
        }
    }
}

impl SesNotification {
    /// Message metadata tagged with the invocation's correlation id.
    pub fn to_message(&self, correlation_id: &str) -> InboundMessage {
        InboundMessage {
            message_id: self.mail.message_id.clone(),
            timestamp: self.mail.timestamp.clone(),
            from_address: self.mail.source.clone(),
            to_addresses: self.mail.destination.clone(),
            subject: self.mail.common_headers.subject.clone().unwrap_or_default(),
            correlation_id: correlation_id.to_string(),
        }
    }

    /// Where the raw message is stored.
    ///
    /// The first S3 receipt action with a bucket and key wins; without one
    /// the message is expected at `emails/<message-id>` in `default_bucket`.
    pub fn storage_location(&self, default_bucket: &str) -> ObjectLocation {
        self.s3_action_location().unwrap_or_else(|| {
            ObjectLocation::new(
                default_bucket,
                format!("{}{}", DEFAULT_KEY_PREFIX, self.mail.message_id),
            )
        })
    }

    fn s3_action_location(&self) -> Option<ObjectLocation> {
        let actions = self.receipt.as_ref()?.action.as_ref()?;
        let candidates: &[ReceiptAction] = match actions {
            ReceiptActions::Single(action) => std::slice::from_ref(action),
            ReceiptActions::Multiple(list) => list,
            ReceiptActions::Other(_) => return None,
        };

        candidates
            .iter()
            .filter(|a| a.action_type.eq_ignore_ascii_case("s3"))
            .find_map(|a| match (&a.bucket_name, &a.object_key) {
                (Some(bucket), Some(key)) => Some(ObjectLocation::new(bucket, key)),
                _ => None,
            })
    }
}
