//! Message types and the outbound webhook payload.
//!
//! The payload is signed over its exact serialized bytes, so it is always
//! serialized canonically: object keys sorted at every level, no whitespace.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event type carried by every outbound payload.
pub const EMAIL_RECEIVED: &str = "email_received";

/// Metadata of one inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: String,
    pub timestamp: String,
    pub from_address: String,
    /// Recipients in the order the event listed them
    pub to_addresses: Vec<String>,
    pub subject: String,
    /// Correlates every log line of one invocation
    pub correlation_id: String,
}

/// Extracted message bodies. Either may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub text: String,
    pub html: String,
}

/// JSON body of a webhook call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundPayload {
    pub event_type: String,
    pub metadata: InboundMessage,
    pub content: MessageBody,
}

impl MessageBody {
    pub fn new(text: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            html: html.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.html.is_empty()
    }
}

impl OutboundPayload {
    /// Payload for a received email.
    pub fn email_received(metadata: InboundMessage, content: MessageBody) -> Self {
        Self {
            event_type: EMAIL_RECEIVED.to_string(),
            metadata,
            content,
        }
    }

    /// Canonical JSON bytes: the exact bytes that are sent and signed.
    pub fn to_canonical_json(&self) -> serde_json::Result<Vec<u8>> {
        let value = serde_json::to_value(self)?;
        serde_json::to_vec(&sort_keys(value))
    }
}

/// Rebuild every object with its keys in sorted order.
///
/// `serde_json::Map` is only sorted when no crate in the build enables
/// `preserve_order`, so ordering is made explicit here.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key, sort_keys(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
