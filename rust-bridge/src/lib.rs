//! SES Webhook Bridge - forwards inbound email to per-domain webhooks.
//!
//! This library backs the two bridge binaries:
//! - `ses-bridge`: HTTP server accepting SES receipt events
//! - `ses-bridge-replay`: processes one event from a file or stdin
//!
//! ## Architecture
//!
//! ```text
//! SES event → ingest → routing (ConfigStore) → storage (raw MIME) → delivery (signed POST, retries)
//! ```

pub mod config;
pub mod delivery;
pub mod ingest;
pub mod payload;
pub mod routing;
pub mod storage;
pub mod web;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use delivery::{DeliveryClient, DeliveryError, DeliveryReceipt};
pub use ingest::{
    EmailIngestPipeline, InvocationResponse, IngestError, ProcessOutcome, ProcessingError,
};
pub use payload::{InboundMessage, MessageBody, OutboundPayload};
pub use routing::{ConfigStore, ResolvedRoute, RoutingDocument};
pub use storage::{InMemoryObjectStore, ObjectLocation, ObjectStore, S3ObjectStore};
