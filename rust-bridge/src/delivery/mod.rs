pub mod backoff;
pub mod client;
pub mod headers;
pub mod signature;

pub use backoff::{backoff_delay, Sleeper, TokioSleeper};
pub use client::{AttemptFailure, DeliveryClient, DeliveryError, DeliveryReceipt};
pub use headers::{build_headers, BRIDGE_USER_AGENT, CORRELATION_HEADER};
pub use signature::{sign_payload, verify_signature, SIGNATURE_HEADER};
