//! Recipient routing: which webhook, if any, receives a message.
//!
//! ## Resolution Flow
//!
//! ```text
//! InboundMessage → ConfigStore::is_allowed() → recipient patterns → sender filters → ResolvedRoute
//! ```

pub mod filter;
pub mod pattern;
pub mod store;
pub mod types;

pub use filter::{evaluate, passes, FilterDecision};
pub use pattern::matches;
pub use store::{Clock, ConfigStore, LegacySettings, ObjectStoreSource, RoutingSource, SystemClock};
pub use types::{
    DomainRule, DomainRules, Filters, GlobalDefaults, ResolvedFilters, ResolvedRoute,
    RetryOverrides, RetryPolicy, RoutingDocument,
};
