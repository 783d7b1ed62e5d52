//! Routing document loading, caching, and route resolution.
//!
//! The store owns a single cached `RoutingDocument`. It is fetched lazily on
//! first use and refreshed only once the cached copy is older than the TTL.
//! When the remote document cannot be fetched, or has no usable domains, a
//! single-rule document is synthesized from the legacy settings.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use tokio::sync::RwLock;
use tracing::{info, warn};
use url::Url;

use super::filter::evaluate;
use super::pattern::first_match;
use super::types::{
    DomainRule, DomainRules, Filters, GlobalDefaults, ResolvedRoute, RetryOverrides,
    RoutingDocument,
};
use crate::payload::InboundMessage;
use crate::storage::{ObjectLocation, ObjectStore, StoredObject};

/// Largest routing document the store will read.
const MAX_DOCUMENT_BYTES: u64 = 5 * 1024 * 1024;

// =============================================================================
// Collaborators
// =============================================================================

/// Time source for cache expiry.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Remote source of the routing document.
pub trait RoutingSource: Send + Sync {
    fn fetch(&self) -> BoxFuture<'_, Result<RoutingDocument>>;

    /// Where the document comes from, for logs.
    fn describe(&self) -> String;
}

/// Routing document stored as a JSON object in an object store.
pub struct ObjectStoreSource {
    store: Arc<dyn ObjectStore>,
    location: ObjectLocation,
}

impl ObjectStoreSource {
    pub fn new(store: Arc<dyn ObjectStore>, location: ObjectLocation) -> Self {
        Self { store, location }
    }
}

impl RoutingSource for ObjectStoreSource {
    fn fetch(&self) -> BoxFuture<'_, Result<RoutingDocument>> {
        Box::pin(async move {
            let body = match self
                .store
                .get_object(&self.location, MAX_DOCUMENT_BYTES)
                .await
                .with_context(|| format!("Failed to fetch routing document {}", self.location))?
            {
                StoredObject::Body(body) => body,
                StoredObject::TooLarge { size } => {
                    anyhow::bail!(
                        "Routing document {} is {} bytes, limit is {}",
                        self.location,
                        size,
                        MAX_DOCUMENT_BYTES
                    )
                }
            };

            serde_json::from_slice(&body)
                .with_context(|| format!("Failed to parse routing document {}", self.location))
        })
    }

    fn describe(&self) -> String {
        self.location.to_string()
    }
}

// =============================================================================
// Legacy Settings
// =============================================================================

/// Single-webhook settings used when no routing document is available.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacySettings {
    pub domain_name: Option<String>,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub allowed_domains: Vec<String>,
    pub max_retries: u32,
    pub timeout_seconds: u64,
    pub max_email_size_mb: u64,
}

impl LegacySettings {
    /// Synthesize a one-rule routing document.
    ///
    /// Without a webhook URL there is nothing to route to and the document
    /// is empty.
    pub fn to_document(&self) -> RoutingDocument {
        let webhook_url = match self.webhook_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => return RoutingDocument::empty(),
        };

        let domain_name = self
            .domain_name
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_lowercase);

        let (name, patterns) = match (&domain_name, self.allowed_domains.first()) {
            (Some(domain), _) => (domain.clone(), vec![format!("*@{}", domain)]),
            (None, Some(first)) => (
                first.clone(),
                self.allowed_domains
                    .iter()
                    .map(|d| format!("*@{}", d))
                    .collect(),
            ),
            (None, None) => ("default".to_string(), vec!["*".to_string()]),
        };

        let rule = DomainRule {
            webhook_url,
            webhook_secret: self.webhook_secret.clone(),
            patterns,
            filters: Filters {
                max_size_mb: Some(self.max_email_size_mb),
                allowed_senders: Some(vec!["*".to_string()]),
                blocked_senders: None,
                blocked_domains: None,
            },
            payload_format: None,
            custom_headers: Default::default(),
            retry_config: RetryOverrides {
                max_retries: Some(self.max_retries),
                timeout_seconds: Some(self.timeout_seconds),
            },
        };

        let mut domains = DomainRules::new();
        domains.insert(name, rule);

        RoutingDocument {
            version: Some("legacy".to_string()),
            last_updated: None,
            domains,
            global_settings: GlobalDefaults {
                default_max_retries: Some(self.max_retries),
                default_timeout_seconds: Some(self.timeout_seconds),
                default_max_size_mb: Some(self.max_email_size_mb),
            },
        }
    }
}

// =============================================================================
// Route Resolution
// =============================================================================

impl RoutingDocument {
    /// First rule, in document order, with a pattern matching `recipient`.
    pub fn route_for_recipient(&self, recipient: &str) -> Option<ResolvedRoute> {
        self.domains.iter().find_map(|(name, rule)| {
            first_match(recipient, &rule.patterns).map(|pattern| {
                info!(
                    recipient = %recipient,
                    domain = %name,
                    pattern = %pattern,
                    "route_matched"
                );
                rule.resolve(name, &self.global_settings)
            })
        })
    }

    /// First `(recipient, rule)` match, recipients in order.
    pub fn route_for_recipients(&self, recipients: &[String]) -> Option<ResolvedRoute> {
        recipients
            .iter()
            .find_map(|recipient| self.route_for_recipient(recipient))
    }

    /// First route that matches a recipient and accepts the sender.
    ///
    /// A recipient whose route rejects the sender is skipped and the next
    /// recipient is tried.
    pub fn allowed_route(&self, message: &InboundMessage) -> Option<ResolvedRoute> {
        for recipient in &message.to_addresses {
            let Some(route) = self.route_for_recipient(recipient) else {
                continue;
            };

            let decision = evaluate(&message.from_address, &route.filters);
            if decision.is_accepted() {
                return Some(route);
            }

            info!(
                correlation_id = %message.correlation_id,
                recipient = %recipient,
                sender = %message.from_address,
                domain = %route.domain,
                rule = decision.rule(),
                "recipient_skipped_by_filter"
            );
        }

        None
    }

    /// Drop rules that cannot be delivered to.
    fn sanitize(mut self) -> Self {
        self.domains.retain(|name, rule| {
            if rule.patterns.is_empty() {
                warn!(domain = %name, "routing_rule_dropped_no_patterns");
                return false;
            }

            match Url::parse(&rule.webhook_url) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => true,
                Ok(url) => {
                    warn!(
                        domain = %name,
                        scheme = url.scheme(),
                        "routing_rule_dropped_bad_scheme"
                    );
                    false
                }
                Err(e) => {
                    warn!(
                        domain = %name,
                        error = %e,
                        "routing_rule_dropped_bad_url"
                    );
                    false
                }
            }
        });
        self
    }
}

// =============================================================================
// Config Store
// =============================================================================

struct CachedDocument {
    document: Arc<RoutingDocument>,
    fetched_at: Instant,
}

/// TTL-cached routing configuration.
pub struct ConfigStore {
    source: Option<Arc<dyn RoutingSource>>,
    legacy: LegacySettings,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    cache: RwLock<Option<CachedDocument>>,
}

impl ConfigStore {
    pub fn new(
        source: Option<Arc<dyn RoutingSource>>,
        legacy: LegacySettings,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            legacy,
            ttl,
            clock,
            cache: RwLock::new(None),
        }
    }

    /// Current routing document. Never fails.
    pub async fn get_effective_config(&self) -> Arc<RoutingDocument> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                let age = self.clock.now().saturating_duration_since(cached.fetched_at);
                if age < self.ttl {
                    return Arc::clone(&cached.document);
                }
            }
        }

        // Fetch without holding the lock; concurrent refreshes may overlap
        let document = Arc::new(self.load().await);

        *self.cache.write().await = Some(CachedDocument {
            document: Arc::clone(&document),
            fetched_at: self.clock.now(),
        });

        info!(
            domains = document.domains.len(),
            version = ?document.version,
            ttl_seconds = self.ttl.as_secs(),
            "routing_config_cached"
        );

        document
    }

    /// Route for the first recipient that matches any rule.
    pub async fn resolve_route_for_recipients(&self, recipients: &[String]) -> Option<ResolvedRoute> {
        self.get_effective_config()
            .await
            .route_for_recipients(recipients)
    }

    /// Route for the message, if any recipient matches and the sender passes.
    pub async fn is_allowed(&self, message: &InboundMessage) -> Option<ResolvedRoute> {
        self.get_effective_config().await.allowed_route(message)
    }

    async fn load(&self) -> RoutingDocument {
        let Some(source) = &self.source else {
            info!("routing_source_not_configured");
            return self.legacy_document();
        };

        match source.fetch().await {
            Ok(document) => {
                let document = document.sanitize();
                if document.domains.is_empty() {
                    warn!(source = %source.describe(), "routing_config_empty");
                    self.legacy_document()
                } else {
                    info!(
                        source = %source.describe(),
                        domains = ?document.domains.names(),
                        "routing_config_loaded"
                    );
                    document
                }
            }
            Err(e) => {
                warn!(
                    source = %source.describe(),
                    error = %format!("{:#}", e),
                    "routing_config_fetch_failed"
                );
                self.legacy_document()
            }
        }
    }

    fn legacy_document(&self) -> RoutingDocument {
        let document = self.legacy.to_document().sanitize();
        info!(
            domains = ?document.domains.names(),
            "routing_config_legacy_fallback"
        );
        document
    }
}
