//! Routing document types and field-level merging.
//!
//! This module defines the shape of the routing document:
//! - `RoutingDocument`: versioned set of named `DomainRule`s plus `GlobalDefaults`
//! - `DomainRule`: one webhook target as written in the document (every
//!   tunable is optional)
//! - `ResolvedRoute`: a rule merged with the global defaults, ready for delivery

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tracing::warn;

/// Retry attempts used when neither the rule nor the globals set one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Per-request timeout used when neither the rule nor the globals set one.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Message size ceiling used when neither the rule nor the globals set one.
pub const DEFAULT_MAX_SIZE_MB: u64 = 10;

/// Payload format tag used when a rule does not name one.
pub const DEFAULT_PAYLOAD_FORMAT: &str = "standard";

// =============================================================================
// Document Types
// =============================================================================

/// Routing configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingDocument {
    /// Written as a string or a number; kept as text
    #[serde(
        default,
        deserialize_with = "version_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub domains: DomainRules,
    #[serde(default)]
    pub global_settings: GlobalDefaults,
}

/// Named domain rules in document order.
///
/// JSON objects are unordered in general, but rule precedence follows the
/// order in which the document lists them, so entries are kept as a list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomainRules(Vec<(String, DomainRule)>);

/// One routing target as written in the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRule {
    pub webhook_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
    /// Recipient patterns, evaluated in order
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub filters: Filters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_format: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub retry_config: RetryOverrides,
}

/// Sender filters and size limit for a rule. Unset fields inherit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_senders: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_senders: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_domains: Option<Vec<String>>,
}

/// Per-rule retry overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

/// Fallback values for any rule field left unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_max_size_mb: Option<u64>,
}

// =============================================================================
// Resolved Types
// =============================================================================

/// Fully merged configuration for one delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRoute {
    /// Name of the rule in the routing document
    pub domain: String,
    pub webhook_url: String,
    /// Shared secret; `None` means requests go out unsigned
    pub webhook_secret: Option<String>,
    pub patterns: Vec<String>,
    pub filters: ResolvedFilters,
    pub payload_format: String,
    pub custom_headers: BTreeMap<String, String>,
    pub retry: RetryPolicy,
}

/// Sender filters with every field decided.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFilters {
    pub max_size_mb: u64,
    pub allowed_senders: Vec<String>,
    pub blocked_senders: Vec<String>,
    pub blocked_domains: Vec<String>,
}

/// Retry budget for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub timeout: Duration,
}

impl ResolvedFilters {
    /// Size ceiling in bytes.
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(1024 * 1024)
    }
}

impl Default for ResolvedFilters {
    fn default() -> Self {
        Self {
            max_size_mb: DEFAULT_MAX_SIZE_MB,
            allowed_senders: vec!["*".to_string()],
            blocked_senders: Vec::new(),
            blocked_domains: Vec::new(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
        }
    }
}

// =============================================================================
// Merging
// =============================================================================

impl GlobalDefaults {
    pub fn max_retries(&self) -> u32 {
        self.default_max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.default_timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS)
    }

    pub fn max_size_mb(&self) -> u64 {
        self.default_max_size_mb.unwrap_or(DEFAULT_MAX_SIZE_MB)
    }
}

impl DomainRule {
    /// Merge this rule with the global defaults, field by field.
    pub fn resolve(&self, name: &str, defaults: &GlobalDefaults) -> ResolvedRoute {
        let filters = ResolvedFilters {
            max_size_mb: self
                .filters
                .max_size_mb
                .unwrap_or_else(|| defaults.max_size_mb()),
            allowed_senders: self
                .filters
                .allowed_senders
                .clone()
                .unwrap_or_else(|| vec!["*".to_string()]),
            blocked_senders: self.filters.blocked_senders.clone().unwrap_or_default(),
            blocked_domains: self.filters.blocked_domains.clone().unwrap_or_default(),
        };

        let retry = RetryPolicy {
            max_retries: self
                .retry_config
                .max_retries
                .unwrap_or_else(|| defaults.max_retries()),
            timeout: Duration::from_secs(
                self.retry_config
                    .timeout_seconds
                    .unwrap_or_else(|| defaults.timeout_seconds()),
            ),
        };

        ResolvedRoute {
            domain: name.to_string(),
            webhook_url: self.webhook_url.clone(),
            webhook_secret: self
                .webhook_secret
                .clone()
                .filter(|s| !s.trim().is_empty()),
            patterns: self.patterns.clone(),
            filters,
            payload_format: self
                .payload_format
                .clone()
                .unwrap_or_else(|| DEFAULT_PAYLOAD_FORMAT.to_string()),
            custom_headers: self.custom_headers.clone(),
            retry,
        }
    }
}

impl RoutingDocument {
    /// Document with no domains. Valid, but routes nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Resolve a rule by name.
    pub fn resolve(&self, name: &str) -> Option<ResolvedRoute> {
        self.domains
            .get(name)
            .map(|rule| rule.resolve(name, &self.global_settings))
    }
}

// =============================================================================
// Ordered Domain Map
// =============================================================================

impl DomainRules {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a rule, replacing an earlier rule of the same name in place.
    pub fn insert(&mut self, name: impl Into<String>, rule: DomainRule) {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = rule,
            None => self.0.push((name, rule)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&DomainRule> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DomainRule)> {
        self.0.iter().map(|(n, r)| (n.as_str(), r))
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str, &DomainRule) -> bool) {
        self.0.retain(|(n, r)| keep(n, r));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, DomainRule)> for DomainRules {
    fn from_iter<I: IntoIterator<Item = (String, DomainRule)>>(iter: I) -> Self {
        let mut rules = DomainRules::new();
        for (name, rule) in iter {
            rules.insert(name, rule);
        }
        rules
    }
}

impl Serialize for DomainRules {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, rule) in &self.0 {
            map.serialize_entry(name, rule)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for DomainRules {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedRules;

        impl<'de> Visitor<'de> for OrderedRules {
            type Value = DomainRules;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of domain names to domain rules")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut rules = DomainRules::new();
                while let Some((name, value)) = access.next_entry::<String, Value>()? {
                    match DomainRule::deserialize(value) {
                        Ok(rule) => rules.insert(name, rule),
                        Err(e) => {
                            warn!(domain = %name, error = %e, "routing_rule_dropped_invalid");
                        }
                    }
                }
                Ok(rules)
            }
        }

        deserializer.deserialize_map(OrderedRules)
    }
}

fn version_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        Some(Value::Null) | None => None,
        Some(other) => {
            warn!(version = %other, "routing_version_ignored");
            None
        }
    })
}
