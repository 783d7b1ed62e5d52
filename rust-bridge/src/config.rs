//! Configuration module for environment variable parsing.
//!
//! Every setting is an environment variable with a documented default. Only
//! the default email bucket is required, plus at least one routing source.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::routing::LegacySettings;
use crate::routing::types::{DEFAULT_MAX_RETRIES, DEFAULT_MAX_SIZE_MB, DEFAULT_TIMEOUT_SECONDS};
use crate::storage::ObjectLocation;

/// Default key of the routing document in `CONFIG_BUCKET`.
pub const DEFAULT_CONFIG_KEY: &str = "config/domains.json";

/// Default routing document cache lifetime.
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 300;

/// Errors that prevent startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),

    #[error("no routing source configured: set CONFIG_BUCKET or TARGET_WEBHOOK_URL")]
    NoRoutingSource,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bucket holding raw messages when the receipt names no S3 action
    pub s3_bucket: String,

    /// Bucket holding the routing document; unset disables remote routing
    pub config_bucket: Option<String>,

    /// Key of the routing document
    pub config_key: String,

    /// How long a loaded routing document is reused
    pub config_cache_ttl: Duration,

    // =========================================================================
    // Single-webhook fallback
    // =========================================================================

    /// Webhook used when no routing document is available
    pub target_webhook_url: Option<String>,

    /// Shared secret for the fallback webhook
    pub webhook_secret: Option<String>,

    /// Domain served by the fallback webhook
    pub domain_name: Option<String>,

    /// Recipient domains served by the fallback webhook, lowercased
    pub allowed_domains: Vec<String>,

    /// Delivery attempts for the fallback webhook
    pub max_retries: u32,

    /// Per-request timeout for the fallback webhook
    pub timeout_seconds: u64,

    /// Size limit for messages routed to the fallback webhook
    pub max_email_size_mb: u64,

    /// Port for the HTTP entry point
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let s3_bucket = non_empty("S3_BUCKET").ok_or(ConfigError::Missing("S3_BUCKET"))?;
        let config_bucket = non_empty("CONFIG_BUCKET");
        let target_webhook_url = non_empty("TARGET_WEBHOOK_URL");

        if config_bucket.is_none() && target_webhook_url.is_none() {
            return Err(ConfigError::NoRoutingSource);
        }

        Ok(Config {
            s3_bucket,
            config_bucket,
            config_key: non_empty("CONFIG_KEY").unwrap_or_else(|| DEFAULT_CONFIG_KEY.to_string()),
            config_cache_ttl: Duration::from_secs(parse_or(
                &lookup,
                "CONFIG_CACHE_TTL_SECONDS",
                DEFAULT_CACHE_TTL_SECONDS,
            )),

            target_webhook_url,
            webhook_secret: non_empty("WEBHOOK_SECRET"),
            domain_name: non_empty("DOMAIN_NAME"),
            allowed_domains: parse_csv(lookup("ALLOWED_DOMAINS").as_deref())
                .into_iter()
                .map(|d| d.to_lowercase())
                .collect(),
            max_retries: parse_or(&lookup, "MAX_RETRIES", DEFAULT_MAX_RETRIES),
            timeout_seconds: parse_or(&lookup, "TIMEOUT_SECONDS", DEFAULT_TIMEOUT_SECONDS),
            max_email_size_mb: parse_or(&lookup, "MAX_EMAIL_SIZE_MB", DEFAULT_MAX_SIZE_MB),

            port: parse_or(&lookup, "PORT", 8080),
        })
    }

    /// Settings for the synthesized single-rule routing document.
    pub fn legacy_settings(&self) -> LegacySettings {
        LegacySettings {
            domain_name: self.domain_name.clone(),
            webhook_url: self.target_webhook_url.clone(),
            webhook_secret: self.webhook_secret.clone(),
            allowed_domains: self.allowed_domains.clone(),
            max_retries: self.max_retries,
            timeout_seconds: self.timeout_seconds,
            max_email_size_mb: self.max_email_size_mb,
        }
    }

    /// Location of the remote routing document, if one is configured.
    pub fn routing_document_location(&self) -> Option<ObjectLocation> {
        self.config_bucket
            .as_ref()
            .map(|bucket| ObjectLocation::new(bucket, &self.config_key))
    }
}

/// Parse a variable, falling back to `default` when unset or invalid.
fn parse_or<T, F>(lookup: &F, name: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = match lookup(name) {
        Some(v) if !v.trim().is_empty() => v,
        _ => return default,
    };

    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid value, using default");
            default
        }
    }
}

/// Parse a comma-separated list of strings.
fn parse_csv(raw: Option<&str>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
    .unwrap_or_default()
}
