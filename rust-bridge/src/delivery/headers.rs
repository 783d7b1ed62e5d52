//! Request headers for webhook calls.

use std::collections::BTreeMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use tracing::warn;

use super::signature::SIGNATURE_HEADER;

/// Fixed user agent sent with every webhook call.
pub const BRIDGE_USER_AGENT: &str = concat!("SES-Webhook-Bridge/", env!("CARGO_PKG_VERSION"));

/// Header carrying the invocation's correlation id.
pub const CORRELATION_HEADER: &str = "X-Correlation-ID";

/// Build headers for a webhook request.
///
/// Route custom headers are applied last and replace a built-in header of the
/// same name. Custom headers that are not valid HTTP are skipped.
pub fn build_headers(
    correlation_id: &str,
    signature: Option<&str>,
    custom: &BTreeMap<String, String>,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(USER_AGENT, HeaderValue::from_static(BRIDGE_USER_AGENT));

    insert(&mut headers, CORRELATION_HEADER, correlation_id);
    if let Some(signature) = signature {
        insert(&mut headers, SIGNATURE_HEADER, signature);
    }

    for (name, value) in custom {
        insert(&mut headers, name, value);
    }

    headers
}

fn insert(headers: &mut HeaderMap, name: &str, value: &str) {
    let name = match HeaderName::from_bytes(name.trim().as_bytes()) {
        Ok(n) => n,
        Err(_) => {
            warn!(header = %name, "webhook_header_invalid_name");
            return;
        }
    };

    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(name, v);
        }
        Err(_) => {
            warn!(header = %name, "webhook_header_invalid_value");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_headers_unsigned() {
        let headers = build_headers("corr-1", None, &BTreeMap::new());

        assert_eq!(headers.len(), 3);
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(headers[USER_AGENT], BRIDGE_USER_AGENT);
        assert_eq!(headers["x-correlation-id"], "corr-1");
        assert!(headers.get("x-webhook-signature").is_none());
    }

    #[test]
    fn test_build_headers_signed_with_custom() {
        let mut custom = BTreeMap::new();
        custom.insert("Authorization".to_string(), "Bearer token123".to_string());

        let headers = build_headers("corr-1", Some("sha256=abc"), &custom);

        assert_eq!(headers["x-webhook-signature"], "sha256=abc");
        assert_eq!(headers["authorization"], "Bearer token123");
    }

    #[test]
    fn test_custom_header_overrides_builtin() {
        let mut custom = BTreeMap::new();
        custom.insert("User-Agent".to_string(), "Custom/1.0".to_string());

        let headers = build_headers("corr-1", None, &custom);
        assert_eq!(headers[USER_AGENT], "Custom/1.0");
    }

    #[test]
    fn test_invalid_custom_headers_are_skipped() {
        let mut custom = BTreeMap::new();
        custom.insert("Bad Header".to_string(), "value".to_string());
        custom.insert("X-Bad-Value".to_string(), "line\nbreak".to_string());
        custom.insert("X-Good".to_string(), "ok".to_string());

        let headers = build_headers("corr-1", None, &custom);
        assert_eq!(headers.len(), 4);
        assert_eq!(headers["x-good"], "ok");
    }
}
