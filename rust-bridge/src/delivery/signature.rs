//! Webhook payload signing.
//!
//! Requests to a route with a shared secret carry
//! `X-Webhook-Signature: sha256=<hex>`, where the hex digest is
//! HMAC-SHA256 over the exact request body, keyed by the secret.

use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Compute the signature header value for `body`.
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String, InvalidLength> {
    Ok(format!("{}{}", SIGNATURE_PREFIX, hex_digest(secret, body)?))
}

/// Verify a signature header against `body`.
///
/// This is what a receiving endpoint runs. Returns `false` for a missing
/// prefix, a wrong secret, or any change to the body.
pub fn verify_signature(secret: &str, body: &[u8], header_value: &str) -> bool {
    if secret.is_empty() || header_value.is_empty() {
        warn!(
            has_secret = !secret.is_empty(),
            has_signature = !header_value.is_empty(),
            "webhook_signature_missing_fields"
        );
        return false;
    }

    let Some(received) = header_value.strip_prefix(SIGNATURE_PREFIX) else {
        warn!("webhook_signature_bad_prefix");
        return false;
    };

    let expected = match hex_digest(secret, body) {
        Ok(digest) => digest,
        Err(_) => {
            warn!("webhook_signature_invalid_key");
            return false;
        }
    };
    let valid = constant_time_compare(&expected, received);

    if !valid {
        warn!(
            expected_length = expected.len(),
            actual_length = received.len(),
            "webhook_signature_mismatch"
        );
    }

    valid
}

fn hex_digest(secret: &str, body: &[u8]) -> Result<String, InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
