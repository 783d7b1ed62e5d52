//! Signed webhook delivery with bounded retries.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tracing::{error, info, warn};

use super::backoff::{backoff_delay, jitter, Sleeper, TokioSleeper};
use super::headers::build_headers;
use super::signature::sign_payload;
use crate::payload::OutboundPayload;
use crate::routing::ResolvedRoute;

/// Why a single attempt failed. Every kind is retryable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// Endpoint answered with a status outside 200/201/202
    Status(u16),
    /// No response within the route's timeout
    Timeout,
    /// Connection or protocol error
    Transport(String),
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Status(status) => write!(f, "status {}", status),
            AttemptFailure::Timeout => write!(f, "timed out"),
            AttemptFailure::Transport(message) => write!(f, "transport error: {}", message),
        }
    }
}

/// Delivery failure.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Failed to deliver webhook to {url} after {attempts} attempts (last: {last_failure})")]
    Exhausted {
        url: String,
        attempts: u32,
        last_failure: AttemptFailure,
    },

    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to sign payload for {url}: invalid key")]
    Signing { url: String },
}

/// Successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub status: u16,
    /// 1-based number of the attempt that succeeded
    pub attempts: u32,
}

/// HTTP client for webhook delivery.
#[derive(Clone)]
pub struct DeliveryClient {
    http: Client,
    sleeper: Arc<dyn Sleeper>,
}

impl DeliveryClient {
    pub fn new(http: Client) -> Self {
        Self::with_sleeper(http, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(http: Client, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { http, sleeper }
    }

    /// Client with a pooled reqwest client.
    pub fn from_defaults() -> reqwest::Result<Self> {
        let http = Client::builder().pool_max_idle_per_host(16).build()?;
        Ok(Self::new(http))
    }

    /// Deliver a payload to the route's webhook.
    ///
    /// Makes up to `route.retry.max_retries` attempts (at least one) and waits
    /// `min(2^attempt + jitter, 60)` seconds between attempts, never after the
    /// last one.
    pub async fn deliver(
        &self,
        payload: &OutboundPayload,
        route: &ResolvedRoute,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let correlation_id = payload.metadata.correlation_id.as_str();
        let body = payload.to_canonical_json()?;

        let signature = match route.webhook_secret.as_deref() {
            Some(secret) => Some(sign_payload(secret, &body).map_err(|_| DeliveryError::Signing {
                url: route.webhook_url.clone(),
            })?),
            None => None,
        };

        let headers = build_headers(correlation_id, signature.as_deref(), &route.custom_headers);
        let max_attempts = route.retry.max_retries.max(1);
        let mut last_failure = AttemptFailure::Status(0);

        for attempt in 0..max_attempts {
            info!(
                correlation_id = %correlation_id,
                webhook_url = %route.webhook_url,
                domain = %route.domain,
                attempt = attempt + 1,
                max_attempts = max_attempts,
                signed = signature.is_some(),
                body_length = body.len(),
                "webhook_attempt_starting"
            );

            match self
                .attempt(&route.webhook_url, &headers, &body, route.retry.timeout)
                .await
            {
                Ok(status) => {
                    info!(
                        correlation_id = %correlation_id,
                        webhook_url = %route.webhook_url,
                        status_code = status,
                        attempt = attempt + 1,
                        "webhook_delivered"
                    );
                    return Ok(DeliveryReceipt {
                        status,
                        attempts: attempt + 1,
                    });
                }
                Err(failure) => {
                    warn!(
                        correlation_id = %correlation_id,
                        webhook_url = %route.webhook_url,
                        attempt = attempt + 1,
                        failure = %failure,
                        "webhook_attempt_failed"
                    );
                    last_failure = failure;
                }
            }

            if attempt + 1 < max_attempts {
                let delay = backoff_delay(attempt, jitter());
                info!(
                    correlation_id = %correlation_id,
                    delay_seconds = delay.as_secs_f64(),
                    "webhook_retry_wait"
                );
                self.sleeper.sleep(delay).await;
            }
        }

        error!(
            correlation_id = %correlation_id,
            webhook_url = %route.webhook_url,
            attempts = max_attempts,
            last_failure = %last_failure,
            "webhook_delivery_exhausted"
        );

        Err(DeliveryError::Exhausted {
            url: route.webhook_url.clone(),
            attempts: max_attempts,
            last_failure,
        })
    }

    /// One POST. `Ok` carries a success status.
    async fn attempt(
        &self,
        url: &str,
        headers: &reqwest::header::HeaderMap,
        body: &[u8],
        timeout: Duration,
    ) -> Result<u16, AttemptFailure> {
        let response = self
            .http
            .post(url)
            .headers(headers.clone())
            .body(body.to_vec())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AttemptFailure::Timeout
                } else {
                    AttemptFailure::Transport(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if matches!(status, 200 | 201 | 202) {
            return Ok(status);
        }

        let text = response.text().await.unwrap_or_default();
        warn!(
            url = %url,
            status_code = status,
            response_preview = %text.chars().take(200).collect::<String>(),
            "webhook_unexpected_status"
        );

        Err(AttemptFailure::Status(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use futures::future::BoxFuture;
    use mockito::Matcher;

    use crate::delivery::signature::verify_signature;
    use crate::payload::{InboundMessage, MessageBody};
    use crate::routing::{ResolvedFilters, RetryPolicy};

    #[derive(Default)]
    struct RecordingSleeper {
        delays: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        fn delays(&self) -> Vec<Duration> {
            self.delays.lock().unwrap().clone()
        }
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
            self.delays.lock().unwrap().push(duration);
            Box::pin(async {})
        }
    }

    fn payload() -> OutboundPayload {
        OutboundPayload::email_received(
            InboundMessage {
                message_id: "msg-1".to_string(),
                timestamp: "2024-01-15T10:00:00Z".to_string(),
                from_address: "user@trusted.com".to_string(),
                to_addresses: vec!["contact@company.org".to_string()],
                subject: "Hello".to_string(),
                correlation_id: "corr-123".to_string(),
            },
            MessageBody::new("plain", "<p>html</p>"),
        )
    }

    fn route(url: String, secret: Option<&str>, max_retries: u32) -> ResolvedRoute {
        ResolvedRoute {
            domain: "company.org".to_string(),
            webhook_url: url,
            webhook_secret: secret.map(str::to_string),
            patterns: vec!["*@company.org".to_string()],
            filters: ResolvedFilters::default(),
            payload_format: "standard".to_string(),
            custom_headers: BTreeMap::new(),
            retry: RetryPolicy {
                max_retries,
                timeout: Duration::from_secs(5),
            },
        }
    }

    fn client(sleeper: Arc<RecordingSleeper>) -> DeliveryClient {
        DeliveryClient::with_sleeper(Client::new(), sleeper)
    }

    #[tokio::test]
    async fn test_deliver_signed_payload() {
        let mut server = mockito::Server::new_async().await;
        let body = payload().to_canonical_json().unwrap();
        let signature = sign_payload("secret123", &body).unwrap();

        let mock = server
            .mock("POST", "/hook")
            .match_header("content-type", "application/json")
            .match_header("user-agent", crate::delivery::BRIDGE_USER_AGENT)
            .match_header("x-correlation-id", "corr-123")
            .match_header("x-webhook-signature", signature.as_str())
            .match_body(Matcher::Exact(String::from_utf8(body.clone()).unwrap()))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let sleeper = Arc::new(RecordingSleeper::default());
        let receipt = client(Arc::clone(&sleeper))
            .deliver(&payload(), &route(format!("{}/hook", server.url()), Some("secret123"), 3))
            .await
            .unwrap();

        assert_eq!(receipt, DeliveryReceipt { status: 200, attempts: 1 });
        assert!(sleeper.delays().is_empty());
        assert!(verify_signature("secret123", &body, &signature));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_deliver_unsigned_without_secret() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("x-webhook-signature", Matcher::Missing)
            .with_status(201)
            .expect(1)
            .create_async()
            .await;

        let sleeper = Arc::new(RecordingSleeper::default());
        let receipt = client(sleeper)
            .deliver(&payload(), &route(format!("{}/hook", server.url()), None, 3))
            .await
            .unwrap();

        assert_eq!(receipt.status, 201);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_custom_headers_are_sent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("authorization", "Bearer token123")
            .with_status(200)
            .create_async()
            .await;

        let mut target = route(format!("{}/hook", server.url()), None, 1);
        target
            .custom_headers
            .insert("Authorization".to_string(), "Bearer token123".to_string());

        let sleeper = Arc::new(RecordingSleeper::default());
        client(sleeper).deliver(&payload(), &target).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_retries_exactly_max_retries_on_500() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .with_status(500)
            .with_body("boom")
            .expect(3)
            .create_async()
            .await;

        let url = format!("{}/hook", server.url());
        let sleeper = Arc::new(RecordingSleeper::default());
        let err = client(Arc::clone(&sleeper))
            .deliver(&payload(), &route(url.clone(), Some("secret123"), 3))
            .await
            .unwrap_err();

        match err {
            DeliveryError::Exhausted {
                url: failed_url,
                attempts,
                last_failure,
            } => {
                assert_eq!(failed_url, url);
                assert_eq!(attempts, 3);
                assert_eq!(last_failure, AttemptFailure::Status(500));
            }
            other => panic!("unexpected error: {other}"),
        }

        // Waits between attempts only: after attempt 1 and attempt 2
        let delays = sleeper.delays();
        assert_eq!(delays.len(), 2);
        assert!(delays[0] >= Duration::from_secs(1) && delays[0] < Duration::from_secs(2));
        assert!(delays[1] >= Duration::from_secs(2) && delays[1] < Duration::from_secs(3));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_stops_on_second_attempt_success() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("POST", "/hook")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;
        let accepted = server
            .mock("POST", "/hook")
            .with_status(202)
            .expect(1)
            .create_async()
            .await;

        let sleeper = Arc::new(RecordingSleeper::default());
        let receipt = client(Arc::clone(&sleeper))
            .deliver(&payload(), &route(format!("{}/hook", server.url()), None, 3))
            .await
            .unwrap();

        assert_eq!(receipt, DeliveryReceipt { status: 202, attempts: 2 });
        // Only the wait between attempt 1 and 2
        assert_eq!(sleeper.delays().len(), 1);
        failing.assert_async().await;
        accepted.assert_async().await;
    }

    #[tokio::test]
    async fn test_zero_retries_still_attempts_once() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let sleeper = Arc::new(RecordingSleeper::default());
        let err = client(Arc::clone(&sleeper))
            .deliver(&payload(), &route(format!("{}/hook", server.url()), None, 0))
            .await
            .unwrap_err();

        assert!(matches!(err, DeliveryError::Exhausted { attempts: 1, .. }));
        assert!(sleeper.delays().is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_transport_error_is_retried() {
        // Nothing listens on port 1
        let sleeper = Arc::new(RecordingSleeper::default());
        let err = client(Arc::clone(&sleeper))
            .deliver(&payload(), &route("http://127.0.0.1:1/hook".to_string(), None, 2))
            .await
            .unwrap_err();

        match err {
            DeliveryError::Exhausted {
                attempts,
                last_failure,
                ..
            } => {
                assert_eq!(attempts, 2);
                assert!(matches!(last_failure, AttemptFailure::Transport(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sleeper.delays().len(), 1);
    }

    #[test]
    fn test_exhausted_error_message() {
        let err = DeliveryError::Exhausted {
            url: "https://example.com/hook".to_string(),
            attempts: 3,
            last_failure: AttemptFailure::Status(500),
        };
        assert_eq!(
            err.to_string(),
            "Failed to deliver webhook to https://example.com/hook after 3 attempts (last: status 500)"
        );
    }
}
