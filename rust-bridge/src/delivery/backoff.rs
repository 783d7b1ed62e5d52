//! Retry delays: capped exponential backoff with fractional jitter.

use std::time::Duration;

use futures::future::BoxFuture;
use rand::Rng;

/// Longest wait between two attempts, in seconds.
pub const MAX_BACKOFF_SECONDS: f64 = 60.0;

/// Delay after the failed attempt `attempt` (0-based):
/// `min(2^attempt + jitter, 60)` seconds, `jitter` in `[0, 1)`.
pub fn backoff_delay(attempt: u32, jitter: f64) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let seconds = (2f64.powi(exponent) + jitter.clamp(0.0, 1.0)).min(MAX_BACKOFF_SECONDS);
    Duration::from_secs_f64(seconds)
}

/// Random jitter in `[0, 1)`.
pub fn jitter() -> f64 {
    rand::thread_rng().gen::<f64>()
}

/// Suspends the retry loop between attempts.
///
/// The returned future is an ordinary await point: dropping the delivery
/// future (for example under `tokio::time::timeout`) cancels the wait.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_exponentially() {
        assert_eq!(backoff_delay(0, 0.0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1, 0.0), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, 0.0), Duration::from_secs(4));
        assert_eq!(backoff_delay(5, 0.0), Duration::from_secs(32));
    }

    #[test]
    fn test_backoff_adds_jitter() {
        assert_eq!(backoff_delay(1, 0.5), Duration::from_secs_f64(2.5));
    }

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(backoff_delay(6, 0.0), Duration::from_secs(60));
        assert_eq!(backoff_delay(5, 0.99), Duration::from_secs_f64(32.0 + 0.99));
        assert_eq!(backoff_delay(40, 0.3), Duration::from_secs(60));
        assert_eq!(backoff_delay(u32::MAX, 0.3), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_range() {
        for _ in 0..1000 {
            let j = jitter();
            assert!((0.0..1.0).contains(&j));
        }
    }

    #[tokio::test]
    async fn test_tokio_sleeper_can_be_cancelled() {
        let sleeper = TokioSleeper;
        let result =
            tokio::time::timeout(Duration::from_millis(10), sleeper.sleep(Duration::from_secs(60)))
                .await;
        assert!(result.is_err());
    }
}
