//! SES Webhook Bridge replay - process one SES event from a file or stdin.
//!
//! Usage: `ses-bridge-replay [event.json]`. Without a path the event is read
//! from stdin. The invocation response is printed to stdout and the exit code
//! is non-zero when the invocation failed.

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bridge::ingest::SesEvent;
use bridge::{Config, EmailIngestPipeline};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout carries only the response
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true).with_writer(std::io::stderr))
        .init();

    let path = std::env::args().nth(1);
    let event = read_event(path.as_deref(), tokio::io::stdin()).await?;
    info!(records = event.records.len(), "replay_event_loaded");

    let config = Config::from_env().context("Invalid configuration")?;
    let pipeline = EmailIngestPipeline::from_config(&config)
        .await
        .context("Failed to initialize pipeline")?;

    let response = pipeline.handle_event(&event).await;
    println!("{}", serde_json::to_string_pretty(&response)?);

    if response.status_code != 200 {
        anyhow::bail!("Invocation failed with status {}", response.status_code);
    }

    Ok(())
}

/// Read an event from `path`, or from `input` when no path is given.
async fn read_event<R>(path: Option<&str>, mut input: R) -> Result<SesEvent>
where
    R: AsyncRead + Unpin,
{
    let raw = match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read event file {}", path))?,
        None => {
            let mut buf = String::new();
            input
                .read_to_string(&mut buf)
                .await
                .context("Failed to read event from stdin")?;
            buf
        }
    };

    serde_json::from_str(&raw).context("Failed to parse SES event")
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENT: &str = r#"{"Records": [{"eventSource": "aws:ses", "ses": {}}, {"eventSource": "aws:sqs"}]}"#;

    #[tokio::test]
    async fn test_read_event_from_input() {
        let event = read_event(None, EVENT.as_bytes()).await.unwrap();
        assert_eq!(event.records.len(), 2);
        assert!(event.records[0].is_ses());
    }

    #[tokio::test]
    async fn test_read_event_from_file() {
        let path = std::env::temp_dir().join(format!("replay-event-{}.json", std::process::id()));
        tokio::fs::write(&path, EVENT).await.unwrap();

        // The file wins over the input stream
        let event = read_event(path.to_str(), &b"not json"[..]).await.unwrap();
        assert_eq!(event.records.len(), 2);

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_event_rejects_bad_json() {
        let err = read_event(None, &b"{ nope"[..]).await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse SES event"));
    }
}
