//! SES Webhook Bridge - HTTP server for SES receipt events.
//!
//! Accepts SES event batches on `POST /events`, routes each message to its
//! domain's webhook and returns the invocation response.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bridge::web::{router, AppState};
use bridge::{Config, EmailIngestPipeline};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("bridge_starting");

    // Load configuration
    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        port = config.port,
        s3_bucket = %config.s3_bucket,
        config_bucket = ?config.config_bucket,
        config_key = %config.config_key,
        cache_ttl_seconds = config.config_cache_ttl.as_secs(),
        fallback_webhook_configured = config.target_webhook_url.is_some(),
        "config_loaded"
    );

    let pipeline = EmailIngestPipeline::from_config(&config)
        .await
        .context("Failed to initialize pipeline")?;
    let app = router(AppState::new(pipeline));

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "bridge_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("bridge_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "ctrl_c_handler_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("bridge_shutting_down");
}
