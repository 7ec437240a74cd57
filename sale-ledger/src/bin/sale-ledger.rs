//! Sale ledger service binary
//!
//! Usage: `sale-ledger [config.toml]`. Without a path the configuration is
//! read from `SALE_LEDGER_*` environment variables.

use anyhow::Context;
use prometheus::{Encoder, TextEncoder};
use sale_ledger::{Backends, Config, Ledger, RecordingBackend, SystemClock};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting sale ledger");

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("failed to load config from {}", path))?,
        None => Config::from_env().context("failed to load config from environment")?,
    };

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        namespace = %config.namespace,
        owner = %config.owner,
        data_dir = ?config.data_dir,
        "Configuration loaded"
    );

    // In-process settlement: transfers and mints are recorded, not sent anywhere
    let backend = RecordingBackend::new();
    let backends = Backends {
        payments: Arc::new(backend.clone()),
        issuer: Arc::new(backend),
        clock: Arc::new(SystemClock),
    };

    // Open ledger
    let ledger = Ledger::open(config, backends)
        .await
        .context("failed to open ledger")?;
    tracing::info!(namespace = %hex::encode(ledger.namespace()), "Ledger opened successfully");

    match ledger.status().await {
        Ok(status) => tracing::info!(status = %serde_json::to_string(&status)?, "Sale status"),
        Err(sale_ledger::Error::NotInitialized) => {
            tracing::info!("Sale not configured yet")
        }
        Err(e) => return Err(e.into()),
    }

    tokio::signal::ctrl_c().await?;

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&ledger.metrics().registry().gather(), &mut buffer)?;
    tracing::info!(metrics = %String::from_utf8_lossy(&buffer), "Final metrics");

    tracing::info!("Shutting down sale ledger");
    ledger.shutdown().await?;
    Ok(())
}
