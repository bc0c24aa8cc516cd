//! fwbrokerd: firmware broker daemon.
//!
//! Consumes `FirmwareUpdateReady` events and streams the named blob to the
//! device in paced chunks. Runs until SIGINT.

use anyhow::{Context, Result};

use fwbroker_core::config::BrokerConfig;
use fwbroker_services::{wiring, LocalBackends};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = BrokerConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = BrokerConfig::load().context("failed to load config")?;
    config.validate().context("invalid config")?;

    tracing::info!(
        config = %BrokerConfig::file_path().display(),
        event_path = %config.event_log.path,
        consumer_group = %config.event_log.consumer_group,
        partition_id = config.event_log.partition_id.as_deref().unwrap_or("<all>"),
        container = %config.storage.container,
        pacing = ?config.transfer.pacing,
        chunk_send_interval_ms = config.transfer.chunk_send_interval_ms,
        failure_isolation = ?config.transfer.failure_isolation,
        "fwbrokerd starting"
    );

    let backends = LocalBackends::from_config(&config)?;
    tracing::info!(
        blobs = %backends.blobs.root().display(),
        spool = %backends.channel.root().display(),
        events = %backends.events.root().display(),
        checkpoints = %backends.checkpoints.root().display(),
        "backends ready"
    );
    let supervisor = wiring::supervisor(&config, backends);

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    let failures = supervisor.run(shutdown_rx).await;
    tracing::info!(failures, "fwbrokerd stopped");
    Ok(())
}
