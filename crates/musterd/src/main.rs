//! musterd — server discovery daemon.

use anyhow::{Context, Result};

use muster_core::MusterConfig;
use musterd::{Daemon, DaemonSettings};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match MusterConfig::write_default_if_missing() {
        Ok(path) => tracing::debug!(path = %path.display(), "config file"),
        Err(e) => tracing::warn!(error = %e, "failed to write default config"),
    }
    let config = MusterConfig::load().context("failed to load config")?;
    let settings = DaemonSettings::from_config(&config)?;

    tracing::info!(
        tcp = %settings.tcp_addr,
        udp = %settings.udp_addr,
        http = %settings.http_addr,
        admit_attempts = settings.probe.admit_attempts,
        heartbeat_secs = settings.probe.heartbeat_interval.as_secs(),
        stale_after_secs = settings.registry.stale_after.as_secs(),
        "musterd starting"
    );

    let daemon = Daemon::bind(settings).await?;

    {
        let shutdown = daemon.shutdown_handle();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    daemon.run().await
}
