//! musterd — the server discovery daemon.
//!
//! Wires the registry to its three front doors: the TCP command port, the
//! UDP heartbeat socket and the HTTP query interface.

pub mod command;
pub mod listener;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use muster_core::MusterConfig;
use muster_services::{ProbeSettings, Prober, Registry, RegistrySettings};

/// Listen addresses and timings for one daemon instance.
#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub tcp_addr: SocketAddr,
    pub udp_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub probe: ProbeSettings,
    pub registry: RegistrySettings,
}

impl DaemonSettings {
    pub fn from_config(config: &MusterConfig) -> Result<Self> {
        let host: IpAddr = config
            .network
            .bind_host
            .parse()
            .with_context(|| format!("invalid network.bind_host {:?}", config.network.bind_host))?;
        Ok(Self {
            tcp_addr: SocketAddr::new(host, config.network.tcp_port),
            udp_addr: SocketAddr::new(host, config.network.udp_port),
            http_addr: SocketAddr::new(host, config.network.http_port),
            probe: ProbeSettings::from(&config.liveness),
            registry: RegistrySettings::from(&config.registry),
        })
    }
}

/// A daemon with all sockets bound, ready to [`Daemon::run`].
pub struct Daemon {
    registry: Arc<Registry>,
    prober: Arc<Prober>,
    tcp: TcpListener,
    http: TcpListener,
    shutdown_tx: broadcast::Sender<()>,
}

impl Daemon {
    pub async fn bind(settings: DaemonSettings) -> Result<Self> {
        let prober = Prober::bind(settings.udp_addr, settings.probe).await?;
        let tcp = TcpListener::bind(settings.tcp_addr)
            .await
            .with_context(|| format!("failed to bind command port {}", settings.tcp_addr))?;
        let http = TcpListener::bind(settings.http_addr)
            .await
            .with_context(|| format!("failed to bind HTTP port {}", settings.http_addr))?;
        let registry = Arc::new(Registry::new(prober.clone(), settings.registry));
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            registry,
            prober,
            tcp,
            http,
            shutdown_tx,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn tcp_addr(&self) -> std::io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    pub fn udp_addr(&self) -> std::io::Result<SocketAddr> {
        self.prober.local_addr()
    }

    pub fn http_addr(&self) -> std::io::Result<SocketAddr> {
        self.http.local_addr()
    }

    /// Sending on this stops a running daemon.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Serve until shutdown is broadcast or the heartbeat receiver fails.
    ///
    /// A receiver failure is returned as an error: without it no record can
    /// stay alive, so the daemon does not keep serving.
    pub async fn run(self) -> Result<()> {
        let Daemon {
            registry,
            prober,
            tcp,
            http,
            shutdown_tx,
        } = self;

        let mut receiver_task = tokio::spawn(prober.run_receiver());
        let sweeper_task = tokio::spawn(registry.clone().run_sweeper(shutdown_tx.subscribe()));
        let listener_task = tokio::spawn(listener::listener_loop(
            tcp,
            registry.clone(),
            shutdown_tx.subscribe(),
        ));
        let http_task = {
            let state = muster_api::ApiState {
                registry: registry.clone(),
            };
            let shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move {
                if let Err(e) = muster_api::serve(state, http, shutdown).await {
                    tracing::error!(error = %e, "HTTP query interface failed");
                }
            })
        };

        let mut shutdown_rx = shutdown_tx.subscribe();
        let outcome = tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::info!("shutting down");
                Ok(())
            }
            r = &mut receiver_task => {
                let err = match r {
                    Ok(Ok(())) => anyhow::anyhow!("heartbeat receiver exited"),
                    Ok(Err(e)) => e,
                    Err(e) => anyhow::Error::new(e).context("heartbeat receiver panicked"),
                };
                tracing::error!(error = ?err, "heartbeat receiver failed, stopping");
                Err(err)
            }
        };

        let _ = shutdown_tx.send(());
        registry.stop().await;
        receiver_task.abort();

        for (name, task) in [("sweeper", sweeper_task), ("http", http_task)] {
            if let Err(e) = task.await {
                tracing::warn!(task = name, error = %e, "task ended abnormally");
            }
        }
        match listener_task.await {
            Ok(Err(e)) => tracing::warn!(error = %e, "command listener failed"),
            Err(e) => tracing::warn!(error = %e, "command listener ended abnormally"),
            Ok(Ok(())) => {}
        }

        outcome
    }
}
