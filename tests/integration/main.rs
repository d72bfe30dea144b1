//! muster integration test harness.
//!
//! Each test starts a complete daemon in-process on loopback with
//! ephemeral ports and short timings, then drives it the way hosts and
//! clients do: TCP commands, UDP acknowledgements and HTTP queries.

mod lifecycle;
mod queries;
mod registration;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use muster_services::{ProbeSettings, Registry, RegistrySettings};
use musterd::{Daemon, DaemonSettings};

// ── Daemon ────────────────────────────────────────────────────────────────────

pub struct Stack {
    pub tcp: SocketAddr,
    pub http: SocketAddr,
    pub registry: Arc<Registry>,
    pub shutdown: broadcast::Sender<()>,
    pub task: JoinHandle<Result<()>>,
}

pub fn fast_settings() -> DaemonSettings {
    let any: SocketAddr = "127.0.0.1:0".parse().unwrap();
    DaemonSettings {
        tcp_addr: any,
        udp_addr: any,
        http_addr: any,
        probe: ProbeSettings {
            admit_attempts: 3,
            admit_timeout: Duration::from_millis(150),
            heartbeat_interval: Duration::from_millis(50),
        },
        registry: RegistrySettings {
            stale_after: Duration::from_millis(400),
            sweep_interval: Duration::from_millis(50),
            allow_reregistration: true,
        },
    }
}

pub async fn start_stack(settings: DaemonSettings) -> Stack {
    let daemon = Daemon::bind(settings).await.expect("daemon should bind");
    let tcp = daemon.tcp_addr().unwrap();
    let http = daemon.http_addr().unwrap();
    let registry = daemon.registry().clone();
    let shutdown = daemon.shutdown_handle();
    let task = tokio::spawn(daemon.run());
    Stack {
        tcp,
        http,
        registry,
        shutdown,
        task,
    }
}

// ── Hosts ─────────────────────────────────────────────────────────────────────

/// A game host answering heartbeat probes on its registered port + 1.
pub struct Host {
    pub port: u16,
    acking: Arc<AtomicBool>,
}

impl Host {
    pub async fn spawn(acking: bool) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port() - 1;
        let acking = Arc::new(AtomicBool::new(acking));
        {
            let acking = acking.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 16];
                while let Ok((_, from)) = socket.recv_from(&mut buf).await {
                    if acking.load(Ordering::SeqCst) {
                        let _ = socket.send_to(b"pong", from).await;
                    }
                }
            });
        }
        Self { port, acking }
    }

    pub fn start_acking(&self) {
        self.acking.store(true, Ordering::SeqCst);
    }

    pub fn go_silent(&self) {
        self.acking.store(false, Ordering::SeqCst);
    }

    pub fn regserv(&self) -> String {
        format!("regserv {} Arena 3 0\n", self.port)
    }

    pub fn listing(&self) -> String {
        format!("addserver 127.0.0.1 {}", self.port)
    }
}

// ── Clients ───────────────────────────────────────────────────────────────────

/// Send one request and read until the daemon closes the connection.
pub async fn tcp_request(addr: SocketAddr, request: &str) -> Result<String> {
    let mut stream = TcpStream::connect(addr).await.context("connect failed")?;
    stream.write_all(request.as_bytes()).await?;
    let mut reply = String::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut reply))
        .await
        .context("daemon did not close the connection")??;
    Ok(reply)
}

/// A host's command connection, kept open after `succreg`.
pub struct HostConnection {
    reader: BufReader<TcpStream>,
}

impl HostConnection {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.context("connect failed")?;
        Ok(Self {
            reader: BufReader::new(stream),
        })
    }

    /// Send a command and read one reply line. Empty once the daemon has closed.
    pub async fn command(&mut self, line: &str) -> Result<String> {
        self.reader.get_mut().write_all(line.as_bytes()).await?;
        let mut reply = String::new();
        tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut reply))
            .await
            .context("no reply from daemon")??;
        Ok(reply)
    }

    pub async fn is_closed(&mut self) -> bool {
        let mut rest = String::new();
        matches!(
            tokio::time::timeout(Duration::from_secs(2), self.reader.read_to_string(&mut rest))
                .await,
            Ok(Ok(0))
        )
    }
}

pub async fn http_get(addr: SocketAddr, path: &str) -> Result<reqwest::Response> {
    reqwest::get(format!("http://{addr}{path}"))
        .await
        .with_context(|| format!("GET {path} failed"))
}

/// Poll `check` until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
