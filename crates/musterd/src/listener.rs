//! TCP command listener.
//!
//! Each connection is served by its own task. A read is split on newlines
//! and every piece handled as one command; a read without a newline is a
//! single command.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use muster_services::Registry;

use crate::command::{ClientSession, Next};

const READ_BUFFER: usize = 4096;

pub async fn listener_loop(
    listener: TcpListener,
    registry: Arc<Registry>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    tracing::info!(addr = ?listener.local_addr().ok(), "TCP command listener starting");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("TCP command listener shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(a) => a,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let registry = registry.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, peer, registry).await {
                        tracing::debug!(%peer, error = %e, "connection ended with error");
                    }
                });
            }
        }
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<Registry>,
) -> Result<()> {
    let mut session = ClientSession::new(peer, registry);
    let mut buf = vec![0u8; READ_BUFFER];

    tracing::debug!(%peer, conn = %session.id(), "connection accepted");

    loop {
        let n = stream.read(&mut buf).await.context("read failed")?;
        if n == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&buf[..n]).into_owned();

        for line in text.lines() {
            let (reply, next) = session.handle_line(line).await;
            if let Some(reply) = reply {
                stream
                    .write_all(reply.render().as_bytes())
                    .await
                    .context("write failed")?;
            }
            if next == Next::Close {
                let _ = stream.shutdown().await;
                tracing::debug!(%peer, conn = %session.id(), "connection closed");
                return Ok(());
            }
        }
    }

    // The registration, if any, outlives the connection.
    tracing::debug!(%peer, conn = %session.id(), "client disconnected");
    Ok(())
}
