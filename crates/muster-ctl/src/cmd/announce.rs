//! Register this machine as a host and answer heartbeats until interrupted.

use std::net::{Ipv4Addr, SocketAddr};

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UdpSocket};

use muster_core::wire::{probe_port, RegisterRequest};

use super::Target;

pub async fn cmd_announce(target: &Target, request: RegisterRequest) -> Result<()> {
    let probe_port = probe_port(request.port).context("port has no probe port")?;

    // Listen before registering: the admission probe arrives during regserv.
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, probe_port))
        .await
        .with_context(|| format!("failed to bind probe port {probe_port}"))?;
    let responder = tokio::spawn(answer_probes(socket));

    let addr = SocketAddr::new(target.host, target.tcp_port);
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to musterd at {addr}, is it running?"))?;
    let mut conn = BufReader::new(stream);

    let line = format!(
        "regserv {} {} {} {}\n",
        request.port, request.name, request.version, request.key
    );
    conn.get_mut().write_all(line.as_bytes()).await?;

    let mut reply = String::new();
    conn.read_line(&mut reply).await.context("no reply to regserv")?;
    match reply.trim_end() {
        "succreg" => println!(
            "Registered {} v{} on port {}. Answering heartbeats on {probe_port}, Ctrl-C to stop.",
            request.name, request.version, request.port
        ),
        "" => bail!("musterd closed the connection without replying"),
        other => bail!("registration refused: {other}"),
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => println!("Stopping."),
        r = responder => r.context("probe responder panicked")??,
    }
    Ok(())
}

async fn answer_probes(socket: UdpSocket) -> Result<()> {
    let mut buf = [0u8; 64];
    loop {
        let (_, from) = socket.recv_from(&mut buf).await.context("probe receive failed")?;
        socket.send_to(b"pong", from).await.context("heartbeat reply failed")?;
    }
}
