//! Server list, over HTTP or the TCP command port.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::http::{base_url, get_text};
use super::Target;

pub async fn cmd_list(target: &Target) -> Result<()> {
    let url = format!("{}/retrieve.do?action=list&name=muster-ctl", base_url(target));
    print_list(&get_text(&url).await?);
    Ok(())
}

pub async fn cmd_list_tcp(target: &Target) -> Result<()> {
    let addr = SocketAddr::new(target.host, target.tcp_port);
    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to musterd at {addr}, is it running?"))?;
    stream.write_all(b"list\n").await?;

    let mut reply = String::new();
    stream
        .read_to_string(&mut reply)
        .await
        .context("failed to read server list")?;
    print_list(&reply);
    Ok(())
}

fn print_list(list: &str) {
    if list.is_empty() {
        println!("No servers registered.");
        return;
    }
    for line in list.lines() {
        println!("{line}");
    }
}
