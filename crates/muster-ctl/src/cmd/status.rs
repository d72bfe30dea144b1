//! Registry status.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json};
use super::Target;

#[derive(Deserialize)]
struct StatusResponse {
    active: usize,
    pending: usize,
    servers: Vec<ServerInfo>,
}

#[derive(Deserialize)]
struct ServerInfo {
    address: String,
    name: String,
    version: i32,
    key: i64,
    status: String,
    last_heartbeat_secs: u64,
}

pub async fn cmd_status(target: &Target) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/api/status", base_url(target))).await?;

    println!("═══════════════════════════════════════");
    println!("  muster Registry Status");
    println!("═══════════════════════════════════════");
    println!("  Active servers  : {}", resp.active);
    println!("  Pending         : {}", resp.pending);

    if resp.servers.is_empty() {
        println!("\n  No servers registered.");
        return Ok(());
    }

    println!("\n  Servers:");
    for s in &resp.servers {
        println!("  ┌─ {}", s.address);
        println!("  │  name      : {} (v{})", s.name, s.version);
        println!("  │  key       : {}", s.key);
        println!("  │  status    : {}", s.status);
        println!("  └─ heartbeat : {}s ago", s.last_heartbeat_secs);
    }

    Ok(())
}
