//! CLI command modules.

pub mod announce;
pub mod http;
pub mod list;
pub mod status;

use std::net::IpAddr;

/// Where the daemon is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: IpAddr,
    pub http_port: u16,
    pub tcp_port: u16,
}
