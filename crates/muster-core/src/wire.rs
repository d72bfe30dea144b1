//! muster wire format: the TCP command grammar, its replies and the
//! heartbeat datagram conventions.
//!
//! Commands are single lines of whitespace-separated tokens:
//!
//!   regserv <port> <name> <version> <key>
//!   list [<name> <version>]
//!
//! Replies are `succreg`, `failreg <reason>`, `error <reason>` (each
//! newline-terminated) or the rendered server list.

use std::fmt;
use std::net::IpAddr;

/// Payload of every heartbeat probe. Hosts do not inspect it.
pub const PROBE_PAYLOAD: [u8; 1] = [1];

/// Highest port a server may register; probes go to `port + 1`.
pub const MAX_REGISTER_PORT: u16 = u16::MAX - 1;

/// UDP port a probe for a server registered on `port` is sent to.
pub fn probe_port(port: u16) -> Option<u16> {
    port.checked_add(1)
}

/// Registered port acknowledged by a datagram sent from `source_port`.
pub fn acknowledged_port(source_port: u16) -> Option<u16> {
    source_port.checked_sub(1)
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List(ListRequest),
    Register(RegisterRequest),
}

/// `list [<name> <version>]`. The client fields are informational only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    pub name: Option<String>,
    pub version: Option<i32>,
}

/// `regserv <port> <name> <version> <key>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    pub port: u16,
    pub name: String,
    pub version: i32,
    /// Opaque to the registry, carried through unchanged.
    pub key: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("empty command")]
    Empty,
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("invalid port")]
    InvalidPort,
    #[error("malformed arguments to regserv")]
    MalformedRegistration,
    #[error("malformed arguments to list")]
    MalformedList,
}

impl WireError {
    /// The reply sent before the connection is closed.
    pub fn reply(&self) -> Reply {
        match self {
            WireError::InvalidPort => Reply::FailReg("invalid port".to_string()),
            WireError::MalformedRegistration => Reply::FailReg("malformed arguments".to_string()),
            WireError::MalformedList => Reply::Error("malformed arguments".to_string()),
            WireError::UnknownCommand(_) => Reply::Error("unknown command".to_string()),
            WireError::Empty => Reply::Error("empty command".to_string()),
        }
    }
}

impl Command {
    /// Parse one command line. Surrounding whitespace is ignored.
    pub fn parse(line: &str) -> Result<Command, WireError> {
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            None => Err(WireError::Empty),
            Some("list") => parse_list(tokens),
            Some("regserv") => parse_register(tokens),
            Some(other) => Err(WireError::UnknownCommand(other.to_string())),
        }
    }
}

fn parse_list<'a>(mut tokens: impl Iterator<Item = &'a str>) -> Result<Command, WireError> {
    let Some(name) = tokens.next() else {
        return Ok(Command::List(ListRequest::default()));
    };
    let version = tokens
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or(WireError::MalformedList)?;
    Ok(Command::List(ListRequest {
        name: Some(name.to_string()),
        version: Some(version),
    }))
}

fn parse_register<'a>(mut tokens: impl Iterator<Item = &'a str>) -> Result<Command, WireError> {
    let mut next = || tokens.next().ok_or(WireError::MalformedRegistration);

    // All four fields must be present before the port range is judged.
    let port: i64 = next()?.parse().map_err(|_| WireError::MalformedRegistration)?;
    let name = next()?.to_string();
    let version = next()?.parse().map_err(|_| WireError::MalformedRegistration)?;
    let key = next()?.parse().map_err(|_| WireError::MalformedRegistration)?;

    let port = u16::try_from(port)
        .ok()
        .filter(|p| *p <= MAX_REGISTER_PORT)
        .ok_or(WireError::InvalidPort)?;

    Ok(Command::Register(RegisterRequest {
        port,
        name,
        version,
        key,
    }))
}

// ── Replies ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    SuccReg,
    FailReg(String),
    ServerList(String),
    Error(String),
}

impl Reply {
    pub fn render(&self) -> String {
        match self {
            Reply::SuccReg => "succreg\n".to_string(),
            Reply::FailReg(reason) => format!("failreg {reason}\n"),
            Reply::ServerList(list) => list.clone(),
            Reply::Error(reason) => format!("error {reason}\n"),
        }
    }
}

// ── Server list ───────────────────────────────────────────────────────────────

/// A reachable server as advertised to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "addserver {} {}", self.ip, self.port)
    }
}

/// Render endpoints as newline-joined `addserver` directives.
pub fn render_server_list(endpoints: &[Endpoint]) -> String {
    endpoints
        .iter()
        .map(Endpoint::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}
