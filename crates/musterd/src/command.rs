//! Per-connection command handling: turns parsed protocol lines into
//! registry calls and replies.

use std::net::SocketAddr;
use std::sync::Arc;

use muster_core::wire::{Command, ListRequest, RegisterRequest, Reply, WireError};
use muster_services::{ConnectionId, RegisterError, Registry, ServerIdentity};

/// Whether the connection survives the command just handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    KeepOpen,
    Close,
}

/// State of one TCP client connection.
pub struct ClientSession {
    id: ConnectionId,
    peer: SocketAddr,
    /// Port of the last successful registration on this connection.
    registered_port: Option<u16>,
    registry: Arc<Registry>,
}

impl ClientSession {
    pub fn new(peer: SocketAddr, registry: Arc<Registry>) -> Self {
        Self {
            id: ConnectionId::next(),
            peer,
            registered_port: None,
            registry,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn registered_port(&self) -> Option<u16> {
        self.registered_port
    }

    /// Handle one command line. Blank lines are skipped without a reply.
    pub async fn handle_line(&mut self, line: &str) -> (Option<Reply>, Next) {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(WireError::Empty) => return (None, Next::KeepOpen),
            Err(e) => {
                tracing::warn!(peer = %self.peer, conn = %self.id, error = %e, "bad command");
                return (Some(e.reply()), Next::Close);
            }
        };

        match command {
            Command::List(request) => (Some(self.list(request)), Next::Close),
            Command::Register(request) => self.register(request).await,
        }
    }

    fn list(&self, request: ListRequest) -> Reply {
        tracing::info!(
            peer = %self.peer,
            client = request.name.as_deref().unwrap_or(""),
            version = ?request.version,
            "server list requested"
        );
        Reply::ServerList(self.registry.server_list())
    }

    async fn register(&mut self, request: RegisterRequest) -> (Option<Reply>, Next) {
        if self.registered_port.is_some_and(|port| port != request.port) {
            tracing::warn!(
                peer = %self.peer,
                conn = %self.id,
                port = request.port,
                "connection already registered a different port"
            );
            return (Some(WireError::InvalidPort.reply()), Next::Close);
        }

        let identity = ServerIdentity::new(
            self.peer.ip(),
            request.port,
            request.name,
            request.version,
            request.key,
        );

        match self.registry.register(identity, self.id).await {
            Ok(_) => {
                self.registered_port = Some(request.port);
                (Some(Reply::SuccReg), Next::KeepOpen)
            }
            // An unreachable host may fix its probe port and retry here.
            Err(e @ RegisterError::Unreachable { .. }) => {
                (Some(Reply::FailReg(e.to_string())), Next::KeepOpen)
            }
            Err(e) => (Some(Reply::FailReg(e.to_string())), Next::Close),
        }
    }
}
