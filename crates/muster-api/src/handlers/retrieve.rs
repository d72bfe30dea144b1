//! `/retrieve.do`: the server list for game clients.

use std::net::SocketAddr;

use axum::extract::rejection::QueryRejection;
use axum::extract::{ConnectInfo, Query, State};
use serde::Deserialize;

use super::ApiState;

/// What a client says about itself. Logged, never used to filter.
#[derive(Debug, Default, Deserialize)]
pub struct RetrieveQuery {
    pub action: Option<String>,
    pub name: Option<String>,
    pub version: Option<i32>,
    pub build: Option<i64>,
}

/// Always answers with the current list; a bad query string is only logged.
pub async fn handle_retrieve(
    State(state): State<ApiState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    query: Result<Query<RetrieveQuery>, QueryRejection>,
) -> String {
    match query {
        Ok(Query(q)) => tracing::info!(
            client = %peer.ip(),
            action = q.action.as_deref().unwrap_or(""),
            name = q.name.as_deref().unwrap_or(""),
            version = ?q.version,
            build = ?q.build,
            "server list requested"
        ),
        Err(e) => tracing::warn!(client = %peer.ip(), error = %e, "malformed retrieve query"),
    }

    state.registry.server_list()
}
