//! HTTP handlers: the server list for clients and registry state as JSON.

pub mod retrieve;
pub mod status;

use std::sync::Arc;

use muster_services::Registry;

#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<Registry>,
}

pub use retrieve::handle_retrieve;
pub use status::handle_status;
