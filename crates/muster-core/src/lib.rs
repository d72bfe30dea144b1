//! muster-core — configuration and the registry's wire grammar.
//! Shared by the daemon, its services and the CLI.

pub mod config;
pub mod wire;

pub use config::MusterConfig;
pub use wire::{Command, Endpoint, RegisterRequest, Reply, WireError};
