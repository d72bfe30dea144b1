//! Configuration system for muster.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $MUSTER_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/muster/config.toml
//!   3. ~/.config/muster/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MusterConfig {
    pub network: NetworkConfig,
    pub liveness: LivenessConfig,
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address all listeners bind to.
    pub bind_host: String,
    /// TCP port for `regserv` / `list` commands.
    pub tcp_port: u16,
    /// UDP port heartbeat probes are sent from and acknowledged to.
    pub udp_port: u16,
    /// HTTP port for `/retrieve.do` and `/api/status`.
    pub http_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Probes sent during admission before the registration fails.
    pub admit_attempts: u32,
    /// How long each admission probe waits for an acknowledgement.
    pub admit_timeout_secs: u64,
    /// Period between steady-state heartbeat probes.
    pub heartbeat_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Period between staleness sweeps.
    pub sweep_interval_secs: u64,
    /// Heartbeat age after which an active server is evicted.
    pub stale_after_secs: u64,
    /// Whether a new connection may take over a key registered by another.
    pub allow_reregistration: bool,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            tcp_port: 3333,
            udp_port: 3333,
            http_port: 8090,
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            admit_attempts: 5,
            admit_timeout_secs: 12,
            heartbeat_interval_secs: 12 * 60,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 30,
            stale_after_secs: 65 * 60,
            allow_reregistration: true,
        }
    }
}

impl LivenessConfig {
    pub fn admit_timeout(&self) -> Duration {
        Duration::from_secs(self.admit_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

impl RegistryConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("muster")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid setting {0}: {1}")]
    Invalid(&'static str, &'static str),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MusterConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            MusterConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document; missing sections and fields fall back to defaults.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("MUSTER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&MusterConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject settings the liveness protocol cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.liveness.admit_attempts == 0 {
            return Err(ConfigError::Invalid("liveness.admit_attempts", "must be at least 1"));
        }
        if self.liveness.admit_timeout_secs == 0 {
            return Err(ConfigError::Invalid("liveness.admit_timeout_secs", "must be non-zero"));
        }
        if self.liveness.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "liveness.heartbeat_interval_secs",
                "must be non-zero",
            ));
        }
        if self.registry.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("registry.sweep_interval_secs", "must be non-zero"));
        }
        if self.registry.stale_after_secs == 0 {
            return Err(ConfigError::Invalid("registry.stale_after_secs", "must be non-zero"));
        }
        // Otherwise healthy hosts are evicted between two heartbeats.
        if self.registry.stale_after_secs <= self.liveness.heartbeat_interval_secs {
            return Err(ConfigError::Invalid(
                "registry.stale_after_secs",
                "must exceed liveness.heartbeat_interval_secs",
            ));
        }
        Ok(())
    }

    /// Apply MUSTER_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("MUSTER_NETWORK__BIND_HOST") {
            self.network.bind_host = v;
        }
        override_parsed(&lookup, "MUSTER_NETWORK__TCP_PORT", &mut self.network.tcp_port);
        override_parsed(&lookup, "MUSTER_NETWORK__UDP_PORT", &mut self.network.udp_port);
        override_parsed(&lookup, "MUSTER_NETWORK__HTTP_PORT", &mut self.network.http_port);
        override_parsed(
            &lookup,
            "MUSTER_LIVENESS__ADMIT_ATTEMPTS",
            &mut self.liveness.admit_attempts,
        );
        override_parsed(
            &lookup,
            "MUSTER_LIVENESS__ADMIT_TIMEOUT_SECS",
            &mut self.liveness.admit_timeout_secs,
        );
        override_parsed(
            &lookup,
            "MUSTER_LIVENESS__HEARTBEAT_INTERVAL_SECS",
            &mut self.liveness.heartbeat_interval_secs,
        );
        override_parsed(
            &lookup,
            "MUSTER_REGISTRY__SWEEP_INTERVAL_SECS",
            &mut self.registry.sweep_interval_secs,
        );
        override_parsed(
            &lookup,
            "MUSTER_REGISTRY__STALE_AFTER_SECS",
            &mut self.registry.stale_after_secs,
        );
        if let Some(v) = lookup("MUSTER_REGISTRY__ALLOW_REREGISTRATION") {
            self.registry.allow_reregistration = v == "true" || v == "1";
        }
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(v) = lookup(key) {
        if let Ok(parsed) = v.parse() {
            *slot = parsed;
        }
    }
}
