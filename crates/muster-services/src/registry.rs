//! The live map of registered hosts.
//!
//! Records enter as `Pending`, become visible to queries once the admission
//! handshake succeeds, and leave either through a failed admission, by being
//! superseded, or through the staleness sweep. Every removal invalidates the
//! record while the map shard is still locked, so no reader ever finds an
//! `Invalid` record in the map.
//!
//! The admission handshake runs outside any map lock. Lock order is always
//! map shard → record state, never the reverse.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, watch};

use muster_core::config::RegistryConfig;
use muster_core::wire::{render_server_list, Endpoint};

use crate::probe::{AdmitError, Prober};
use crate::record::{ConnectionId, RecordKey, RegistrationStatus, ServerIdentity, ServerRecord};

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Heartbeat age after which an active record is evicted.
    pub stale_after: Duration,
    pub sweep_interval: Duration,
    /// Whether a registration from one connection may supersede a live
    /// record registered from another.
    pub allow_reregistration: bool,
}

impl From<&RegistryConfig> for RegistrySettings {
    fn from(config: &RegistryConfig) -> Self {
        Self {
            stale_after: config.stale_after(),
            sweep_interval: config.sweep_interval(),
            allow_reregistration: config.allow_reregistration,
        }
    }
}

/// Why a registration did not produce an active record.
///
/// The `Display` text is what the registrant sees after `failreg`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    #[error("failed to ping server")]
    Unreachable { attempts: u32 },
    #[error("already registered")]
    AlreadyRegistered,
    #[error("registration superseded")]
    Superseded,
    #[error("registry shutting down")]
    ShuttingDown,
}

/// One row of the status view.
#[derive(Debug, Clone, Serialize)]
pub struct RecordSummary {
    pub address: String,
    pub name: String,
    pub version: i32,
    pub key: i64,
    pub status: RegistrationStatus,
    pub last_heartbeat_secs: u64,
}

pub struct Registry {
    records: DashMap<RecordKey, Arc<ServerRecord>>,
    prober: Arc<Prober>,
    settings: RegistrySettings,
    closing: AtomicBool,
    /// Registrations currently between entry and verdict.
    admissions: watch::Sender<usize>,
}

/// Counts one in-flight registration for [`Registry::stop`] to drain.
struct AdmissionGuard<'a>(&'a watch::Sender<usize>);

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n -= 1);
    }
}

impl Registry {
    pub fn new(prober: Arc<Prober>, settings: RegistrySettings) -> Self {
        let (admissions, _) = watch::channel(0);
        Self {
            records: DashMap::new(),
            prober,
            settings,
            closing: AtomicBool::new(false),
            admissions,
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    pub fn prober(&self) -> &Arc<Prober> {
        &self.prober
    }

    /// Records in the map, pending and active.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, key: &RecordKey) -> Option<Arc<ServerRecord>> {
        self.records.get(key).map(|r| r.value().clone())
    }

    // ── Registration ──────────────────────────────────────────────────────────

    /// Admit a host and start monitoring it.
    ///
    /// Blocks for the admission handshake, at most
    /// `admit_attempts × admit_timeout`. On failure nothing of the record
    /// remains in the registry.
    pub async fn register(
        &self,
        identity: ServerIdentity,
        origin: ConnectionId,
    ) -> Result<Arc<ServerRecord>, RegisterError> {
        let _admission = self.begin_admission()?;

        let record = Arc::new(ServerRecord::new(identity, origin));
        let key = record.key();
        self.track(record.clone())?;

        // A concurrent stop() may have swept the map before our insert landed.
        if self.closing.load(Ordering::SeqCst) {
            self.forget(&record);
            return Err(RegisterError::ShuttingDown);
        }

        let wait = match self.prober.initial_admit(&record).await {
            Ok(wait) => wait,
            Err(e) => {
                self.forget(&record);
                let err = self.admission_failure(e);
                tracing::info!(server = %key, reason = %err, "failed to register server");
                return Err(err);
            }
        };

        if !record.activate() {
            self.prober.release(&record).await;
            self.forget(&record);
            let err = self.admission_failure(AdmitError::Retired);
            tracing::info!(server = %key, reason = %err, "failed to register server");
            return Err(err);
        }

        self.prober.maintain(record.clone(), wait);

        let identity = record.identity();
        tracing::info!(
            server = %key,
            name = %identity.name,
            version = identity.version,
            "server successfully registered"
        );
        Ok(record)
    }

    fn begin_admission(&self) -> Result<AdmissionGuard<'_>, RegisterError> {
        self.admissions.send_modify(|n| *n += 1);
        let guard = AdmissionGuard(&self.admissions);
        if self.closing.load(Ordering::SeqCst) {
            return Err(RegisterError::ShuttingDown);
        }
        Ok(guard)
    }

    /// Insert a `Pending` record, superseding any record under the same key.
    pub(crate) fn track(&self, record: Arc<ServerRecord>) -> Result<(), RegisterError> {
        let key = record.key();
        match self.records.entry(key) {
            Entry::Occupied(mut slot) => {
                let current = slot.get();
                if !self.settings.allow_reregistration && current.origin() != record.origin() {
                    tracing::info!(
                        server = %key,
                        owner = %current.origin(),
                        from = %record.origin(),
                        "rejecting re-registration from another connection"
                    );
                    return Err(RegisterError::AlreadyRegistered);
                }
                current.invalidate();
                let old = slot.insert(record);
                tracing::info!(server = %key, old_record = old.id(), "superseding registration");
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }
        Ok(())
    }

    /// Remove `record` if it still owns its key, and retire it either way.
    fn forget(&self, record: &Arc<ServerRecord>) -> bool {
        let removed = self
            .records
            .remove_if(&record.key(), |_, current| {
                if Arc::ptr_eq(current, record) {
                    current.invalidate();
                    true
                } else {
                    false
                }
            })
            .is_some();
        record.invalidate();
        removed
    }

    fn admission_failure(&self, err: AdmitError) -> RegisterError {
        if self.closing.load(Ordering::SeqCst) {
            return RegisterError::ShuttingDown;
        }
        match err {
            AdmitError::Timeout { attempts } => RegisterError::Unreachable { attempts },
            AdmitError::Retired | AdmitError::Displaced => RegisterError::Superseded,
        }
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// Endpoints of every active record, in no particular order.
    pub fn list_active(&self) -> Vec<Endpoint> {
        self.records
            .iter()
            .filter_map(|entry| entry.value().active_endpoint())
            .collect()
    }

    /// [`Registry::list_active`] rendered as `addserver` directives.
    pub fn server_list(&self) -> String {
        render_server_list(&self.list_active())
    }

    pub fn records(&self) -> Vec<RecordSummary> {
        self.records
            .iter()
            .map(|entry| {
                let record = entry.value();
                let identity = record.identity();
                RecordSummary {
                    address: entry.key().to_string(),
                    name: identity.name.clone(),
                    version: identity.version,
                    key: identity.key,
                    status: record.status(),
                    last_heartbeat_secs: record.since_heartbeat().as_secs(),
                }
            })
            .collect()
    }

    // ── Staleness ─────────────────────────────────────────────────────────────

    /// Evict every active record whose heartbeat is older than `stale_after`.
    /// Returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let stale_after = self.settings.stale_after;
        let mut evicted = Vec::new();

        self.records.retain(|key, record| {
            if record.expire_if_stale(stale_after) {
                evicted.push(*key);
                false
            } else {
                true
            }
        });

        for key in &evicted {
            tracing::info!(server = %key, "unregistering server (unresponsive)");
        }
        evicted.len()
    }

    /// Sweep on a fixed period until shutdown.
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.settings.sweep_interval);

        tracing::info!(
            interval_secs = self.settings.sweep_interval.as_secs(),
            stale_after_secs = self.settings.stale_after.as_secs(),
            "staleness sweep starting"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("staleness sweep shutting down");
                    return;
                }
                _ = interval.tick() => {
                    let evicted = self.sweep();
                    if evicted > 0 {
                        tracing::debug!(evicted, remaining = self.len(), "sweep complete");
                    }
                }
            }
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Refuse new registrations, retire every record and wait for in-flight
    /// admissions to finish. Heartbeat tasks wind down on their own once
    /// their records are retired.
    pub async fn stop(&self) {
        self.closing.store(true, Ordering::SeqCst);

        let mut retired = 0usize;
        self.records.retain(|_, record| {
            record.invalidate();
            retired += 1;
            false
        });

        let mut admissions = self.admissions.subscribe();
        let _ = admissions.wait_for(|n| *n == 0).await;

        tracing::info!(retired, "registry stopped");
    }
}
