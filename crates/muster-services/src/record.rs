//! Server records, the registry's unit of tracked state.
//!
//! A record's status and heartbeat timestamp live behind one `watch`
//! channel: reads see both fields from the same write, and every status
//! change wakes the record's heartbeat tasks. Heartbeat updates are silent
//! modifications so they never wake anyone.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use muster_core::wire::{acknowledged_port, probe_port, Endpoint};

static NEXT_RECORD_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

// ── Keys and identities ───────────────────────────────────────────────────────

/// `address:port` of a registered server. Unique within the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordKey(SocketAddr);

impl RecordKey {
    /// IPv4-mapped IPv6 addresses are folded to IPv4 so that keys built from
    /// a dual-stack TCP peer and a dual-stack UDP source agree.
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self(SocketAddr::new(ip.to_canonical(), port))
    }

    /// Key of the server a heartbeat acknowledgement sent from `source` answers for.
    pub fn acknowledged_by(source: SocketAddr) -> Option<Self> {
        acknowledged_port(source.port()).map(|port| Self::new(source.ip(), port))
    }

    pub fn ip(&self) -> IpAddr {
        self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    /// Where heartbeat probes for this server are sent.
    pub fn probe_addr(&self) -> Option<SocketAddr> {
        probe_port(self.port()).map(|port| SocketAddr::new(self.ip(), port))
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The TCP connection a registration arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a host declared when it registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    pub ip: IpAddr,
    pub port: u16,
    pub name: String,
    pub version: i32,
    /// Opaque, carried through unchanged.
    pub key: i64,
}

impl ServerIdentity {
    pub fn new(ip: IpAddr, port: u16, name: impl Into<String>, version: i32, key: i64) -> Self {
        Self {
            ip: ip.to_canonical(),
            port,
            name: name.into(),
            version,
            key,
        }
    }

    pub fn record_key(&self) -> RecordKey {
        RecordKey::new(self.ip, self.port)
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            ip: self.ip,
            port: self.port,
        }
    }
}

// ── Status ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    /// Admission handshake in progress.
    Pending,
    /// Heartbeat-confirmed, visible to queries.
    Active,
    /// Terminal. The record has left the registry.
    Invalid,
}

#[derive(Debug, Clone, Copy)]
pub struct RecordState {
    pub status: RegistrationStatus,
    pub last_heartbeat: Instant,
}

// ── Record ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ServerRecord {
    id: u64,
    identity: ServerIdentity,
    origin: ConnectionId,
    state: watch::Sender<RecordState>,
}

impl ServerRecord {
    /// A fresh `Pending` record.
    pub fn new(identity: ServerIdentity, origin: ConnectionId) -> Self {
        let (state, _) = watch::channel(RecordState {
            status: RegistrationStatus::Pending,
            last_heartbeat: Instant::now(),
        });
        Self {
            id: NEXT_RECORD_ID.fetch_add(1, Ordering::Relaxed),
            identity,
            origin,
            state,
        }
    }

    /// Unique per record, distinguishes successive records for the same key.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> RecordKey {
        self.identity.record_key()
    }

    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    pub fn origin(&self) -> ConnectionId {
        self.origin
    }

    pub fn state(&self) -> RecordState {
        *self.state.borrow()
    }

    pub fn status(&self) -> RegistrationStatus {
        self.state.borrow().status
    }

    pub fn is_active(&self) -> bool {
        self.status() == RegistrationStatus::Active
    }

    pub fn since_heartbeat(&self) -> Duration {
        self.state.borrow().last_heartbeat.elapsed()
    }

    /// The advertised endpoint, only while the record is `Active`.
    pub fn active_endpoint(&self) -> Option<Endpoint> {
        self.is_active().then(|| self.identity.endpoint())
    }

    /// Record a heartbeat now. Ignored once the record is `Invalid`.
    pub fn touch(&self) -> bool {
        let now = Instant::now();
        let mut touched = false;
        self.state.send_if_modified(|s| {
            if s.status != RegistrationStatus::Invalid {
                s.last_heartbeat = s.last_heartbeat.max(now);
                touched = true;
            }
            false
        });
        touched
    }

    /// `Pending` → `Active`. Fails if the record was retired meanwhile.
    pub fn activate(&self) -> bool {
        self.state.send_if_modified(|s| {
            if s.status == RegistrationStatus::Pending {
                s.status = RegistrationStatus::Active;
                true
            } else {
                false
            }
        })
    }

    /// Move to the terminal state. Returns false if already `Invalid`.
    pub fn invalidate(&self) -> bool {
        self.state.send_if_modified(|s| {
            if s.status != RegistrationStatus::Invalid {
                s.status = RegistrationStatus::Invalid;
                true
            } else {
                false
            }
        })
    }

    /// Invalidate an `Active` record whose heartbeat is older than `stale_after`.
    /// The age check and the transition happen under the same borrow as
    /// heartbeat updates, so a concurrent `touch` is never lost half-way.
    pub fn expire_if_stale(&self, stale_after: Duration) -> bool {
        self.state.send_if_modified(|s| {
            if s.status == RegistrationStatus::Active && s.last_heartbeat.elapsed() > stale_after {
                s.status = RegistrationStatus::Invalid;
                true
            } else {
                false
            }
        })
    }

    /// Resolves once the record is `Invalid`.
    pub async fn retired(&self) {
        let mut rx = self.state.subscribe();
        // `self` owns the sender, so this can only end on the predicate.
        let _ = rx
            .wait_for(|s| s.status == RegistrationStatus::Invalid)
            .await;
    }
}
