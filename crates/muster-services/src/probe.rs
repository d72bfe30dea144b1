//! UDP liveness probing.
//!
//! One socket carries every probe and every acknowledgement. A probe is a
//! single byte sent to the server's registered port + 1; any datagram coming
//! back from `A:S` acknowledges the server registered as `A:(S-1)`.
//!
//! Acknowledgements are routed through per-record wait handles: a single-slot
//! channel registered under the record's key before its first probe goes out
//! and released once the record leaves service.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use muster_core::config::LivenessConfig;
use muster_core::wire::PROBE_PAYLOAD;

use crate::record::{RecordKey, RegistrationStatus, ServerRecord};

/// Timing of the admission handshake and the steady-state heartbeat.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub admit_attempts: u32,
    pub admit_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl From<&LivenessConfig> for ProbeSettings {
    fn from(config: &LivenessConfig) -> Self {
        Self {
            admit_attempts: config.admit_attempts,
            admit_timeout: config.admit_timeout(),
            heartbeat_interval: config.heartbeat_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmitError {
    #[error("no acknowledgement after {attempts} attempts")]
    Timeout { attempts: u32 },
    #[error("record retired during admission")]
    Retired,
    #[error("wait handle taken over by a newer registration")]
    Displaced,
}

/// Receiving side of a record's wait handle. Returned by a successful
/// admission and consumed by the heartbeat receiver.
#[derive(Debug)]
pub struct WaitHandle {
    key: RecordKey,
    rx: mpsc::Receiver<()>,
}

impl WaitHandle {
    pub fn key(&self) -> RecordKey {
        self.key
    }
}

struct Waiter {
    record_id: u64,
    tx: mpsc::Sender<()>,
}

/// The two tasks monitoring one active record.
pub struct HeartbeatTasks {
    pub sender: JoinHandle<()>,
    pub receiver: JoinHandle<()>,
}

impl HeartbeatTasks {
    pub fn is_finished(&self) -> bool {
        self.sender.is_finished() && self.receiver.is_finished()
    }
}

pub struct Prober {
    socket: UdpSocket,
    waiters: Mutex<HashMap<RecordKey, Waiter>>,
    settings: ProbeSettings,
}

impl Prober {
    pub fn new(socket: UdpSocket, settings: ProbeSettings) -> Arc<Self> {
        Arc::new(Self {
            socket,
            waiters: Mutex::new(HashMap::new()),
            settings,
        })
    }

    pub async fn bind(addr: SocketAddr, settings: ProbeSettings) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("failed to bind heartbeat socket on {addr}"))?;
        Ok(Self::new(socket, settings))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// Number of records currently holding a wait handle.
    pub async fn wait_handles(&self) -> usize {
        self.waiters.lock().await.len()
    }

    // ── Receive loop ──────────────────────────────────────────────────────────

    /// Route every inbound datagram to the record awaiting it.
    ///
    /// Runs until the socket fails. An error here is fatal to liveness
    /// monitoring as a whole: the caller is expected to stop the process.
    pub async fn run_receiver(self: Arc<Self>) -> Result<()> {
        let mut buf = vec![0u8; 5000];

        tracing::info!(addr = ?self.local_addr().ok(), "heartbeat receiver starting");

        loop {
            let from = match self.socket.recv_from(&mut buf).await {
                Ok((_, from)) => from,
                // Some platforms surface an ICMP unreachable from an earlier
                // probe as a receive error on an unconnected socket.
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                    tracing::debug!(error = %e, "ignoring reset from earlier probe");
                    continue;
                }
                Err(e) => return Err(e).context("heartbeat socket receive failed"),
            };
            self.deliver(from).await;
        }
    }

    /// Signal the wait handle an acknowledgement from `from` belongs to.
    pub(crate) async fn deliver(&self, from: SocketAddr) -> bool {
        let Some(key) = RecordKey::acknowledged_by(from) else {
            tracing::warn!(%from, "acknowledgement from port 0, dropping");
            return false;
        };

        tracing::debug!(%from, server = %key, "received pong");

        let waiters = self.waiters.lock().await;
        match waiters.get(&key) {
            // A full slot already holds an undelivered ack; they coalesce.
            Some(waiter) => match waiter.tx.try_send(()) {
                Ok(()) | Err(mpsc::error::TrySendError::Full(())) => true,
                Err(mpsc::error::TrySendError::Closed(())) => {
                    tracing::debug!(server = %key, "wait handle closed, dropping pong");
                    false
                }
            },
            None => {
                tracing::warn!(server = %key, "unable to find wait handle, dropping pong");
                false
            }
        }
    }

    // ── Wait handles ──────────────────────────────────────────────────────────

    /// Install the record's wait handle. A retired record gets none, so it
    /// can never take over the handle of the record that superseded it.
    async fn open_wait_handle(&self, record: &ServerRecord) -> Result<WaitHandle, AdmitError> {
        let key = record.key();
        let mut waiters = self.waiters.lock().await;
        if record.status() == RegistrationStatus::Invalid {
            return Err(AdmitError::Retired);
        }
        let (tx, rx) = mpsc::channel(1);
        let displaced = waiters.insert(
            key,
            Waiter {
                record_id: record.id(),
                tx,
            },
        );
        if let Some(old) = displaced {
            tracing::debug!(server = %key, old_record = old.record_id, "wait handle displaced");
        }
        Ok(WaitHandle { key, rx })
    }

    /// Drop the record's wait handle, unless a newer record for the same key
    /// has replaced it.
    pub async fn release(&self, record: &ServerRecord) -> bool {
        let key = record.key();
        let mut waiters = self.waiters.lock().await;
        if waiters.get(&key).is_some_and(|w| w.record_id == record.id()) {
            waiters.remove(&key);
            true
        } else {
            false
        }
    }

    async fn send_probe(&self, key: RecordKey) {
        let Some(dest) = key.probe_addr() else {
            tracing::warn!(server = %key, "no probe port for server");
            return;
        };
        tracing::debug!(server = %key, %dest, "sending ping");
        if let Err(e) = self.socket.send_to(&PROBE_PAYLOAD, dest).await {
            tracing::warn!(server = %key, error = %e, "ping send failed");
        }
    }

    // ── Admission ─────────────────────────────────────────────────────────────

    /// Probe until the first acknowledgement or until the attempt budget is spent.
    ///
    /// On success the heartbeat timestamp is recorded and the wait handle is
    /// handed back for [`Prober::maintain`]. On failure the handle is released.
    pub async fn initial_admit(&self, record: &ServerRecord) -> Result<WaitHandle, AdmitError> {
        let key = record.key();
        let mut wait = self.open_wait_handle(record).await?;
        let attempts = self.settings.admit_attempts;

        let retired = record.retired();
        tokio::pin!(retired);

        for attempt in 1..=attempts {
            self.send_probe(key).await;

            tokio::select! {
                ack = time::timeout(self.settings.admit_timeout, wait.rx.recv()) => match ack {
                    Ok(Some(())) => {
                        record.touch();
                        tracing::info!(server = %key, attempt, "initial ping success");
                        return Ok(wait);
                    }
                    Ok(None) => return Err(AdmitError::Displaced),
                    Err(_) => {
                        tracing::info!(server = %key, attempt, "initial ping timeout");
                    }
                },
                _ = &mut retired => {
                    self.release(record).await;
                    return Err(AdmitError::Retired);
                }
            }
        }

        self.release(record).await;
        Err(AdmitError::Timeout { attempts })
    }

    // ── Steady state ──────────────────────────────────────────────────────────

    /// Start the heartbeat pair for an admitted record.
    ///
    /// Both tasks end once the record is retired. No failure is declared
    /// here; a silent host is left for the registry's sweep.
    pub fn maintain(
        self: &Arc<Self>,
        record: Arc<ServerRecord>,
        wait: WaitHandle,
    ) -> HeartbeatTasks {
        let sender = tokio::spawn(self.clone().heartbeat_sender(record.clone()));
        let receiver = tokio::spawn(heartbeat_receiver(record, wait));
        HeartbeatTasks { sender, receiver }
    }

    async fn heartbeat_sender(self: Arc<Self>, record: Arc<ServerRecord>) {
        let key = record.key();
        let period = self.settings.heartbeat_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let retired = record.retired();
        tokio::pin!(retired);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !record.is_active() {
                        break;
                    }
                    self.send_probe(key).await;
                }
                _ = &mut retired => break,
            }
        }

        // Dropping the sender half ends the receiver task as well.
        self.release(&record).await;
        tracing::debug!(server = %key, "heartbeat stopped");
    }
}

async fn heartbeat_receiver(record: Arc<ServerRecord>, mut wait: WaitHandle) {
    let retired = record.retired();
    tokio::pin!(retired);

    loop {
        tokio::select! {
            ack = wait.rx.recv() => match ack {
                Some(()) => {
                    record.touch();
                }
                None => break,
            },
            _ = &mut retired => break,
        }
    }
}
