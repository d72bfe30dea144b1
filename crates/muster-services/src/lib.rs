//! muster-services — the registry and liveness subsystem.
//!
//! [`Registry`] owns the live server map and the registration workflow,
//! [`Prober`] verifies and monitors each host over UDP.

pub mod probe;
pub mod record;
pub mod registry;


pub use probe::{AdmitError, HeartbeatTasks, Prober, ProbeSettings, WaitHandle};
pub use record::{ConnectionId, RecordKey, RegistrationStatus, ServerIdentity, ServerRecord};
pub use registry::{RecordSummary, RegisterError, Registry, RegistrySettings};
