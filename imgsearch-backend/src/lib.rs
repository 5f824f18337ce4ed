//! Backend process management for the image search shell.
//!
//! The shell launches one backend (a bundled executable or a Python
//! interpreter running the API module), watches its output, and decides when
//! it is ready to serve the frontend:
//! - [`PathResolver`] finds the backend and the frontend bundle on disk
//! - [`ProcessSupervisor`] owns the single child process
//! - [`ReadinessGate`] races stdout markers, health polling and a grace timer

pub mod config;
pub mod error;
pub mod paths;
#[cfg(unix)]
pub mod pid;
pub mod readiness;
pub mod supervisor;

pub use config::{
    APP_TARGET, BackendDescriptor, BackendKind, DEFAULT_PORT, LOOPBACK_HOST, ReadinessConfig,
    SERVER_MODULE, backend_origin,
};
pub use error::SpawnError;
pub use paths::{PathResolver, ResourceLayout};
pub use readiness::{Readiness, ReadinessGate, ReadinessState, ReadySignal};
pub use supervisor::{LineStream, ProcessHandle, ProcessState, ProcessSupervisor, Supervisor};

pub use imgsearch_probes::{HealthCheck, HttpHealthCheck, ProbeFailure};
