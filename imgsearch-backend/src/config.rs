//! Backend invocation and readiness settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use imgsearch_probes::marker::DEFAULT_MARKERS;
use imgsearch_probes::{PollSchedule, StdoutMarkers};
use serde::{Deserialize, Serialize};
use url::Url;

/// Port the backend listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 8000;

/// The backend only ever binds to loopback.
pub const LOOPBACK_HOST: &str = "127.0.0.1";

/// ASGI server module run by the interpreter in development layouts.
pub const SERVER_MODULE: &str = "uvicorn";

/// Application object served by [`SERVER_MODULE`].
pub const APP_TARGET: &str = "api:app";

/// `http://127.0.0.1:<port>/`
pub fn backend_origin(port: u16) -> Result<Url, url::ParseError> {
    Url::parse(&format!("http://{}:{}/", LOOPBACK_HOST, port))
}

/// How the backend is launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Self-contained bundled executable
    NativeExecutable,
    /// Interpreter running the server module from the source tree
    InterpretedModule,
}

/// Resolved location and invocation parameters of the backend.
///
/// Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    executable: PathBuf,
    kind: BackendKind,
    args: Vec<String>,
    working_dir: PathBuf,
}

impl BackendDescriptor {
    /// `<executable> --port <port>`, run from the executable's directory.
    pub fn native(executable: PathBuf, port: u16) -> Self {
        let working_dir = executable
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            executable,
            kind: BackendKind::NativeExecutable,
            args: vec!["--port".to_string(), port.to_string()],
            working_dir,
        }
    }

    /// `<interpreter> -m uvicorn api:app --host 127.0.0.1 --port <port>`, run
    /// from the project root so the API module is importable.
    pub fn interpreted(interpreter: PathBuf, project_root: PathBuf, port: u16) -> Self {
        Self {
            executable: interpreter,
            kind: BackendKind::InterpretedModule,
            args: vec![
                "-m".to_string(),
                SERVER_MODULE.to_string(),
                APP_TARGET.to_string(),
                "--host".to_string(),
                LOOPBACK_HOST.to_string(),
                "--port".to_string(),
                port.to_string(),
            ],
            working_dir: project_root,
        }
    }

    /// Arbitrary command line. Used for alternative backends and test stubs.
    pub fn custom(
        executable: PathBuf,
        kind: BackendKind,
        args: Vec<String>,
        working_dir: PathBuf,
    ) -> Self {
        Self {
            executable,
            kind,
            args,
            working_dir,
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Human-readable command line for logs.
    pub fn command_line(&self) -> String {
        let mut line = self.executable.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Readiness gate tuning. Durations are milliseconds in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReadinessConfig {
    /// Stdout substrings that mean "listening" (case-insensitive)
    pub markers: Vec<String>,
    /// Pause between health checks
    pub probe_interval_ms: u64,
    /// Upper bound for one health check request
    pub probe_timeout_ms: u64,
    /// Number of health checks before polling gives up
    pub probe_attempts: u32,
    /// Absolute time after which the backend is assumed ready
    pub grace_timeout_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            markers: DEFAULT_MARKERS.iter().map(|m| m.to_string()).collect(),
            probe_interval_ms: 500,
            probe_timeout_ms: 2_000,
            probe_attempts: 30,
            grace_timeout_ms: 3_000,
        }
    }
}

impl ReadinessConfig {
    pub fn poll_schedule(&self) -> PollSchedule {
        PollSchedule {
            period: Duration::from_millis(self.probe_interval_ms),
            timeout: self.probe_timeout(),
            max_attempts: self.probe_attempts,
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn grace_timeout(&self) -> Duration {
        Duration::from_millis(self.grace_timeout_ms)
    }

    pub fn stdout_markers(&self) -> StdoutMarkers {
        StdoutMarkers::new(&self.markers)
    }
}
