//! Deciding when the backend can take requests.
//!
//! Three signals race from the moment the gate starts waiting:
//! a startup marker on stdout, a passing health check, and an absolute grace
//! timer. The first one wins; the others are dropped together with their
//! timers and in-flight requests.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use imgsearch_probes::{HealthCheck, HealthPoller, PollOutcome};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ReadinessConfig;
use crate::supervisor::{LineStream, ProcessHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    Pending,
    Ready,
}

/// Which signal resolved the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadySignal {
    /// The backend printed a startup marker.
    StdoutMarker { line: String },
    /// The health endpoint answered 200 on this attempt.
    HealthCheck { attempt: u32 },
    /// Nothing confirmed readiness in time; assumed ready.
    GraceTimer,
}

impl ReadySignal {
    /// Whether the backend itself confirmed it is up.
    pub fn is_confirmed(&self) -> bool {
        !matches!(self, ReadySignal::GraceTimer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    pub signal: ReadySignal,
    /// Time from gate start to resolution
    pub elapsed: Duration,
}

/// One startup attempt's readiness decision.
///
/// `wait` consumes the gate, so it can resolve only once.
#[derive(Debug)]
pub struct ReadinessGate {
    config: ReadinessConfig,
    state: watch::Sender<ReadinessState>,
}

impl ReadinessGate {
    pub fn new(config: ReadinessConfig) -> Self {
        let (state, _) = watch::channel(ReadinessState::Pending);
        Self { config, state }
    }

    /// Observe the gate's state from elsewhere.
    pub fn subscribe(&self) -> watch::Receiver<ReadinessState> {
        self.state.subscribe()
    }

    /// Race the backend's stdout, health polling and the grace timer.
    pub async fn wait(self, handle: &ProcessHandle, check: Arc<dyn HealthCheck>) -> Readiness {
        let lines = handle.take_stdout_lines();
        if lines.is_none() {
            debug!(
                "stdout of backend (pid {}) already taken, skipping marker detection",
                handle.pid()
            );
        }
        self.wait_on_lines(lines, check).await
    }

    /// Same race over any line source. `None` disables marker detection.
    pub async fn wait_on_lines(
        self,
        lines: Option<LineStream>,
        check: Arc<dyn HealthCheck>,
    ) -> Readiness {
        let started = Instant::now();
        let markers = self.config.stdout_markers();
        let mut poller =
            HealthPoller::spawn(check, "backend".to_string(), self.config.poll_schedule());
        let grace = tokio::time::sleep(self.config.grace_timeout());

        let marker_seen = async {
            let Some(mut lines) = lines else {
                return pending().await;
            };
            match markers.scan(&mut lines).await {
                Some(line) => line,
                None => pending().await,
            }
        };

        let healthy = async {
            match poller.recv().await {
                Some(PollOutcome::Healthy { attempt }) => attempt,
                Some(PollOutcome::Exhausted { attempts }) => {
                    warn!(
                        "Backend health check did not pass after {} attempts",
                        attempts
                    );
                    pending().await
                }
                None => pending().await,
            }
        };

        let signal = tokio::select! {
            biased;
            line = marker_seen => ReadySignal::StdoutMarker { line },
            attempt = healthy => ReadySignal::HealthCheck { attempt },
            () = grace => ReadySignal::GraceTimer,
        };

        // Stops polling; a request still in flight can no longer report.
        drop(poller);

        let elapsed = started.elapsed();
        match &signal {
            ReadySignal::StdoutMarker { line } => {
                info!("Backend ready after {:?} (stdout: {})", elapsed, line)
            }
            ReadySignal::HealthCheck { attempt } => info!(
                "Backend ready after {:?} (health check attempt {})",
                elapsed, attempt
            ),
            ReadySignal::GraceTimer => warn!(
                "Backend did not confirm readiness within {:?}, continuing anyway",
                elapsed
            ),
        }

        self.state.send_replace(ReadinessState::Ready);
        Readiness { signal, elapsed }
    }
}
