use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ProbeFailure;

/// A single readiness check attempt.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> Result<(), ProbeFailure>;
}

/// How often and how long to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    /// Pause between the end of one attempt and the start of the next.
    pub period: Duration,
    /// Upper bound for a single attempt.
    pub timeout: Duration,
    /// Attempts before giving up. Zero disables polling.
    pub max_attempts: u32,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(500),
            timeout: Duration::from_secs(2),
            max_attempts: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The check passed on this (1-based) attempt.
    Healthy { attempt: u32 },
    /// Every attempt failed.
    Exhausted { attempts: u32 },
}

/// Background task that runs a [`HealthCheck`] until it passes or the budget
/// is spent.
///
/// Call `recv()` to wait for the outcome. Dropping the poller aborts the
/// task, so an in-flight request can never report after its owner is gone.
pub struct HealthPoller {
    rx: mpsc::Receiver<PollOutcome>,
    task: JoinHandle<()>,
}

impl HealthPoller {
    /// Start polling immediately; the first attempt runs without delay.
    pub fn spawn(check: Arc<dyn HealthCheck>, name: String, schedule: PollSchedule) -> Self {
        let (tx, rx) = mpsc::channel::<PollOutcome>(1);
        let task = tokio::spawn(async move {
            debug!(
                "Starting health polling for {} ({} attempts, every {:?})",
                name, schedule.max_attempts, schedule.period
            );

            for attempt in 1..=schedule.max_attempts {
                let result = match tokio::time::timeout(schedule.timeout, check.check()).await {
                    Ok(result) => result,
                    Err(_) => Err(ProbeFailure::Timeout {
                        millis: schedule.timeout.as_millis(),
                    }),
                };

                match result {
                    Ok(()) => {
                        info!("Health check for {} passed on attempt {}", name, attempt);
                        let _ = tx.send(PollOutcome::Healthy { attempt }).await;
                        return;
                    }
                    Err(e) if e.is_expected() => {
                        debug!("Health check {} for {} failed: {}", attempt, name, e);
                    }
                    Err(e) => {
                        warn!("Health check {} for {} unexpected error: {}", attempt, name, e);
                    }
                }

                if attempt < schedule.max_attempts {
                    tokio::time::sleep(schedule.period).await;
                }
            }

            let _ = tx
                .send(PollOutcome::Exhausted {
                    attempts: schedule.max_attempts,
                })
                .await;
        });
        Self { rx, task }
    }

    /// Wait for the outcome.
    ///
    /// Returns `None` if the task ended without reporting.
    pub async fn recv(&mut self) -> Option<PollOutcome> {
        self.rx.recv().await
    }
}

impl Drop for HealthPoller {
    fn drop(&mut self) {
        self.task.abort();
    }
}
