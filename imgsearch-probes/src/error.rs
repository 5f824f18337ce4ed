use miette::Diagnostic;
use thiserror::Error;

/// Why a single health-check attempt did not confirm readiness.
///
/// Failures are expected while the backend boots; the poller retries them
/// until its attempt budget runs out.
#[derive(Debug, Error, Diagnostic)]
pub enum ProbeFailure {
    /// Nothing is listening yet.
    #[error("connection refused by {url}")]
    #[diagnostic(code(imgsearch::probe::connect))]
    Connect { url: String },

    #[error("health check timed out after {millis} ms")]
    #[diagnostic(code(imgsearch::probe::timeout))]
    Timeout { millis: u128 },

    #[error("health endpoint answered {status}")]
    #[diagnostic(code(imgsearch::probe::status))]
    Status { status: u16 },

    #[error("health request failed")]
    #[diagnostic(code(imgsearch::probe::request))]
    Request(#[source] reqwest::Error),

    #[error("could not build HTTP client for health checks")]
    #[diagnostic(code(imgsearch::probe::client))]
    Client(#[source] reqwest::Error),
}

impl ProbeFailure {
    /// Failures that simply mean "not up yet" rather than something odd.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            ProbeFailure::Connect { .. } | ProbeFailure::Timeout { .. } | ProbeFailure::Status { .. }
        )
    }
}
