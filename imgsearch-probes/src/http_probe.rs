use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::trace;
use url::Url;

use crate::error::ProbeFailure;
use crate::poller::HealthCheck;

/// Path of the backend's health endpoint, relative to its origin.
pub const HEALTH_PATH: &str = "/health";

/// One `GET /health` request per [`HealthCheck::check`] call.
///
/// Only a `200 OK` counts as healthy. Each request is bounded by the
/// client-level `timeout`.
#[derive(Debug, Clone)]
pub struct HttpHealthCheck {
    client: reqwest::Client,
    url: Url,
    timeout: Duration,
}

impl HttpHealthCheck {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, ProbeFailure> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ProbeFailure::Client)?;
        Ok(Self {
            client,
            url,
            timeout,
        })
    }

    /// Health check against `<origin>/health`.
    pub fn for_origin(origin: &Url, timeout: Duration) -> Result<Self, ProbeFailure> {
        let mut url = origin.clone();
        url.set_path(HEALTH_PATH);
        url.set_query(None);
        Self::new(url, timeout)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    async fn check(&self) -> Result<(), ProbeFailure> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    ProbeFailure::Connect {
                        url: self.url.to_string(),
                    }
                } else if e.is_timeout() {
                    ProbeFailure::Timeout {
                        millis: self.timeout.as_millis(),
                    }
                } else {
                    ProbeFailure::Request(e)
                }
            })?;

        let status = response.status();
        trace!("Health check {} answered {}", self.url, status);
        if status == StatusCode::OK {
            Ok(())
        } else {
            Err(ProbeFailure::Status {
                status: status.as_u16(),
            })
        }
    }
}
