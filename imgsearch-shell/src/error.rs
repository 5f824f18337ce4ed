use std::path::PathBuf;

use imgsearch_backend::ProbeFailure;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("config file {} does not exist", path.display())]
    #[diagnostic(code(imgsearch::config::missing))]
    Missing { path: PathBuf },

    #[error("failed to parse {}", path.display())]
    #[diagnostic(
        code(imgsearch::config::parse),
        help("keys are camelCase, e.g. `apiBaseUrl` or `readiness.graceTimeoutMs`")
    )]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid API base URL '{value}'")]
    #[diagnostic(code(imgsearch::config::api_base_url))]
    InvalidApiUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },
}

/// The controller could not be set up.
#[derive(Debug, Error, Diagnostic)]
pub enum ShellError {
    #[error("no valid backend origin for port {port}")]
    #[diagnostic(code(imgsearch::shell::origin))]
    InvalidOrigin {
        port: u16,
        #[source]
        source: url::ParseError,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    HealthCheck(#[from] ProbeFailure),
}
