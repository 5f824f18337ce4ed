//! `imgsearch.yaml` and its merge with command line overrides.

use std::path::{Path, PathBuf};

use imgsearch_backend::{DEFAULT_PORT, ReadinessConfig, ResourceLayout};
use miette::{IntoDiagnostic, Result, WrapErr};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::cli::Cli;
use crate::controller::ShellOptions;
use crate::error::ConfigError;

pub const YAML_CONFIG: &str = "imgsearch.yaml";

/// Name of the PID file inside the state directory.
pub const PID_FILE: &str = "backend.pid";

/// Directory next to the shell executable holding packaged resources.
const RESOURCES_DIR: &str = "resources";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShellConfig {
    pub port: Option<u16>,
    pub packaged: Option<bool>,
    /// Origin the frontend sends API requests to
    pub api_base_url: Option<String>,
    pub resource_dir: Option<PathBuf>,
    pub app_dir: Option<PathBuf>,
    /// Where the backend PID file is kept. No PID file when unset.
    pub state_dir: Option<PathBuf>,
    pub readiness: ReadinessConfig,
}

impl ShellConfig {
    /// Load the explicit config file, or `imgsearch.yaml` in the current
    /// directory if there is one.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::Missing {
                        path: path.to_path_buf(),
                    }
                    .into());
                }
                Self::load_from(path)
            }
            None => {
                let path = Path::new(YAML_CONFIG);
                if path.exists() {
                    Self::load_from(path)
                } else {
                    debug!("No {} found, using defaults", YAML_CONFIG);
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
        let config = Self::parse(&contents, path)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn parse(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        // An empty file is an empty mapping
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Command line values take precedence over the file.
    pub fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(port) = cli.port {
            self.port = Some(port);
        }
        if let Some(packaged) = cli.packaged {
            self.packaged = Some(packaged);
        }
        if let Some(ref url) = cli.api_base_url {
            self.api_base_url = Some(url.to_string());
        }
        if let Some(ref dir) = cli.resource_dir {
            self.resource_dir = Some(dir.clone());
        }
        if let Some(ref dir) = cli.app_dir {
            self.app_dir = Some(dir.clone());
        }
        if let Some(ref dir) = cli.state_dir {
            self.state_dir = Some(dir.clone());
        }
    }

    /// Fill in defaults and produce the settings the shell runs with.
    pub fn resolve(self) -> Result<Settings> {
        let resource_dir = match self.resource_dir {
            Some(dir) => absolute(&dir)?,
            None => default_resource_dir()?,
        };
        let app_dir = match self.app_dir {
            Some(dir) => absolute(&dir)?,
            None => std::env::current_dir()
                .into_diagnostic()
                .wrap_err("Failed to determine the current directory")?,
        };
        let packaged = self.packaged.unwrap_or_else(|| resource_dir.is_dir());
        let port = self.port.unwrap_or(DEFAULT_PORT);

        let mut options = ShellOptions::new(port, packaged)?;
        if let Some(value) = self.api_base_url {
            options.api_base_url =
                Url::parse(&value).map_err(|source| ConfigError::InvalidApiUrl { value, source })?;
        }
        options.readiness = self.readiness;

        let state_dir = self.state_dir.map(|dir| absolute(&dir)).transpose()?;

        Ok(Settings {
            layout: ResourceLayout {
                resource_dir,
                app_dir,
            },
            state_dir,
            options,
        })
    }
}

/// Effective configuration after merging file, command line and defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub layout: ResourceLayout,
    pub state_dir: Option<PathBuf>,
    pub options: ShellOptions,
}

impl Settings {
    pub fn pid_file(&self) -> Option<PathBuf> {
        self.state_dir.as_ref().map(|dir| dir.join(PID_FILE))
    }
}

fn default_resource_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe()
        .into_diagnostic()
        .wrap_err("Failed to locate the shell executable")?;
    let dir = exe.parent().unwrap_or_else(|| Path::new("."));
    Ok(dir.join(RESOURCES_DIR))
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to make {} absolute", path.display()))
}
