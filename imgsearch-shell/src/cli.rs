//! Command line of the `imgsearch-shell` binary.

use clap::Parser;
use std::path::PathBuf;
use url::Url;

use crate::log::Level;

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LogFormat {
    /// A verbose structured log format (default).
    #[default]
    Full,
    /// A pretty human-readable log format used for debugging.
    Pretty,
    /// A JSON log format used for machine consumption.
    Json,
}

#[derive(Clone, Debug, Parser)]
#[command(
    name = "imgsearch-shell",
    version,
    about = "Desktop shell for Local Image Search: starts the search backend and opens the UI."
)]
pub struct Cli {
    #[arg(
        long,
        env = "IMGSEARCH_CONFIG",
        help = "Path to the config file.",
        long_help = "Path to the config file. Defaults to imgsearch.yaml in the current directory if present."
    )]
    pub config: Option<PathBuf>,

    #[arg(long, env = "IMGSEARCH_PORT", help = "Port the backend listens on.")]
    pub port: Option<u16>,

    #[arg(
        long,
        env = "IMGSEARCH_PACKAGED",
        num_args = 0..=1,
        default_missing_value = "true",
        help = "Run against the packaged layout instead of a development checkout."
    )]
    pub packaged: Option<bool>,

    #[arg(
        long,
        env = "IMGSEARCH_API_URL",
        help = "API base URL handed to the frontend."
    )]
    pub api_base_url: Option<Url>,

    #[arg(long, help = "Directory holding the bundled backend and frontend.")]
    pub resource_dir: Option<PathBuf>,

    #[arg(long, help = "Project root of a development checkout.")]
    pub app_dir: Option<PathBuf>,

    #[arg(long, help = "Directory for the backend PID file.")]
    pub state_dir: Option<PathBuf>,

    #[arg(
        long,
        env = "IMGSEARCH_HEADLESS",
        help = "Run the backend without showing the UI.",
        long_help = "Run the backend without showing the UI. The frontend location is only checked and logged."
    )]
    pub headless: bool,

    #[arg(short, long, help = "Enable additional debug logs.")]
    pub verbose: bool,

    #[arg(short, long, conflicts_with = "verbose", help = "Silence all logs")]
    pub quiet: bool,

    #[arg(
        long,
        env = "IMGSEARCH_LOG_FORMAT",
        help = "Configure the output format of logs.",
        default_value_t,
        value_enum
    )]
    pub log_format: LogFormat,
}

impl Cli {
    pub fn log_level(&self) -> Level {
        if self.verbose {
            Level::Debug
        } else if self.quiet {
            Level::Silent
        } else {
            Level::default()
        }
    }
}
