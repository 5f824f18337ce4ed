//! Desktop shell for Local Image Search.
//!
//! Starts the search backend, waits until it can serve requests, opens the
//! frontend and stops the backend again when the shell quits.

pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod log;
pub mod shell_state;
pub mod shutdown;
pub mod window;

pub use config::{PID_FILE, Settings, ShellConfig, YAML_CONFIG};
pub use controller::{STOP_TIMEOUT, ShellController, ShellOptions};
pub use error::{ConfigError, ShellError};
pub use shell_state::{ShellState, ShellStateMachine};
pub use shutdown::{QuitSignals, ShutdownTrigger};
pub use window::{
    BrowserWindow, FrontendBridge, HeadlessWindow, WindowError, WindowHost, WindowOptions,
    bridged_url,
};
