use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// The OS could not start the backend.
#[derive(Debug, Error, Diagnostic)]
pub enum SpawnError {
    #[error("failed to launch backend {}", executable.display())]
    #[diagnostic(
        code(imgsearch::spawn::launch),
        help("check that the backend exists and is executable")
    )]
    Launch {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("backend exited before its pid could be read")]
    #[diagnostic(code(imgsearch::spawn::vanished))]
    Vanished,

    #[error("a backend is already running (pid {pid})")]
    #[diagnostic(code(imgsearch::spawn::already_running))]
    AlreadyRunning { pid: u32 },

    #[error("a backend from a previous session (pid {pid}) could not be stopped")]
    #[diagnostic(
        code(imgsearch::spawn::leftover_running),
        help("stop the process by hand; it still holds the backend port")
    )]
    LeftoverRunning { pid: u32 },
}
