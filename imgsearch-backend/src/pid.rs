//! PID file for the backend, so a shell that died without cleaning up does
//! not leave a backend squatting on the port for the next session.
//!
//! The file holds the PID on the first line and the backend executable on
//! the second. A live PID is only treated as our backend when the process
//! is still running that executable; PIDs get reused.

use std::ffi::OsStr;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

/// How long a leftover gets after SIGKILL before we give up on it.
const KILL_WAIT: Duration = Duration::from_secs(1);

const MAX_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Contents of a PID file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidRecord {
    pub pid: Pid,
    /// Missing in files written by older shells
    pub executable: Option<PathBuf>,
}

impl PidRecord {
    fn parse(contents: &[u8]) -> Option<Self> {
        let mut lines = contents.split(|b| *b == b'\n');
        let raw = std::str::from_utf8(lines.next()?)
            .ok()?
            .trim()
            .parse::<i32>()
            .ok()
            .filter(|raw| *raw > 0)?;
        let executable = lines
            .next()
            .filter(|line| !line.is_empty())
            .map(|line| PathBuf::from(OsStr::from_bytes(line)));
        Some(Self {
            pid: Pid::from_raw(raw),
            executable,
        })
    }

    /// Whether the recorded process is still running the recorded executable.
    pub fn is_backend(&self) -> bool {
        match &self.executable {
            Some(executable) => runs_executable(self.pid, executable),
            None => false,
        }
    }
}

/// Result of inspecting a PID file.
#[derive(Debug, PartialEq, Eq)]
pub enum PidStatus {
    /// A process with the recorded PID is alive
    Running(PidRecord),
    NotFound,
    /// The file was unreadable or pointed at a dead process and was removed
    StaleRemoved,
}

/// What happened to a backend left behind by a previous session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leftover {
    Absent,
    /// Exited after SIGTERM
    Stopped,
    /// Ignored SIGTERM and was killed
    Killed,
    /// The PID now belongs to some other program; it was not signalled
    Foreign(Pid),
    /// Still alive after SIGKILL
    Survived(Pid),
}

/// Check whether the recorded process is still alive, removing stale files.
pub fn check_pid_file(pid_file: &Path) -> PidStatus {
    let contents = match std::fs::read(pid_file) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return PidStatus::NotFound,
        Err(e) => {
            warn!("Unreadable PID file {}: {}", pid_file.display(), e);
            let _ = std::fs::remove_file(pid_file);
            return PidStatus::StaleRemoved;
        }
    };

    let Some(record) = PidRecord::parse(&contents) else {
        warn!(
            "Invalid PID format in {}: '{}'",
            pid_file.display(),
            String::from_utf8_lossy(&contents).trim()
        );
        let _ = std::fs::remove_file(pid_file);
        return PidStatus::StaleRemoved;
    };

    match signal::kill(record.pid, None) {
        Ok(()) if !is_zombie(record.pid) => PidStatus::Running(record),
        result => {
            if let Err(e) = result {
                if e != Errno::ESRCH {
                    warn!("Error checking PID {}: {}", record.pid, e);
                }
            }
            debug!("Removing stale PID file {}", pid_file.display());
            let _ = std::fs::remove_file(pid_file);
            PidStatus::StaleRemoved
        }
    }
}

/// Stop a backend left behind by a previous session and wait until it is gone.
///
/// SIGTERM first, SIGKILL once `max_wait` has passed. A PID that is no longer
/// running the recorded executable is never signalled.
pub async fn stop_leftover(pid_file: &Path, max_wait: Duration) -> Leftover {
    let PidStatus::Running(record) = check_pid_file(pid_file) else {
        return Leftover::Absent;
    };
    let pid = record.pid;

    if !record.is_backend() {
        warn!(
            "PID {} from {} is not a backend started by this shell, leaving it alone",
            pid,
            pid_file.display()
        );
        let _ = std::fs::remove_file(pid_file);
        return Leftover::Foreign(pid);
    }

    info!("Stopping backend left over from a previous session (pid {})", pid);
    match signal::kill(pid, Signal::SIGTERM) {
        Ok(()) => debug!("Sent SIGTERM to leftover backend (pid {})", pid),
        Err(Errno::ESRCH) => {
            let _ = std::fs::remove_file(pid_file);
            return Leftover::Stopped;
        }
        Err(e) => {
            warn!("Failed to signal leftover backend (pid {}): {}", pid, e);
            return Leftover::Survived(pid);
        }
    }

    let outcome = if wait_for_exit(pid, max_wait).await {
        Leftover::Stopped
    } else {
        warn!(
            "Leftover backend (pid {}) did not stop within {:?}, sending SIGKILL",
            pid, max_wait
        );
        if let Err(e) = signal::kill(pid, Signal::SIGKILL) {
            warn!("Failed to send SIGKILL to pid {}: {}", pid, e);
        }
        if wait_for_exit(pid, KILL_WAIT).await {
            Leftover::Killed
        } else {
            Leftover::Survived(pid)
        }
    };

    if outcome != Leftover::Survived(pid) {
        let _ = std::fs::remove_file(pid_file);
    }
    outcome
}

pub fn write_pid(pid_file: &Path, pid: u32, executable: &Path) -> io::Result<()> {
    if let Some(parent) = pid_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut contents = format!("{}\n", pid).into_bytes();
    contents.extend_from_slice(executable.as_os_str().as_bytes());
    contents.push(b'\n');
    std::fs::write(pid_file, contents)
}

/// Remove the PID file if it still records `pid`.
pub fn remove_pid_if_owned(pid_file: &Path, pid: u32) {
    let Ok(contents) = std::fs::read(pid_file) else {
        return;
    };
    match PidRecord::parse(&contents) {
        Some(record) if record.pid.as_raw() as u32 == pid => {
            if let Err(e) = std::fs::remove_file(pid_file) {
                debug!("Failed to remove PID file {}: {}", pid_file.display(), e);
            }
        }
        _ => {}
    }
}

/// Poll until `pid` is gone, backing off up to [`MAX_POLL_INTERVAL`].
async fn wait_for_exit(pid: Pid, max_wait: Duration) -> bool {
    let start = Instant::now();
    let mut interval = Duration::from_millis(50);

    loop {
        if !is_alive(pid) {
            debug!(
                "Leftover backend (pid {}) gone after {:.2}s",
                pid,
                start.elapsed().as_secs_f32()
            );
            return true;
        }
        if start.elapsed() >= max_wait {
            return false;
        }
        tokio::time::sleep(interval).await;
        interval = (interval * 3 / 2).min(MAX_POLL_INTERVAL);
    }
}

fn is_alive(pid: Pid) -> bool {
    match signal::kill(pid, None) {
        Ok(()) => !is_zombie(pid),
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// An exited process nobody has reaped yet still answers signal 0.
#[cfg(target_os = "linux")]
fn is_zombie(pid: Pid) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
        return false;
    };
    // The state follows the parenthesised command name, which may hold spaces.
    stat.rsplit_once(')')
        .is_some_and(|(_, rest)| rest.trim_start().starts_with('Z'))
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: Pid) -> bool {
    false
}

/// Whether `pid`'s command line names `executable`.
///
/// Scripts show up as arguments of their interpreter, so any argument counts.
#[cfg(target_os = "linux")]
fn runs_executable(pid: Pid, executable: &Path) -> bool {
    let Ok(cmdline) = std::fs::read(format!("/proc/{}/cmdline", pid)) else {
        return false;
    };
    cmdline
        .split(|b| *b == 0)
        .any(|arg| Path::new(OsStr::from_bytes(arg)) == executable)
}

// Without /proc the identity cannot be confirmed, so nothing is signalled.
#[cfg(not(target_os = "linux"))]
fn runs_executable(_pid: Pid, _executable: &Path) -> bool {
    false
}
