use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use crate::config::BackendDescriptor;
use crate::error::SpawnError;

/// Lines buffered per output stream before new ones are dropped.
const LINE_BUFFER: usize = 1024;

const LOG_TARGET: &str = "imgsearch::backend";

/// How long a leftover backend from a previous session gets to exit after SIGTERM.
const LEFTOVER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of the backend process. `Exited` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// `code` is `None` when the process was killed by a signal.
    Exited { code: Option<i32> },
}

impl ProcessState {
    pub fn is_exited(&self) -> bool {
        matches!(self, ProcessState::Exited { .. })
    }
}

/// Lines read from one of the child's output pipes.
///
/// Ends when the pipe closes, which happens when the process exits.
pub struct LineStream {
    rx: mpsc::Receiver<String>,
}

impl LineStream {
    /// A stream fed by the returned sender.
    pub fn channel(capacity: usize) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }

    pub async fn next_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl Stream for LineStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        self.rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for LineStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineStream").finish_non_exhaustive()
    }
}

/// The running (or finished) backend.
///
/// Its state is only ever written by the supervisor's watcher task.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    command_line: String,
    status: watch::Receiver<ProcessState>,
    stdout: Mutex<Option<LineStream>>,
    stderr: Mutex<Option<LineStream>>,
    terminate_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn state(&self) -> ProcessState {
        *self.status.borrow()
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.state() {
            ProcessState::Exited { code } => code,
            ProcessState::Running => None,
        }
    }

    /// Take the stdout lines. Only the first caller gets them.
    pub fn take_stdout_lines(&self) -> Option<LineStream> {
        lock(&self.stdout).take()
    }

    /// Take the stderr lines. They are logged whether or not anyone reads them.
    pub fn take_stderr_lines(&self) -> Option<LineStream> {
        lock(&self.stderr).take()
    }

    /// Wait until the OS reports the process gone.
    pub async fn exited(&self) -> ProcessState {
        let mut status = self.status.clone();
        match status.wait_for(ProcessState::is_exited).await {
            Ok(state) => *state,
            // Watcher went away without reporting; the runtime is shutting down.
            Err(_) => self.state(),
        }
    }

    /// Ask the watcher to signal the process. At most one request is ever sent.
    fn request_termination(&self) -> bool {
        if self.state().is_exited() {
            return false;
        }
        match lock(&self.terminate_tx).take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

/// Seam between the shell and process management.
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Launch the backend described by `descriptor`.
    async fn spawn(
        &self,
        descriptor: &BackendDescriptor,
    ) -> Result<Arc<ProcessHandle>, SpawnError>;

    /// Signal the backend to stop without waiting for it.
    ///
    /// Safe to call repeatedly and on an already exited process.
    fn terminate(&self, handle: &ProcessHandle);
}

/// Owns at most one live backend process.
#[derive(Debug, Default)]
pub struct ProcessSupervisor {
    current: Mutex<Option<Arc<ProcessHandle>>>,
    pid_file: Option<PathBuf>,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the backend PID in `path` and stop a leftover backend found there.
    pub fn with_pid_file(mut self, path: PathBuf) -> Self {
        self.pid_file = Some(path);
        self
    }

    /// The live process, if any.
    pub fn current(&self) -> Option<Arc<ProcessHandle>> {
        lock(&self.current)
            .as_ref()
            .filter(|handle| !handle.state().is_exited())
            .cloned()
    }

    /// Start the child. The live-process check and the launch share one lock.
    fn launch(&self, descriptor: &BackendDescriptor) -> Result<Arc<ProcessHandle>, SpawnError> {
        let mut current = lock(&self.current);
        if let Some(existing) = current.as_ref() {
            if !existing.state().is_exited() {
                return Err(SpawnError::AlreadyRunning {
                    pid: existing.pid(),
                });
            }
        }

        let command_line = descriptor.command_line();
        debug!("Spawning backend: {}", command_line);

        let mut child = Command::new(descriptor.executable())
            .args(descriptor.args())
            .current_dir(descriptor.working_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SpawnError::Launch {
                executable: descriptor.executable().to_path_buf(),
                source,
            })?;

        let Some(pid) = child.id() else {
            return Err(SpawnError::Vanished);
        };

        let (stdout_tx, stdout_lines) = LineStream::channel(LINE_BUFFER);
        let (stderr_tx, stderr_lines) = LineStream::channel(LINE_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            spawn_line_pump(stdout, Pipe::Stdout, pid, stdout_tx);
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_pump(stderr, Pipe::Stderr, pid, stderr_tx);
        }

        if let Some(pid_file) = &self.pid_file {
            pid_file::record(pid_file, pid, descriptor.executable());
        }

        let (status_tx, status_rx) = watch::channel(ProcessState::Running);
        let (terminate_tx, terminate_rx) = oneshot::channel();
        tokio::spawn(watch_child(
            child,
            pid,
            terminate_rx,
            status_tx,
            self.pid_file.clone(),
        ));

        info!("Backend started (pid {}): {}", pid, command_line);

        let handle = Arc::new(ProcessHandle {
            pid,
            command_line,
            status: status_rx,
            stdout: Mutex::new(Some(stdout_lines)),
            stderr: Mutex::new(Some(stderr_lines)),
            terminate_tx: Mutex::new(Some(terminate_tx)),
        });
        *current = Some(handle.clone());
        Ok(handle)
    }
}

#[async_trait]
impl Supervisor for ProcessSupervisor {
    async fn spawn(
        &self,
        descriptor: &BackendDescriptor,
    ) -> Result<Arc<ProcessHandle>, SpawnError> {
        // Checked before the leftover is reaped: the PID file names the live backend.
        if let Some(existing) = self.current() {
            return Err(SpawnError::AlreadyRunning {
                pid: existing.pid(),
            });
        }

        if let Some(pid_file) = &self.pid_file {
            pid_file::reap_leftover(pid_file, LEFTOVER_STOP_TIMEOUT).await?;
        }

        self.launch(descriptor)
    }

    fn terminate(&self, handle: &ProcessHandle) {
        if handle.request_termination() {
            info!("Stopping backend (pid {})", handle.pid());
        } else {
            debug!(
                "Backend (pid {}) already stopped or stopping, nothing to do",
                handle.pid()
            );
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Pipe {
    Stdout,
    Stderr,
}

/// Drain one pipe: log each line and hand it to the consumer if there is room.
///
/// The pipe is always drained to the end so the child never blocks on a
/// full pipe, even when nobody reads the lines.
fn spawn_line_pump<R>(reader: R, pipe: Pipe, pid: u32, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\n', '\r'])
                        .to_string();
                    match pipe {
                        Pipe::Stdout => debug!(target: LOG_TARGET, pid, "{}", line),
                        Pipe::Stderr => warn!(target: LOG_TARGET, pid, "{}", line),
                    }
                    if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(line) {
                        trace!("Dropping {:?} line from pid {}: consumer is behind", pipe, pid);
                    }
                }
                Err(e) => {
                    debug!("Error reading backend {:?}: {}", pipe, e);
                    break;
                }
            }
        }
    });
}

/// Owns the child until it exits and publishes the final state.
async fn watch_child(
    mut child: Child,
    pid: u32,
    mut terminate_rx: oneshot::Receiver<()>,
    status_tx: watch::Sender<ProcessState>,
    pid_file: Option<PathBuf>,
) {
    let early_exit = tokio::select! {
        result = child.wait() => Some(result),
        Ok(()) = &mut terminate_rx => None,
    };

    let (requested, result) = match early_exit {
        Some(result) => (false, result),
        None => {
            send_terminate(&mut child, pid);
            (true, child.wait().await)
        }
    };

    let code = match result {
        Ok(status) => {
            if requested {
                info!("Backend (pid {}) stopped: {}", pid, status);
            } else if status.success() {
                info!("Backend (pid {}) exited", pid);
            } else {
                warn!("Backend (pid {}) exited unexpectedly: {}", pid, status);
            }
            status.code()
        }
        Err(e) => {
            warn!("Failed to wait for backend (pid {}): {}", pid, e);
            None
        }
    };

    if let Some(pid_file) = pid_file {
        pid_file::clear(&pid_file, pid);
    }
    status_tx.send_replace(ProcessState::Exited { code });
}

#[cfg(unix)]
fn send_terminate(child: &mut Child, pid: u32) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    // The child has not been reaped yet, so the pid still belongs to it.
    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => debug!("Sent SIGTERM to backend (pid {})", pid),
        Err(nix::errno::Errno::ESRCH) => debug!("Backend (pid {}) already gone", pid),
        Err(e) => {
            warn!("Failed to send SIGTERM to backend (pid {}): {}, killing", pid, e);
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child, pid: u32) {
    if let Err(e) = child.start_kill() {
        warn!("Failed to kill backend (pid {}): {}", pid, e);
    }
}

#[cfg(unix)]
mod pid_file {
    use std::path::Path;
    use std::time::Duration;
    use tracing::warn;

    use crate::error::SpawnError;
    use crate::pid::{Leftover, remove_pid_if_owned, stop_leftover, write_pid};

    /// Make sure no backend from an earlier session still holds the port.
    pub(super) async fn reap_leftover(path: &Path, max_wait: Duration) -> Result<(), SpawnError> {
        match stop_leftover(path, max_wait).await {
            Leftover::Survived(pid) => Err(SpawnError::LeftoverRunning {
                pid: pid.as_raw() as u32,
            }),
            _ => Ok(()),
        }
    }

    pub(super) fn record(path: &Path, pid: u32, executable: &Path) {
        if let Err(e) = write_pid(path, pid, executable) {
            warn!("Failed to write PID file {}: {}", path.display(), e);
        }
    }

    pub(super) fn clear(path: &Path, pid: u32) {
        remove_pid_if_owned(path, pid);
    }
}

#[cfg(not(unix))]
mod pid_file {
    use std::path::Path;
    use std::time::Duration;

    use crate::error::SpawnError;

    pub(super) async fn reap_leftover(_path: &Path, _max_wait: Duration) -> Result<(), SpawnError> {
        Ok(())
    }

    pub(super) fn record(_path: &Path, _pid: u32, _executable: &Path) {}

    pub(super) fn clear(_path: &Path, _pid: u32) {}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
