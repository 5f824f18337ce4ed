//! Quit requests: from the window layer and from OS signals.

use std::io;
use std::sync::Arc;
#[cfg(unix)]
use std::sync::atomic::{AtomicI32, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(unix)]
pub use nix::sys::signal::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// The last window was closed
    AllWindowsClosed,
    /// The application is about to quit (menu, OS session end, signal)
    BeforeQuit,
}

/// Turns SIGINT, SIGTERM and SIGHUP into [`ShutdownTrigger::BeforeQuit`].
///
/// The first signal asks the controller to shut down gracefully. A second
/// one means shutdown is stuck: the default handler is restored and the
/// signal re-raised so the process dies with the right status.
pub struct QuitSignals {
    token: CancellationToken,
    #[cfg(unix)]
    last_signal: AtomicI32,
}

impl std::fmt::Debug for QuitSignals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuitSignals")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

impl QuitSignals {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            token: CancellationToken::new(),
            #[cfg(unix)]
            last_signal: AtomicI32::new(0),
        })
    }

    /// Stop listening for signals.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    #[cfg(unix)]
    pub fn last_signal(&self) -> Option<Signal> {
        match self.last_signal.load(Ordering::Relaxed) {
            0 => None,
            i => Signal::try_from(i).ok(),
        }
    }

    /// Install the handlers and forward quit requests to `triggers`.
    ///
    /// Must be called from within a tokio runtime.
    #[cfg(unix)]
    pub fn install(
        self: &Arc<Self>,
        triggers: mpsc::Sender<ShutdownTrigger>,
    ) -> io::Result<JoinHandle<()>> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sighup = signal(SignalKind::hangup())?;
        let signals = Arc::clone(self);

        Ok(tokio::spawn(async move {
            loop {
                let last_signal = tokio::select! {
                    _ = sigint.recv() => Signal::SIGINT,
                    _ = sigterm.recv() => Signal::SIGTERM,
                    _ = sighup.recv() => Signal::SIGHUP,
                    _ = signals.token.cancelled() => {
                        debug!("Signal listener stopped");
                        return;
                    }
                };

                if signals.last_signal.load(Ordering::Relaxed) != 0 {
                    info!("Received second signal, forcing exit...");
                    signals.exit_process();
                }

                info!("Received {:?}, shutting down gracefully...", last_signal);
                signals
                    .last_signal
                    .store(last_signal as i32, Ordering::Relaxed);

                if triggers.send(ShutdownTrigger::BeforeQuit).await.is_err() {
                    debug!("Shutdown trigger receiver is gone");
                }
            }
        }))
    }

    #[cfg(not(unix))]
    pub fn install(
        self: &Arc<Self>,
        triggers: mpsc::Sender<ShutdownTrigger>,
    ) -> io::Result<JoinHandle<()>> {
        let signals = Arc::clone(self);

        Ok(tokio::spawn(async move {
            let mut received = false;
            loop {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            warn!("Failed to listen for Ctrl+C: {}", e);
                            return;
                        }
                    }
                    _ = signals.token.cancelled() => {
                        debug!("Signal listener stopped");
                        return;
                    }
                }

                if received {
                    info!("Received second signal, forcing exit...");
                    std::process::exit(130);
                }
                received = true;

                info!("Received Ctrl+C, shutting down gracefully...");
                if triggers.send(ShutdownTrigger::BeforeQuit).await.is_err() {
                    debug!("Shutdown trigger receiver is gone");
                }
            }
        }))
    }

    /// Restore the default handler for the last received signal and re-raise
    /// it to terminate with the correct exit status.
    #[cfg(unix)]
    fn exit_process(&self) -> ! {
        use nix::sys::signal::{self as nix_signal, SaFlags, SigAction, SigHandler, SigSet};
        use nix::unistd;

        let signal = self.last_signal().unwrap_or(Signal::SIGTERM);
        let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        // SAFETY: installs the default disposition, no handler code involved.
        if let Err(e) = unsafe { nix_signal::sigaction(signal, &action) } {
            warn!("Failed to restore default handler for {:?}: {}", signal, e);
        }
        if let Err(e) = nix_signal::kill(unistd::getpid(), signal) {
            warn!("Failed to re-raise {:?}: {}", signal, e);
        }

        std::process::exit(1);
    }
}
