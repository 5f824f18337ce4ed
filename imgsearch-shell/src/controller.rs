//! Startup and shutdown orchestration.
//!
//! The controller resolves the backend, launches it, waits for the readiness
//! gate and then opens the window. Any backend problem degrades to a window
//! without a backend instead of aborting: the frontend reports unreachable
//! API calls itself.

use std::sync::Arc;
use std::time::Duration;

use imgsearch_backend::{
    HealthCheck, HttpHealthCheck, PathResolver, ProcessHandle, Readiness, ReadinessConfig,
    ReadinessGate, ResourceLayout, Supervisor, backend_origin,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::ShellError;
use crate::shell_state::{Action, Event, ShellState, ShellStateMachine};
use crate::shutdown::ShutdownTrigger;
use crate::window::{
    FrontendBridge, WindowError, WindowHost, WindowOptions, quits_on_last_window_closed,
};

/// How long `run` waits for the backend to exit after asking it to stop.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ShellOptions {
    pub port: u16,
    pub packaged: bool,
    /// Origin the frontend talks to; defaults to the local backend
    pub api_base_url: Url,
    pub readiness: ReadinessConfig,
    pub window: WindowOptions,
    /// Treat [`ShutdownTrigger::AllWindowsClosed`] as a quit request
    pub quit_on_last_window: bool,
    pub stop_timeout: Duration,
}

impl ShellOptions {
    pub fn new(port: u16, packaged: bool) -> Result<Self, ShellError> {
        Ok(Self {
            port,
            packaged,
            api_base_url: origin(port)?,
            readiness: ReadinessConfig::default(),
            window: WindowOptions::default(),
            quit_on_last_window: quits_on_last_window_closed(),
            stop_timeout: STOP_TIMEOUT,
        })
    }
}

fn origin(port: u16) -> Result<Url, ShellError> {
    backend_origin(port).map_err(|source| ShellError::InvalidOrigin { port, source })
}

pub struct ShellController<S, W> {
    supervisor: S,
    window: W,
    resolver: PathResolver,
    options: ShellOptions,
    backend_origin: Url,
    health_check: Arc<dyn HealthCheck>,
    machine: ShellStateMachine,
    backend: Option<Arc<ProcessHandle>>,
    readiness: Option<Readiness>,
}

impl<S: Supervisor, W: WindowHost> ShellController<S, W> {
    pub fn new(
        supervisor: S,
        window: W,
        layout: ResourceLayout,
        options: ShellOptions,
    ) -> Result<Self, ShellError> {
        let backend_origin = origin(options.port)?;
        let health_check =
            HttpHealthCheck::for_origin(&backend_origin, options.readiness.probe_timeout())?;

        Ok(Self {
            supervisor,
            window,
            resolver: PathResolver::new(layout, options.port),
            options,
            backend_origin,
            health_check: Arc::new(health_check),
            machine: ShellStateMachine::new(),
            backend: None,
            readiness: None,
        })
    }

    /// Replace the HTTP health check used by the readiness gate.
    pub fn with_health_check(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.health_check = check;
        self
    }

    pub fn state(&self) -> ShellState {
        self.machine.state()
    }

    pub fn history(&self) -> &[ShellState] {
        self.machine.history()
    }

    pub fn supervisor(&self) -> &S {
        &self.supervisor
    }

    pub fn window(&self) -> &W {
        &self.window
    }

    /// The backend this controller is responsible for, until shutdown.
    pub fn backend(&self) -> Option<&Arc<ProcessHandle>> {
        self.backend.as_ref()
    }

    /// How the readiness gate resolved, if it ran.
    pub fn readiness(&self) -> Option<&Readiness> {
        self.readiness.as_ref()
    }

    /// Launch the backend, wait until it is usable and open the window.
    pub async fn startup(&mut self) {
        self.start(None).await;
    }

    /// Startup that stops short of the window once a quit trigger arrives.
    async fn start(&mut self, triggers: Option<&mut mpsc::Receiver<ShutdownTrigger>>) {
        if self.machine.on_event(Event::Start) != Action::ResolveBackend {
            debug!("Startup already ran ({:?})", self.state());
            return;
        }

        let packaged = self.options.packaged;
        let handle = match self.resolver.resolve_backend(packaged) {
            None => {
                warn!(
                    "Backend not found ({} layout), starting without it",
                    if packaged { "packaged" } else { "development" }
                );
                None
            }
            Some(descriptor) => match self.supervisor.spawn(&descriptor).await {
                Ok(handle) => Some(handle),
                Err(e) => {
                    error!("Failed to start backend: {}", e);
                    None
                }
            },
        };

        match handle {
            Some(handle) => {
                self.machine.on_event(Event::BackendSpawned);
                self.backend = Some(handle.clone());

                let gate = ReadinessGate::new(self.options.readiness.clone());
                let ready = gate.wait(&handle, self.health_check.clone());
                let readiness = match triggers {
                    Some(triggers) => {
                        let quit_on_last_window = self.options.quit_on_last_window;
                        tokio::select! {
                            biased;
                            trigger = next_quit(triggers, quit_on_last_window) => {
                                info!("Quit requested while waiting for the backend");
                                if let Some(handle) = self.shutdown(trigger) {
                                    self.await_exit(&handle).await;
                                }
                                return;
                            }
                            readiness = ready => readiness,
                        }
                    }
                    None => ready.await,
                };
                if !readiness.signal.is_confirmed() {
                    warn!(
                        "Opening the window before the backend confirmed it is up; first requests may fail"
                    );
                }
                self.readiness = Some(readiness);
                self.machine.on_event(Event::Ready);
            }
            None => {
                self.machine.on_event(Event::NoBackend);
            }
        }

        self.open_window().await;
    }

    async fn open_window(&mut self) {
        let bridge = FrontendBridge::new(self.options.api_base_url.clone());
        let asset = self.resolver.resolve_frontend_asset(self.options.packaged);

        let loaded = match Url::from_file_path(&asset) {
            Ok(url) => self.window.open(&self.options.window, &bridge, &url).await,
            Err(()) => Err(WindowError::MissingAsset { path: asset }),
        };

        if let Err(e) = loaded {
            warn!("{}, loading {} instead", e, self.backend_origin);
            if let Err(e) = self
                .window
                .open(&self.options.window, &bridge, &self.backend_origin)
                .await
            {
                error!("Failed to open window: {}", e);
            }
        }
    }

    /// Handle a quit request.
    ///
    /// The first accepted trigger terminates the backend and hands back its
    /// handle so the caller can wait for the exit; later triggers find
    /// nothing to do.
    pub fn shutdown(&mut self, trigger: ShutdownTrigger) -> Option<Arc<ProcessHandle>> {
        if trigger == ShutdownTrigger::AllWindowsClosed && !self.options.quit_on_last_window {
            debug!("Last window closed, staying alive");
            return None;
        }

        if self.machine.on_event(Event::QuitRequested) != Action::TerminateBackend {
            debug!("Ignoring {:?} in state {:?}", trigger, self.state());
            return None;
        }

        info!("Shutting down ({:?})", trigger);
        let handle = self.backend.take()?;
        self.supervisor.terminate(&handle);
        Some(handle)
    }

    /// Run the shell until a quit trigger arrives and the backend is gone.
    ///
    /// A closed trigger channel counts as a quit request.
    pub async fn run(&mut self, mut triggers: mpsc::Receiver<ShutdownTrigger>) {
        self.start(Some(&mut triggers)).await;

        while !self.machine.is_shutting_down() {
            let trigger = next_quit(&mut triggers, self.options.quit_on_last_window).await;
            if let Some(handle) = self.shutdown(trigger) {
                self.await_exit(&handle).await;
            }
        }

        self.machine.on_event(Event::BackendStopped);
        info!("Shell stopped");
    }

    async fn await_exit(&self, handle: &ProcessHandle) {
        match tokio::time::timeout(self.options.stop_timeout, handle.exited()).await {
            Ok(state) => debug!("Backend (pid {}) gone: {:?}", handle.pid(), state),
            Err(_) => warn!(
                "Backend (pid {}) did not exit within {:?}",
                handle.pid(),
                self.options.stop_timeout
            ),
        }
    }
}

/// The next trigger that should stop the shell. A closed channel counts as one.
async fn next_quit(
    triggers: &mut mpsc::Receiver<ShutdownTrigger>,
    quit_on_last_window: bool,
) -> ShutdownTrigger {
    loop {
        match triggers.recv().await {
            Some(ShutdownTrigger::AllWindowsClosed) if !quit_on_last_window => {
                debug!("Last window closed, staying alive");
            }
            Some(trigger) => return trigger,
            None => {
                debug!("Shutdown trigger channel closed");
                return ShutdownTrigger::BeforeQuit;
            }
        }
    }
}
