#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    Idle,
    /// Looking for the backend and launching it
    Spawning,
    /// Backend launched, readiness gate pending
    AwaitingReady,
    WindowOpen,
    /// Quit requested, backend told to stop
    ShuttingDown,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Start,
    BackendSpawned,
    /// No backend found, or it failed to launch
    NoBackend,
    Ready,
    QuitRequested,
    BackendStopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ResolveBackend,
    AwaitReadiness,
    OpenWindow,
    TerminateBackend,
    Finish,
    /// The event does not apply in the current state
    Ignore,
}

/// Pure state machine for the shell lifecycle.
///
/// No I/O, no handles: takes `Event`s, returns `Action`s. The controller
/// performs the I/O the action names. `TerminateBackend` is returned at most
/// once per machine.
#[derive(Debug)]
pub struct ShellStateMachine {
    state: ShellState,
    history: Vec<ShellState>,
}

impl Default for ShellStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellStateMachine {
    pub fn new() -> Self {
        Self {
            state: ShellState::Idle,
            history: vec![ShellState::Idle],
        }
    }

    pub fn state(&self) -> ShellState {
        self.state
    }

    /// Every state entered so far, starting with `Idle`.
    pub fn history(&self) -> &[ShellState] {
        &self.history
    }

    pub fn on_event(&mut self, event: Event) -> Action {
        use ShellState::*;

        let (next, action) = match (self.state, event) {
            (Idle, Event::Start) => (Spawning, Action::ResolveBackend),
            (Spawning, Event::BackendSpawned) => (AwaitingReady, Action::AwaitReadiness),
            (Spawning, Event::NoBackend) => (WindowOpen, Action::OpenWindow),
            (AwaitingReady, Event::Ready) => (WindowOpen, Action::OpenWindow),
            (Spawning | AwaitingReady | WindowOpen, Event::QuitRequested) => {
                (ShuttingDown, Action::TerminateBackend)
            }
            (ShuttingDown, Event::BackendStopped) => (Stopped, Action::Finish),
            _ => return Action::Ignore,
        };

        self.state = next;
        self.history.push(next);
        action
    }

    pub fn is_shutting_down(&self) -> bool {
        matches!(self.state, ShellState::ShuttingDown | ShellState::Stopped)
    }
}
