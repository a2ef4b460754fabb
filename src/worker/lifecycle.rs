//! Worker lifecycle: `Starting → Loading → Ready → Running → Stopping → Stopped`.
//!
//! The state lives in an atomic shared with the handle so callers can observe
//! it without messaging the worker. `Ready` is entered at most once per
//! lifetime, and so is `Stopping`.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum WorkerState {
    Starting = 0,
    Loading = 1,
    Ready = 2,
    Running = 3,
    Stopping = 4,
    Stopped = 5,
}

impl WorkerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Starting,
            1 => Self::Loading,
            2 => Self::Ready,
            3 => Self::Running,
            4 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Read-only view of a worker's state.
#[derive(Clone, Debug)]
pub struct StateView(Arc<AtomicU8>);

impl StateView {
    pub fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }
}

/// Owned by the worker thread; the only writer of the state.
#[derive(Debug)]
pub struct Lifecycle {
    state: Arc<AtomicU8>,
    ready_entered: bool,
    stopping_entered: bool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(WorkerState::Starting as u8)),
            ready_entered: false,
            stopping_entered: false,
        }
    }

    pub fn view(&self) -> StateView {
        StateView(self.state.clone())
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn begin_loading(&mut self) {
        if self.state() == WorkerState::Starting {
            self.set(WorkerState::Loading);
        }
    }

    /// Enter `Ready`. Returns true only on the first successful call, which is
    /// when the caller must emit the readiness signal.
    pub fn mark_ready(&mut self) -> bool {
        if self.ready_entered || self.state() != WorkerState::Loading {
            return false;
        }
        self.ready_entered = true;
        self.set(WorkerState::Ready);
        true
    }

    pub fn mark_running(&mut self) {
        if self.state() == WorkerState::Ready {
            self.set(WorkerState::Running);
        }
    }

    /// Enter `Stopping`. Returns false when it was already entered.
    pub fn begin_stopping(&mut self) -> bool {
        if self.stopping_entered || self.state() == WorkerState::Stopped {
            return false;
        }
        self.stopping_entered = true;
        self.set(WorkerState::Stopping);
        true
    }

    pub fn mark_stopped(&mut self) {
        self.set(WorkerState::Stopped);
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
