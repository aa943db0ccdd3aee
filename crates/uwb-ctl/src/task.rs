//! Real-time application tasks
//!
//! Applications that react to radio events run a dedicated OS thread. The
//! thread is created *gated*: it exists but does not run its body until the
//! owning application opens the gate as the last step of its start. A task
//! terminated before its gate opened never runs its body.
//!
//! Termination is two-phase. The controller moves the exit state from
//! `Running` to `Requested` and signals the task; the task notices at its
//! next safe point, moves to `Confirmed` and returns. Only then does the
//! controller join the thread and release the state the task was using.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::CtlError;

/// Exit handshake state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitPhase {
    Running,
    /// Controller asked the task to leave
    Requested,
    /// Task reached its terminal point
    Confirmed,
}

/// Observable state of a task, as listed by `THREAD`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Created, gate still closed
    Gated,
    Running,
    Exiting,
    Finished,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Gated => "gated",
            TaskState::Running => "running",
            TaskState::Exiting => "exiting",
            TaskState::Finished => "finished",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug)]
struct Inner {
    gate_open: bool,
    started: bool,
    exit: ExitPhase,
    pending_signals: u32,
}

#[derive(Debug)]
struct Shared {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> TaskState {
        let inner = self.lock();
        match inner.exit {
            ExitPhase::Confirmed => TaskState::Finished,
            ExitPhase::Requested => TaskState::Exiting,
            ExitPhase::Running if !inner.started => TaskState::Gated,
            ExitPhase::Running => TaskState::Running,
        }
    }
}

/// Marks the task finished when the body returns or unwinds
struct ConfirmOnExit<'a>(&'a Shared);

impl Drop for ConfirmOnExit<'_> {
    fn drop(&mut self) {
        self.0.lock().exit = ExitPhase::Confirmed;
        self.0.cond.notify_all();
    }
}

/// What a task body sees of its own control block
pub struct TaskContext {
    shared: Arc<Shared>,
}

/// Why `wait_signal` returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// At least one signal arrived
    Signal,
    /// The controller wants the task to exit
    Exit,
    /// Nothing happened within the timeout
    Timeout,
}

impl TaskContext {
    /// Block until signalled or asked to exit
    ///
    /// Exit wins over pending signals. All pending signals are consumed by
    /// one wake.
    pub fn wait_signal(&self) -> Wake {
        let mut inner = self.shared.lock();
        loop {
            if inner.exit != ExitPhase::Running {
                return Wake::Exit;
            }
            if inner.pending_signals > 0 {
                inner.pending_signals = 0;
                return Wake::Signal;
            }
            inner = self
                .shared
                .cond
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`wait_signal`](Self::wait_signal) with an upper bound
    pub fn wait_signal_timeout(&self, timeout: Duration) -> Wake {
        let inner = self.shared.lock();
        let (mut inner, res) = self
            .shared
            .cond
            .wait_timeout_while(inner, timeout, |i| {
                i.exit == ExitPhase::Running && i.pending_signals == 0
            })
            .unwrap_or_else(PoisonError::into_inner);
        if inner.exit != ExitPhase::Running {
            Wake::Exit
        } else if inner.pending_signals > 0 {
            inner.pending_signals = 0;
            Wake::Signal
        } else {
            debug_assert!(res.timed_out());
            Wake::Timeout
        }
    }

    /// Sleep for `period` unless asked to exit first
    ///
    /// Returns true when the task should leave.
    pub fn pause(&self, period: Duration) -> bool {
        let inner = self.shared.lock();
        let (inner, _) = self
            .shared
            .cond
            .wait_timeout_while(inner, period, |i| i.exit == ExitPhase::Running)
            .unwrap_or_else(PoisonError::into_inner);
        inner.exit != ExitPhase::Running
    }

    pub fn should_exit(&self) -> bool {
        self.shared.lock().exit != ExitPhase::Running
    }

    /// Handle for waking this task from a callback
    pub fn signal_handle(&self) -> TaskSignal {
        TaskSignal {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Cloneable waker for a task, usable from radio callbacks
#[derive(Clone)]
pub struct TaskSignal {
    shared: Arc<Shared>,
}

impl TaskSignal {
    pub fn signal(&self) {
        let mut inner = self.shared.lock();
        inner.pending_signals = inner.pending_signals.saturating_add(1);
        drop(inner);
        self.shared.cond.notify_all();
    }
}

impl fmt::Debug for TaskSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSignal").finish_non_exhaustive()
    }
}

/// Read-only view of a task for `THREAD`
#[derive(Clone)]
pub struct TaskMonitor {
    name: &'static str,
    shared: Arc<Shared>,
}

impl TaskMonitor {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> TaskState {
        self.shared.state()
    }
}

impl fmt::Debug for TaskMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskMonitor")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// A gated OS thread with two-phase exit
pub struct RtTask {
    name: &'static str,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl RtTask {
    /// Create the thread with its gate closed
    pub fn spawn_gated<F>(name: &'static str, body: F) -> Result<Self, CtlError>
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                gate_open: false,
                started: false,
                exit: ExitPhase::Running,
                pending_signals: 0,
            }),
            cond: Condvar::new(),
        });

        let ctx = TaskContext {
            shared: Arc::clone(&shared),
        };
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                {
                    let mut inner = ctx.shared.lock();
                    while !inner.gate_open && inner.exit == ExitPhase::Running {
                        inner = ctx
                            .shared
                            .cond
                            .wait(inner)
                            .unwrap_or_else(PoisonError::into_inner);
                    }
                    // an opened gate always runs the body, which sees the
                    // exit request at its first wait
                    if !inner.gate_open {
                        inner.exit = ExitPhase::Confirmed;
                        drop(inner);
                        ctx.shared.cond.notify_all();
                        return;
                    }
                    inner.started = true;
                }
                let _confirm = ConfirmOnExit(&ctx.shared);
                body(&ctx);
            })
            .map_err(|e| CtlError::Task(format!("cannot spawn {}: {}", name, e)))?;

        debug!("task {} created (gated)", name);
        Ok(Self {
            name,
            shared,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Let the body run
    pub fn open_gate(&self) {
        self.shared.lock().gate_open = true;
        self.shared.cond.notify_all();
    }

    pub fn signal_handle(&self) -> TaskSignal {
        TaskSignal {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn monitor(&self) -> TaskMonitor {
        TaskMonitor {
            name: self.name,
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> TaskState {
        self.shared.state()
    }

    /// Two-phase exit: request, wait for confirmation, join
    pub fn terminate(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        {
            let mut inner = self.shared.lock();
            if inner.exit == ExitPhase::Running {
                inner.exit = ExitPhase::Requested;
            }
            self.shared.cond.notify_all();
            while inner.exit != ExitPhase::Confirmed {
                inner = self
                    .shared
                    .cond
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
        if handle.join().is_err() {
            warn!("task {} panicked", self.name);
        }
        debug!("task {} terminated", self.name);
    }
}

impl Drop for RtTask {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl fmt::Debug for RtTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtTask")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
