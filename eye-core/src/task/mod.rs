//! Cancellable background tasks.
//!
//! A [`Task`] owns one OS thread running a [`Runnable`] body. Cancellation is
//! cooperative: [`Task::request_stop`] raises a flag that the body observes
//! through its [`StopToken`] between units of work and at every wait.
//!
//! ```text
//!  Created ──spawn──► Running ──request_stop──► Stopping
//!                        │                          │
//!                        └──────► Completed ◄───────┘
//! ```
//!
//! Rust threads cannot be killed from outside. When [`Task::terminate`] runs
//! out of patience it detaches the thread and logs a warning; the body keeps
//! its stop flag raised and exits at its next check.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{EngineError, TaskError};

/// Longest a task body may block without re-checking its stop flag.
pub const MAX_UNCHECKED_WAIT: Duration = Duration::from_millis(10);

// ── TaskState ────────────────────────────────────────────────────

/// Lifecycle of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskState {
    #[default]
    Created,
    Running,
    Stopping,
    Completed,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Completed => write!(f, "Completed"),
        }
    }
}

// ── Runnable ─────────────────────────────────────────────────────

/// The body of a background task.
pub trait Runnable: Send + 'static {
    /// Execute until finished or until `stop` is raised.
    fn run(&mut self, stop: &StopToken) -> Result<(), EngineError>;
}

impl<F> Runnable for F
where
    F: FnMut(&StopToken) -> Result<(), EngineError> + Send + 'static,
{
    fn run(&mut self, stop: &StopToken) -> Result<(), EngineError> {
        self(stop)
    }
}

// ── Shared state ─────────────────────────────────────────────────

struct Shared {
    stop: AtomicBool,
    state: Mutex<TaskState>,
    changed: Condvar,
    outcome: Mutex<Option<Result<(), String>>>,
}

impl Shared {
    fn set_state(&self, next: TaskState) {
        if let Ok(mut state) = self.state.lock() {
            // Completed is terminal.
            if *state != TaskState::Completed {
                *state = next;
            }
        }
        self.changed.notify_all();
    }

    fn state(&self) -> TaskState {
        self.state.lock().map(|s| *s).unwrap_or(TaskState::Completed)
    }
}

// ── StopToken ────────────────────────────────────────────────────

/// Handle through which a task body observes cancellation.
#[derive(Clone)]
pub struct StopToken {
    shared: Arc<Shared>,
}

impl StopToken {
    /// Whether the owner asked the task to stop.
    pub fn is_stop_requested(&self) -> bool {
        self.shared.stop.load(Ordering::SeqCst)
    }

    /// Sleep for up to `duration`, waking early on a stop request.
    ///
    /// Returns `true` if a stop was requested.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let Ok(mut state) = self.shared.state.lock() else {
            return self.is_stop_requested();
        };
        while !self.is_stop_requested() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match self.shared.changed.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => state = guard,
                Err(_) => break,
            }
        }
        self.is_stop_requested()
    }

    /// A token that is never stopped, for running a body inline.
    pub fn detached() -> Self {
        Self {
            shared: Arc::new(Shared {
                stop: AtomicBool::new(false),
                state: Mutex::new(TaskState::Running),
                changed: Condvar::new(),
                outcome: Mutex::new(None),
            }),
        }
    }
}

// ── Task ─────────────────────────────────────────────────────────

/// A named background thread with cooperative cancellation and a
/// bounded-wait join.
pub struct Task {
    name: String,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Task {
    /// Create a task that has not yet started.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Shared {
                stop: AtomicBool::new(false),
                state: Mutex::new(TaskState::Created),
                changed: Condvar::new(),
                outcome: Mutex::new(None),
            }),
            handle: None,
        }
    }

    /// Create and immediately start a task.
    pub fn start<R: Runnable>(name: impl Into<String>, body: R) -> Result<Self, TaskError> {
        let mut task = Self::new(name);
        task.spawn(body)?;
        Ok(task)
    }

    /// Start background execution. Fails if the task was already started.
    pub fn spawn<R: Runnable>(&mut self, mut body: R) -> Result<(), TaskError> {
        if self.state() != TaskState::Created {
            return Err(TaskError::AlreadyStarted(self.name.clone()));
        }
        self.shared.set_state(TaskState::Running);

        let shared = Arc::clone(&self.shared);
        let name = self.name.clone();
        let spawned = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let token = StopToken {
                    shared: Arc::clone(&shared),
                };
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    body.run(&token)
                }));
                let outcome = match result {
                    Ok(Ok(())) => {
                        debug!("task {name} completed");
                        Ok(())
                    }
                    Ok(Err(e)) => {
                        warn!("task {name} failed: {e}");
                        Err(e.to_string())
                    }
                    Err(_) => {
                        warn!("task {name} panicked");
                        Err(TaskError::Panicked(name.clone()).to_string())
                    }
                };
                if let Ok(mut slot) = shared.outcome.lock() {
                    *slot = Some(outcome);
                }
                shared.set_state(TaskState::Completed);
            });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(source) => {
                self.shared.set_state(TaskState::Completed);
                Err(TaskError::Spawn {
                    name: self.name.clone(),
                    source,
                })
            }
        }
    }

    /// The task's name, also used as the thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.shared.state()
    }

    /// Whether the body is still executing.
    pub fn is_running(&self) -> bool {
        matches!(self.state(), TaskState::Running | TaskState::Stopping)
    }

    /// Raise the cooperative stop flag.
    pub fn request_stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if self.state() == TaskState::Running {
            self.shared.set_state(TaskState::Stopping);
        } else {
            // Sleepers check the flag under this lock.
            let _guard = self.shared.state.lock();
            self.shared.changed.notify_all();
        }
    }

    /// A token observing this task's stop flag.
    pub fn stop_token(&self) -> StopToken {
        StopToken {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Block until the body completes or `timeout` elapses.
    ///
    /// Returns `true` if the task completed (or never started).
    pub fn join(&mut self, timeout: Duration) -> bool {
        if self.state() == TaskState::Created {
            return true;
        }
        let deadline = Instant::now() + timeout;
        {
            let Ok(mut state) = self.shared.state.lock() else {
                return false;
            };
            while *state != TaskState::Completed {
                let now = Instant::now();
                if now >= deadline {
                    return false;
                }
                match self.shared.changed.wait_timeout(state, deadline - now) {
                    Ok((guard, _)) => state = guard,
                    Err(_) => return false,
                }
            }
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        true
    }

    /// Request a stop and wait up to `timeout` for completion.
    ///
    /// If the body does not finish in time the thread is detached and
    /// `false` is returned.
    pub fn terminate(&mut self, timeout: Duration) -> bool {
        self.request_stop();
        if self.join(timeout) {
            return true;
        }
        warn!(
            "task {} did not stop within {:?}; detaching thread",
            self.name, timeout
        );
        self.handle.take();
        false
    }

    /// The body's result once it has completed.
    pub fn outcome(&self) -> Option<Result<(), String>> {
        self.shared.outcome.lock().ok().and_then(|o| o.clone())
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if self.is_running() {
            self.terminate(Duration::from_millis(100));
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
