//! Domain-specific error types for the capture/playback engine.
//!
//! All fallible operations return `Result<T, EngineError>`.
//! Background stages never pass an error through a queue; they report it
//! through their own callback and stop themselves.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    // ── Initialization Errors ────────────────────────────────────
    /// A command was issued before `initialize`.
    #[error("Library has not been initialized")]
    NotInitialized,

    /// A conflicting operation is already running.
    #[error("{0} already in progress")]
    AlreadyActive(&'static str),

    /// A command needs an operation that is not running.
    #[error("{0} is not in progress")]
    NotActive(&'static str),

    /// A preview channel was requested with nothing to preview.
    #[error("Create video input or output before preview channel")]
    NoActiveSource,

    /// A caller-supplied argument is unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // ── Process Errors ───────────────────────────────────────────
    /// The child process could not be created.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The child process exited while the stage still needed it.
    #[error("{program} exited unexpectedly ({status})")]
    ProcessExited { program: String, status: String },

    /// A pipe drainer thread died while its process was still alive.
    #[error("{0} reader thread exited unexpectedly")]
    DrainerFailed(String),

    /// Fewer bytes than requested reached the child's stdin.
    #[error("short write: expected {expected} bytes, wrote {written}")]
    ShortWrite { expected: usize, written: usize },

    // ── I/O Errors ───────────────────────────────────────────────
    /// A pipe or file operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── Protocol Errors ──────────────────────────────────────────
    /// A preview frame header failed validation.
    #[error("invalid frame header: {0}")]
    InvalidHeader(&'static str),

    /// A channel operation was attempted in the wrong state.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// A preview frame is larger than the receiver accepts.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    // ── Timing / Configuration Errors ────────────────────────────
    /// The display refresh rate is not an integer multiple of the frame rate.
    #[error("refresh rate {refresh_rate} Hz is not an integer multiple of {fps} fps")]
    RefreshRateMismatch { refresh_rate: u32, fps: u32 },

    /// No supported refresh rate fits every video.
    #[error("Invalid combination of monitor refresh rates and video frame rates")]
    NoCompatibleRefreshRate,

    // ── Collaborator Errors ──────────────────────────────────────
    /// The presentation surface failed to open or present.
    #[error("presentation surface: {0}")]
    Surface(String),

    /// The probe output could not be interpreted.
    #[error("probe failed: {0}")]
    Probe(String),

    /// Probe output was not valid JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Resize or encode of a frame failed.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    // ── Task Errors ─────────────────────────────────────────────
    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The operation was abandoned because its task was asked to stop.
    #[error("operation cancelled")]
    Cancelled,

    /// A background task failed.
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── TaskError ─────────────────────────────────────────────────────

/// Typed error for background tasks.
#[derive(Debug, Error)]
pub enum TaskError {
    /// `spawn` was called on a task that has already been started.
    #[error("task {0} already started")]
    AlreadyStarted(String),

    /// The OS refused to create the thread.
    #[error("failed to spawn thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The task body panicked.
    #[error("task {0} panicked")]
    Panicked(String),

    /// The task body returned an error.
    #[error("task {name} failed: {reason}")]
    Failed { name: String, reason: String },
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Other(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Other(s.to_string())
    }
}

#[cfg(unix)]
impl From<nix::errno::Errno> for EngineError {
    fn from(e: nix::errno::Errno) -> Self {
        EngineError::Io(std::io::Error::from(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = EngineError::NotInitialized;
        assert_eq!(e.to_string(), "Library has not been initialized");

        let e = EngineError::AlreadyActive("Recording");
        assert_eq!(e.to_string(), "Recording already in progress");

        let e = EngineError::FrameTooLarge {
            size: 1000,
            max: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));
    }

    #[test]
    fn refresh_mismatch_names_both_rates() {
        let e = EngineError::RefreshRateMismatch {
            refresh_rate: 60,
            fps: 25,
        };
        assert!(e.to_string().contains("60 Hz"));
        assert!(e.to_string().contains("25 fps"));
    }

    #[test]
    fn from_string() {
        let e: EngineError = "something broke".into();
        assert!(matches!(e, EngineError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: EngineError = io_err.into();
        assert!(matches!(e, EngineError::Io(_)));
    }

    #[test]
    fn from_task_error() {
        let e: EngineError = TaskError::AlreadyStarted("record".into()).into();
        assert!(e.to_string().contains("record"));
    }
}
