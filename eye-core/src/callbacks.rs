//! Caller-supplied notification hooks.
//!
//! Background stages never return errors to the caller directly; they
//! report through these. Every hook may be invoked from any stage thread.

use std::sync::Arc;

use crate::error::EngineError;

/// Human-readable progress and error messages.
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Total playback duration in milliseconds.
pub type DurationCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Playback position in milliseconds.
pub type PositionCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Cumulative presentation delay in milliseconds.
pub type DelayCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// The external timing reference missed a white field.
pub type NoSignalCallback = Arc<dyn Fn() + Send + Sync>;

/// Formatted `mean ± stddev` latency.
pub type LatencyCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// A stage hit a fatal error and is shutting down.
pub type ErrorCallback = Arc<dyn Fn(&EngineError) + Send + Sync>;

/// A log sink that discards everything.
pub fn silent_log() -> LogSink {
    Arc::new(|_: &str| {})
}

/// Route stage errors to `log` as `ERROR: ...` lines.
pub fn errors_to_log(log: LogSink) -> ErrorCallback {
    Arc::new(move |e: &EngineError| log(&format!("ERROR: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn errors_are_prefixed() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let on_error = errors_to_log(Arc::new(move |m: &str| {
            sink.lock().unwrap().push(m.to_string())
        }));
        on_error(&EngineError::NoCompatibleRefreshRate);
        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ERROR: "));
    }
}
