//! External child processes with drained output pipes.
//!
//! A [`ChildProcess`] owns the spawned program, its stdin and one
//! [`PipeDrainer`] per output stream. Stderr (and stdout, for programs whose
//! stdout is not data) is forwarded line by line to `tracing::debug!`.
//!
//! The owning stage calls [`ChildProcess::check_drainers`] every poll cycle:
//! a reader thread that dies while the process is alive is fatal to the
//! stage.

pub mod drainer;

use std::io::{ErrorKind, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::task::{MAX_UNCHECKED_WAIT, StopToken};

pub use drainer::{PipeDrainer, PipeSource, READ_CHUNK};

// ── Line forwarding ──────────────────────────────────────────────

/// Splits a byte stream into lines for the log, carrying partial lines.
#[derive(Debug, Default)]
struct LineForwarder {
    partial: String,
}

impl LineForwarder {
    fn feed(&mut self, label: &str, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.partial.push_str(&String::from_utf8_lossy(data));
        while let Some(end) = self.partial.find(['\n', '\r']) {
            let line: String = self.partial.drain(..=end).collect();
            let line = line.trim_end();
            if !line.is_empty() {
                debug!("[{label}] {line}");
            }
        }
    }

    fn flush(&mut self, label: &str) {
        let line = std::mem::take(&mut self.partial);
        let line = line.trim_end();
        if !line.is_empty() {
            debug!("[{label}] {line}");
        }
    }
}

// ── ChildProcess ─────────────────────────────────────────────────

/// How the child's stdout is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdoutMode {
    /// Text for the log.
    Diagnostic,
    /// Payload the owner collects with [`ChildProcess::take_stdout`],
    /// optionally capped for backpressure.
    Data { max_buffered: Option<usize> },
}

/// A spawned program with piped stdin/stdout/stderr.
pub struct ChildProcess {
    program: String,
    child: Child,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: PipeDrainer,
    stderr: PipeDrainer,
    stdout_mode: StdoutMode,
    stdout_lines: LineForwarder,
    stderr_lines: LineForwarder,
    status: Option<ExitStatus>,
}

impl ChildProcess {
    /// Spawn `executable` with `args`, all three streams piped.
    pub fn spawn(
        executable: &str,
        args: &[String],
        stdout_mode: StdoutMode,
    ) -> Result<Self, EngineError> {
        let program = std::path::Path::new(executable)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(executable)
            .to_string();

        let mut child = Command::new(executable)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: executable.to_string(),
                source,
            })?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let (Some(out), Some(err)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(EngineError::Spawn {
                program: executable.to_string(),
                source: std::io::Error::new(ErrorKind::BrokenPipe, "output pipes unavailable"),
            });
        };

        let max_buffered = match stdout_mode {
            StdoutMode::Diagnostic => None,
            StdoutMode::Data { max_buffered } => max_buffered,
        };
        let stdout = PipeDrainer::spawn(format!("{program}.stdout"), out, max_buffered);
        let stderr = PipeDrainer::spawn(format!("{program}.stderr"), err, None);
        let (stdout, stderr) = match (stdout, stderr) {
            (Ok(o), Ok(e)) => (o, e),
            (Err(e), _) | (_, Err(e)) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        info!("started {program} (pid {pid})");
        Ok(Self {
            program,
            child,
            pid: Some(pid),
            stdin,
            stdout,
            stderr,
            stdout_mode,
            stdout_lines: LineForwarder::default(),
            stderr_lines: LineForwarder::default(),
            status: None,
        })
    }

    /// Short program name used in logs.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// OS process id, `None` once the process has been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Poll the OS for exit status.
    pub fn is_alive(&mut self) -> bool {
        self.exit_status().is_none()
    }

    /// The exit status if the process has exited.
    pub fn exit_status(&mut self) -> Option<ExitStatus> {
        if self.status.is_none() {
            match self.child.try_wait() {
                Ok(Some(status)) => self.reaped(status),
                Ok(None) => {}
                Err(e) => {
                    warn!("{}: failed to poll exit status: {e}", self.program);
                }
            }
        }
        self.status
    }

    fn reaped(&mut self, status: ExitStatus) {
        debug!("{} exited with {status}", self.program);
        self.status = Some(status);
        self.pid = None;
    }

    /// Write all of `data` to the child's stdin.
    pub fn write_stdin(&mut self, data: &[u8]) -> Result<(), EngineError> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(EngineError::ShortWrite {
                expected: data.len(),
                written: 0,
            });
        };
        let mut written = 0;
        while written < data.len() {
            match stdin.write(&data[written..]) {
                Ok(0) => {
                    return Err(EngineError::ShortWrite {
                        expected: data.len(),
                        written,
                    });
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Close stdin, signalling end of input. Idempotent.
    pub fn close_stdin(&mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.flush();
        }
    }

    /// Everything the child wrote to stdout since the last call.
    pub fn take_stdout(&self) -> bytes::Bytes {
        self.stdout.take_buffered()
    }

    /// Whether stdout reached end of stream.
    pub fn stdout_finished(&self) -> bool {
        self.stdout.reached_eof()
    }

    /// Forward buffered stderr (and diagnostic stdout) to the log.
    pub fn pump_diagnostics(&mut self) {
        let err = self.stderr.take_buffered();
        self.stderr_lines
            .feed(&format!("{}.stderr", self.program), &err);
        if self.stdout_mode == StdoutMode::Diagnostic {
            let out = self.stdout.take_buffered();
            self.stdout_lines
                .feed(&format!("{}.stdout", self.program), &out);
        }
    }

    /// Fail if a reader thread died without reaching end of stream.
    pub fn check_drainers(&self) -> Result<(), EngineError> {
        for drainer in [&self.stdout, &self.stderr] {
            if !drainer.is_healthy() {
                return Err(EngineError::DrainerFailed(drainer.name().to_string()));
            }
        }
        Ok(())
    }

    /// Wait up to `timeout` for the process to exit on its own.
    ///
    /// Returns early with `None` if `stop` is raised.
    pub fn wait_for_exit(
        &mut self,
        timeout: Duration,
        stop: Option<&StopToken>,
    ) -> Option<ExitStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump_diagnostics();
            if let Some(status) = self.exit_status() {
                return Some(status);
            }
            if Instant::now() >= deadline {
                return None;
            }
            match stop {
                Some(token) => {
                    if token.sleep(MAX_UNCHECKED_WAIT) {
                        return None;
                    }
                }
                None => std::thread::sleep(MAX_UNCHECKED_WAIT),
            }
        }
    }

    /// Forcefully kill the process and reap it.
    pub fn terminate(&mut self) {
        self.close_stdin();
        if self.exit_status().is_none() {
            warn!("terminating {}", self.program);
            let _ = self.child.kill();
            match self.child.wait() {
                Ok(status) => self.reaped(status),
                Err(e) => warn!("{}: wait after kill failed: {e}", self.program),
            }
        }
    }

    /// Close stdin, wait up to `timeout` for a clean exit, then kill.
    ///
    /// Returns whether the process exited on its own.
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        self.close_stdin();
        let clean = self.wait_for_exit(timeout, None).is_some();
        if !clean {
            warn!("{} did not exit within {timeout:?}", self.program);
            self.terminate();
        }
        clean
    }

    fn stop_drainers(&mut self) {
        self.pump_diagnostics();
        self.stdout.terminate(Duration::from_millis(100));
        self.stderr.terminate(Duration::from_millis(100));
        let stderr = self.stderr.take_buffered();
        self.stderr_lines
            .feed(&format!("{}.stderr", self.program), &stderr);
        self.stderr_lines.flush(&format!("{}.stderr", self.program));
        self.stdout_lines.flush(&format!("{}.stdout", self.program));
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        self.terminate();
        self.stop_drainers();
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".into(), script.into()]
    }

    #[test]
    fn missing_executable_is_spawn_error() {
        let err = ChildProcess::spawn("/nonexistent/encoder", &[], StdoutMode::Diagnostic)
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Spawn { .. }));
    }

    #[test]
    fn stdin_round_trips_through_cat() {
        let mut p = ChildProcess::spawn(
            "/bin/sh",
            &sh("cat"),
            StdoutMode::Data { max_buffered: None },
        )
        .unwrap();
        assert!(p.pid().is_some());
        p.write_stdin(b"abcdef").unwrap();
        p.close_stdin();
        p.close_stdin();

        let status = p.wait_for_exit(Duration::from_secs(5), None).unwrap();
        assert!(status.success());
        assert!(p.pid().is_none());

        let start = Instant::now();
        while !p.stdout_finished() && start.elapsed() < Duration::from_secs(2) {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(&p.take_stdout()[..], b"abcdef");
        p.check_drainers().unwrap();
    }

    #[test]
    fn terminate_kills_long_runner() {
        let mut p = ChildProcess::spawn("/bin/sh", &sh("sleep 30"), StdoutMode::Diagnostic)
            .unwrap();
        assert!(p.is_alive());
        assert!(p.wait_for_exit(Duration::from_millis(30), None).is_none());
        p.terminate();
        assert!(!p.is_alive());
    }

    #[test]
    fn shutdown_reports_clean_exit() {
        let mut p = ChildProcess::spawn("/bin/sh", &sh("cat >/dev/null"), StdoutMode::Diagnostic)
            .unwrap();
        assert!(p.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn wait_returns_early_on_stop() {
        let task = crate::task::Task::new("waiter");
        let token = task.stop_token();
        task.request_stop();
        let mut p = ChildProcess::spawn("/bin/sh", &sh("sleep 30"), StdoutMode::Diagnostic)
            .unwrap();
        let start = Instant::now();
        assert!(p.wait_for_exit(Duration::from_secs(10), Some(&token)).is_none());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn write_after_close_is_short_write() {
        let mut p = ChildProcess::spawn("/bin/sh", &sh("cat >/dev/null"), StdoutMode::Diagnostic)
            .unwrap();
        p.close_stdin();
        let err = p.write_stdin(b"x").unwrap_err();
        assert!(matches!(err, EngineError::ShortWrite { written: 0, .. }));
    }
}
