//! Background reader that empties a child's output pipe.
//!
//! A [`PipeDrainer`] runs a [`Task`] that waits briefly for the pipe to
//! become readable, reads whatever is there and appends it to a shared
//! buffer. The owner collects the bytes with [`PipeDrainer::take_buffered`].
//!
//! With a `max_buffered` limit the drainer stops reading once the buffer
//! holds that many bytes. The child then blocks on its own full pipe until
//! the consumer catches up, so the buffer never grows beyond the limit plus
//! one read chunk.

use std::io::{self, ErrorKind, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::task::{MAX_UNCHECKED_WAIT, StopToken, Task};

/// Bytes requested per read.
pub const READ_CHUNK: usize = 64 * 1024;

// ── PipeSource ───────────────────────────────────────────────────

/// A readable pipe end that can be waited on with a timeout.
pub trait PipeSource: Read + Send + 'static {
    /// Wait up to `timeout` for data or end of stream.
    ///
    /// Returns `Ok(true)` when a read will not block.
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool>;
}

#[cfg(unix)]
impl<T> PipeSource for T
where
    T: Read + std::os::fd::AsFd + Send + 'static,
{
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        use nix::errno::Errno;
        use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

        let millis = timeout.as_millis().min(u16::MAX as u128) as u16;
        let mut fds = [PollFd::new(self.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(0) => Ok(false),
            Ok(_) => Ok(fds[0].revents().is_some_and(|r| {
                r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
            })),
            Err(Errno::EINTR) => Ok(false),
            Err(e) => Err(io::Error::from(e)),
        }
    }
}

#[cfg(not(unix))]
impl<T> PipeSource for T
where
    T: Read + Send + 'static,
{
    fn wait_readable(&mut self, _timeout: Duration) -> io::Result<bool> {
        Ok(true)
    }
}

// ── PipeDrainer ──────────────────────────────────────────────────

#[derive(Default)]
struct DrainState {
    buffer: Mutex<BytesMut>,
    peak: AtomicUsize,
    eof: AtomicBool,
}

impl DrainState {
    fn buffered_len(&self) -> usize {
        self.buffer.lock().map(|b| b.len()).unwrap_or(0)
    }
}

/// Drains one pipe on a background thread.
pub struct PipeDrainer {
    name: String,
    task: Task,
    state: Arc<DrainState>,
}

impl PipeDrainer {
    /// Start draining `source`. `max_buffered` enables backpressure.
    pub fn spawn<S: PipeSource>(
        name: impl Into<String>,
        mut source: S,
        max_buffered: Option<usize>,
    ) -> Result<Self, EngineError> {
        let name = name.into();
        let state = Arc::new(DrainState::default());
        let shared = Arc::clone(&state);
        let label = name.clone();

        let task = Task::start(
            name.clone(),
            move |stop: &StopToken| -> Result<(), EngineError> {
                let mut chunk = vec![0u8; READ_CHUNK];
                while !stop.is_stop_requested() {
                    if max_buffered.is_some_and(|max| shared.buffered_len() >= max) {
                        stop.sleep(MAX_UNCHECKED_WAIT);
                        continue;
                    }

                    if !source.wait_readable(MAX_UNCHECKED_WAIT)? {
                        continue;
                    }

                    let n = match source.read(&mut chunk) {
                        Ok(0) => {
                            debug!("{label}: end of stream");
                            shared.eof.store(true, Ordering::SeqCst);
                            return Ok(());
                        }
                        Ok(n) => n,
                        Err(e)
                            if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) =>
                        {
                            continue;
                        }
                        Err(e) => {
                            warn!("{label}: read failed: {e}");
                            return Err(e.into());
                        }
                    };

                    if let Ok(mut buffer) = shared.buffer.lock() {
                        buffer.extend_from_slice(&chunk[..n]);
                        shared.peak.fetch_max(buffer.len(), Ordering::Relaxed);
                    }
                }
                Ok(())
            },
        )?;

        Ok(Self { name, task, state })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return and clear everything read so far.
    pub fn take_buffered(&self) -> Bytes {
        match self.state.buffer.lock() {
            Ok(mut buffer) => buffer.split().freeze(),
            Err(_) => Bytes::new(),
        }
    }

    /// Bytes waiting to be taken.
    pub fn buffered_len(&self) -> usize {
        self.state.buffered_len()
    }

    /// Largest the buffer has ever been.
    pub fn peak_buffered(&self) -> usize {
        self.state.peak.load(Ordering::Relaxed)
    }

    /// Whether the pipe reported end of stream.
    pub fn reached_eof(&self) -> bool {
        self.state.eof.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// Running, or finished because the writer closed its end.
    pub fn is_healthy(&self) -> bool {
        self.is_running() || self.reached_eof()
    }

    /// Stop the reader thread.
    pub fn terminate(&mut self, timeout: Duration) -> bool {
        self.task.terminate(timeout)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::net::UnixStream;
    use std::time::Instant;

    fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn drains_and_reports_eof() {
        let (mut writer, reader) = UnixStream::pair().unwrap();
        let drainer = PipeDrainer::spawn("test.stdout", reader, None).unwrap();

        writer.write_all(b"hello ").unwrap();
        writer.write_all(b"world").unwrap();
        drop(writer);

        assert!(wait_until(Duration::from_secs(2), || drainer.reached_eof()));
        assert_eq!(&drainer.take_buffered()[..], b"hello world");
        assert!(drainer.take_buffered().is_empty());
        assert!(drainer.is_healthy());
    }

    #[test]
    fn backpressure_caps_buffer() {
        let (mut writer, reader) = UnixStream::pair().unwrap();
        writer.set_nonblocking(true).unwrap();
        let max = 1024;
        let drainer = PipeDrainer::spawn("bounded", reader, Some(max)).unwrap();

        let block = vec![1u8; 4096];
        let start = Instant::now();
        let mut offered = 0usize;
        while start.elapsed() < Duration::from_millis(300) {
            match writer.write(&block) {
                Ok(n) => offered += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(5))
                }
                Err(e) => panic!("{e}"),
            }
        }

        assert!(offered > max);
        assert!(drainer.peak_buffered() <= max + READ_CHUNK);
        assert!(drainer.buffered_len() >= max);

        // Consuming lets the drainer resume.
        let first = drainer.take_buffered().len();
        assert!(first >= max);
        assert!(wait_until(Duration::from_secs(2), || drainer.buffered_len() > 0));
    }

    #[test]
    fn terminate_stops_idle_reader() {
        let (_writer, reader) = UnixStream::pair().unwrap();
        let mut drainer = PipeDrainer::spawn("idle", reader, None).unwrap();
        assert!(drainer.is_running());
        assert!(drainer.terminate(Duration::from_secs(1)));
        assert!(!drainer.is_running());
        assert!(!drainer.reached_eof());
        assert!(!drainer.is_healthy());
    }
}
