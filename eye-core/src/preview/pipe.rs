//! Named, unidirectional, single-reader pipes.
//!
//! On Unix a channel is a FIFO in the temporary directory. The writer
//! creates it without blocking and learns later whether a reader has
//! attached; the reader retries until the FIFO exists.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::EngineError;
use crate::task::StopToken;

static CHANNEL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A channel name no other call in any process will produce.
pub fn generate_channel_name() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let n = CHANNEL_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir()
        .join(format!("eye-preview-{}-{n}-{nanos}", std::process::id()))
        .to_string_lossy()
        .into_owned()
}

// ── Writer side ──────────────────────────────────────────────────

/// The writing end of a channel.
pub trait OutboundPipe: Send {
    /// Check, without blocking, whether the reader has attached.
    fn poll_connected(&mut self) -> io::Result<bool>;

    /// Write some of `buf`. May fail with [`io::ErrorKind::WouldBlock`].
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Wait up to `timeout` for room in the pipe.
    fn wait_writable(&mut self, timeout: Duration) -> io::Result<()>;
}

/// Creates the writing end of a channel.
pub trait PipeConnector: Send + Sync {
    fn create(&self, name: &str) -> io::Result<Box<dyn OutboundPipe>>;
}

/// Connector for the platform's named pipes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NamedPipeConnector;

// ── Unix FIFOs ───────────────────────────────────────────────────

#[cfg(unix)]
mod fifo {
    use super::*;
    use std::fs::{File, OpenOptions};
    use std::io::{ErrorKind, Write};
    use std::os::fd::AsFd;
    use std::os::unix::fs::OpenOptionsExt;
    use std::path::PathBuf;

    use nix::errno::Errno;
    use nix::fcntl::OFlag;
    use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
    use nix::sys::stat::Mode;
    use tracing::{debug, warn};

    fn poll_timeout(timeout: Duration) -> PollTimeout {
        PollTimeout::from(timeout.as_millis().min(u16::MAX as u128) as u16)
    }

    pub struct FifoWriter {
        path: PathBuf,
        file: Option<File>,
    }

    impl FifoWriter {
        pub fn create(name: &str) -> io::Result<Self> {
            let path = PathBuf::from(name);
            match nix::unistd::mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR) {
                Ok(()) | Err(Errno::EEXIST) => {}
                Err(e) => return Err(e.into()),
            }
            debug!("created preview fifo {}", path.display());
            let mut writer = Self { path, file: None };
            writer.try_open()?;
            Ok(writer)
        }

        fn try_open(&mut self) -> io::Result<bool> {
            if self.file.is_some() {
                return Ok(true);
            }
            let opened = OpenOptions::new()
                .write(true)
                .custom_flags(OFlag::O_NONBLOCK.bits())
                .open(&self.path);
            match opened {
                Ok(file) => {
                    self.file = Some(file);
                    Ok(true)
                }
                // No reader yet.
                Err(e) if e.raw_os_error() == Some(Errno::ENXIO as i32) => Ok(false),
                Err(e) => Err(e),
            }
        }

        fn file(&mut self) -> io::Result<&mut File> {
            self.file
                .as_mut()
                .ok_or_else(|| io::Error::new(ErrorKind::NotConnected, "no reader attached"))
        }
    }

    impl OutboundPipe for FifoWriter {
        fn poll_connected(&mut self) -> io::Result<bool> {
            self.try_open()
        }

        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.file()?.write(buf)
        }

        fn wait_writable(&mut self, timeout: Duration) -> io::Result<()> {
            let file = self.file()?;
            let mut fds = [PollFd::new(file.as_fd(), PollFlags::POLLOUT)];
            match poll(&mut fds, poll_timeout(timeout)) {
                Ok(_) | Err(Errno::EINTR) => Ok(()),
                Err(e) => Err(e.into()),
            }
        }
    }

    impl Drop for FifoWriter {
        fn drop(&mut self) {
            self.file.take();
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != ErrorKind::NotFound {
                    warn!("failed to remove {}: {e}", self.path.display());
                }
            }
        }
    }

    /// Open `name` for reading without waiting for a writer.
    pub fn open_for_reading(name: &str) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(name)
    }
}

#[cfg(unix)]
impl PipeConnector for NamedPipeConnector {
    fn create(&self, name: &str) -> io::Result<Box<dyn OutboundPipe>> {
        Ok(Box::new(fifo::FifoWriter::create(name)?))
    }
}

#[cfg(not(unix))]
impl PipeConnector for NamedPipeConnector {
    fn create(&self, _name: &str) -> io::Result<Box<dyn OutboundPipe>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "named pipes are not supported on this platform",
        ))
    }
}

// ── Reader side ──────────────────────────────────────────────────

/// The reading end of a channel.
#[cfg(unix)]
pub type InboundPipe = std::fs::File;

/// Open the reading end of `name`, retrying while it does not exist yet.
///
/// Gives up after `attempts` tries spaced `delay` apart, or when `stop` is
/// raised.
#[cfg(unix)]
pub fn open_inbound(
    name: &str,
    attempts: u32,
    delay: Duration,
    stop: &StopToken,
) -> Result<InboundPipe, EngineError> {
    let mut last = None;
    for _ in 0..attempts.max(1) {
        match fifo::open_for_reading(name) {
            Ok(file) => return Ok(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => last = Some(e),
            Err(e) => return Err(e.into()),
        }
        if stop.sleep(delay) {
            return Err(EngineError::Cancelled);
        }
    }
    Err(last
        .map(EngineError::Io)
        .unwrap_or(EngineError::Timeout(delay * attempts)))
}

#[cfg(not(unix))]
pub type InboundPipe = std::fs::File;

#[cfg(not(unix))]
pub fn open_inbound(
    _name: &str,
    _attempts: u32,
    _delay: Duration,
    _stop: &StopToken,
) -> Result<InboundPipe, EngineError> {
    Err(EngineError::Io(io::Error::new(
        io::ErrorKind::Unsupported,
        "named pipes are not supported on this platform",
    )))
}
