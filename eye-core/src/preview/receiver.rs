//! Preview receiver stage.
//!
//! Opens a channel for reading, then loops reading a header, validating it
//! and reading exactly the payload it announces. Each assembled frame is
//! published to a queue from which only the newest item is ever used.

use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::EngineError;
use crate::preview::header::{PreviewHeader, PreviewHeaderBytes};
use crate::preview::pipe::open_inbound;
use crate::process::PipeSource;
use crate::queue::BlockingQueue;
use crate::task::{MAX_UNCHECKED_WAIT, StopToken, Task};

/// A frame received over a preview channel. Pixels are BGRA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewImage {
    pub frame_number: u32,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Receiver tunables.
#[derive(Debug, Clone, Copy)]
pub struct ReceiverConfig {
    pub open_attempts: u32,
    pub retry_delay: Duration,
    pub max_frame_bytes: usize,
}

/// Result of filling a buffer from the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Filled,
    /// The writer closed its end.
    Closed,
    Stopped,
}

/// Fill `buf` completely, staying responsive to `stop`.
///
/// End of stream counts as `Closed` only once the writer has sent
/// something; before that it means no writer has attached yet.
pub fn read_exact_cancellable<S: PipeSource>(
    source: &mut S,
    buf: &mut [u8],
    seen_data: &mut bool,
    stop: &StopToken,
) -> Result<ReadStatus, EngineError> {
    let mut filled = 0;
    while filled < buf.len() {
        if stop.is_stop_requested() {
            return Ok(ReadStatus::Stopped);
        }
        if !source.wait_readable(MAX_UNCHECKED_WAIT)? {
            continue;
        }
        match source.read(&mut buf[filled..]) {
            Ok(0) if *seen_data => return Ok(ReadStatus::Closed),
            Ok(0) => {
                stop.sleep(MAX_UNCHECKED_WAIT);
            }
            Ok(n) => {
                filled += n;
                *seen_data = true;
            }
            Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(ReadStatus::Filled)
}

/// Read frames from `source` until the writer closes or `stop` is raised.
pub fn receive_frames<S: PipeSource>(
    source: &mut S,
    output: &BlockingQueue<PreviewImage>,
    max_frame_bytes: usize,
    stop: &StopToken,
) -> Result<u64, EngineError> {
    let mut seen_data = false;
    let mut received = 0u64;
    loop {
        let mut raw: PreviewHeaderBytes = [0; PreviewHeader::SIZE];
        match read_exact_cancellable(source, &mut raw, &mut seen_data, stop)? {
            ReadStatus::Filled => {}
            ReadStatus::Closed | ReadStatus::Stopped => return Ok(received),
        }
        let header = PreviewHeader::from_bytes(&raw);
        header.validate(max_frame_bytes)?;

        let mut data = vec![0u8; header.byte_length as usize];
        match read_exact_cancellable(source, &mut data, &mut seen_data, stop)? {
            ReadStatus::Filled => {}
            ReadStatus::Closed | ReadStatus::Stopped => return Ok(received),
        }

        output.push(PreviewImage {
            frame_number: header.frame_number,
            width: header.width,
            height: header.height,
            data,
        });
        received += 1;
    }
}

/// Background stage reading one preview channel.
pub struct PreviewReceiver {
    task: Task,
}

impl PreviewReceiver {
    pub fn spawn(
        channel: String,
        output: Arc<BlockingQueue<PreviewImage>>,
        config: ReceiverConfig,
    ) -> Result<Self, EngineError> {
        let task = Task::start(
            "preview-receive",
            move |stop: &StopToken| -> Result<(), EngineError> {
                let mut pipe = open_inbound(&channel, config.open_attempts, config.retry_delay, stop)?;
                info!("preview channel {channel} opened for reading");
                let received = receive_frames(&mut pipe, &output, config.max_frame_bytes, stop)?;
                debug!("preview channel {channel} finished after {received} frames");
                Ok(())
            },
        )?;
        Ok(Self { task })
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// The stage's result once it has stopped.
    pub fn outcome(&self) -> Option<Result<(), String>> {
        self.task.outcome()
    }

    pub fn terminate(&mut self, timeout: Duration) -> bool {
        self.task.terminate(timeout)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    fn send(stream: &mut UnixStream, n: u32, w: u32, h: u32, fill: u8) {
        let len = w * h * 4;
        stream
            .write_all(&PreviewHeader::new(n, w, h, len).to_bytes())
            .unwrap();
        stream.write_all(&vec![fill; len as usize]).unwrap();
    }

    #[test]
    fn receives_frames_until_writer_closes() {
        let (mut writer, mut reader) = UnixStream::pair().unwrap();
        send(&mut writer, 0, 2, 2, 7);
        send(&mut writer, 1, 1, 3, 9);
        drop(writer);

        let queue = BlockingQueue::new();
        let stop = StopToken::detached();
        let received = receive_frames(&mut reader, &queue, 1 << 20, &stop).unwrap();
        assert_eq!(received, 2);

        let frames = queue.pop_all_available(Duration::ZERO);
        assert_eq!(frames[0].frame_number, 0);
        assert_eq!(frames[0].data, vec![7; 16]);
        assert_eq!((frames[1].width, frames[1].height), (1, 3));
    }

    #[test]
    fn oversized_header_is_an_error() {
        let (mut writer, mut reader) = UnixStream::pair().unwrap();
        writer
            .write_all(&PreviewHeader::new(0, 100, 100, 40_000).to_bytes())
            .unwrap();
        let queue = BlockingQueue::new();
        let stop = StopToken::detached();
        let err = receive_frames(&mut reader, &queue, 1024, &stop).unwrap_err();
        assert!(matches!(err, EngineError::FrameTooLarge { .. }));
    }

    #[test]
    fn partial_frame_at_close_is_dropped() {
        let (mut writer, mut reader) = UnixStream::pair().unwrap();
        writer
            .write_all(&PreviewHeader::new(0, 2, 2, 16).to_bytes())
            .unwrap();
        writer.write_all(&[1u8; 5]).unwrap();
        drop(writer);
        let queue = BlockingQueue::new();
        let stop = StopToken::detached();
        assert_eq!(receive_frames(&mut reader, &queue, 1024, &stop).unwrap(), 0);
        assert!(queue.is_empty());
    }
}
