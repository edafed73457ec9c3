//! Recording pipeline.
//!
//! ```text
//!  queue_frame ──► pending ──► encoder stage ──► preview sender ──► completed
//!                                   │
//!                                   └──► encoder stdin
//! ```
//!
//! Frames arrive at whatever size the capture source produced. Frames that
//! do not match the output size are resampled once at ingestion into an
//! engine-owned buffer; everything else travels as the caller's buffer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tracing::{error, info, warn};

use crate::callbacks::ErrorCallback;
use crate::clock;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::frame::{BufferLedger, FrameBuffer, FrameRecord, frame_len};
use crate::media::encoder_args;
use crate::preview::{PipeConnector, PreviewSender};
use crate::process::{ChildProcess, StdoutMode};
use crate::queue::BlockingQueue;
use crate::scale::resize_bgra;
use crate::task::{Runnable, StopToken, Task};

/// Output file parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSettings {
    pub encoder: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub output_path: String,
}

/// Wrap a captured buffer in a [`FrameRecord`] sized for the output.
///
/// `data` must hold at least `width`×`height` BGRA pixels. When the size
/// differs from `target` the pixels are resampled into an owned buffer.
pub fn ingest_frame(
    data: Bytes,
    width: u32,
    height: u32,
    target: (u32, u32),
    fps: u32,
    sequence: u64,
    ledger: &Arc<BufferLedger>,
) -> Result<FrameRecord, EngineError> {
    let expected = frame_len(width, height);
    if expected == 0 || data.len() < expected {
        return Err(EngineError::InvalidArgument(format!(
            "{width}x{height} frame needs {expected} bytes, got {}",
            data.len()
        )));
    }

    let timestamp_ms = clock::now_us() / 1000;
    let (target_width, target_height) = target;
    let buffer = if (width, height) == target {
        FrameBuffer::Borrowed {
            data: data.slice(..expected),
            width,
            height,
        }
    } else {
        let resized = resize_bgra(&data[..expected], width, height, target_width, target_height)?;
        FrameBuffer::Owned {
            data: ledger.adopt(resized),
            width: target_width,
            height: target_height,
        }
    };
    Ok(FrameRecord::new(sequence, timestamp_ms, fps, buffer))
}

// ── Encoder stage ────────────────────────────────────────────────

struct EncodeLoop {
    encoder: ChildProcess,
    input: Arc<BlockingQueue<FrameRecord>>,
    output: Arc<BlockingQueue<FrameRecord>>,
    on_error: ErrorCallback,
    poll_interval: Duration,
    exit_timeout: Duration,
    written: Arc<AtomicU64>,
}

impl EncodeLoop {
    /// Frames move downstream whether or not the write succeeded so the
    /// caller can always reclaim its buffer.
    fn write_frame(&mut self, frame: FrameRecord) -> Result<(), EngineError> {
        let result = self.encoder.write_stdin(frame.bytes());
        self.output.push(frame);
        result?;
        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn encode_all(&mut self, stop: &StopToken) -> Result<(), EngineError> {
        while !stop.is_stop_requested() {
            self.encoder.pump_diagnostics();
            self.encoder.check_drainers()?;
            if let Some(status) = self.encoder.exit_status() {
                return Err(EngineError::ProcessExited {
                    program: self.encoder.program().to_string(),
                    status: status.to_string(),
                });
            }
            if let Some(frame) = self.input.try_pop(self.poll_interval) {
                self.write_frame(frame)?;
            }
        }

        for frame in self.input.pop_all_available(Duration::ZERO) {
            self.write_frame(frame)?;
        }
        if !self.encoder.shutdown(self.exit_timeout) {
            warn!("encoder: killed after {:?}", self.exit_timeout);
        }
        info!(
            "encoder: finished after {} frames",
            self.written.load(Ordering::Relaxed)
        );
        Ok(())
    }
}

impl Runnable for EncodeLoop {
    fn run(&mut self, stop: &StopToken) -> Result<(), EngineError> {
        let result = self.encode_all(stop);
        if let Err(e) = &result {
            error!("encoder: {e}");
            (self.on_error)(e);
            self.encoder.terminate();
            for frame in self.input.pop_all_available(Duration::ZERO) {
                self.output.push(frame);
            }
        }
        result
    }
}

// ── Recording ────────────────────────────────────────────────────

/// A running recording: encoder stage plus its preview sender.
pub struct Recording {
    settings: RecordSettings,
    pending: Arc<BlockingQueue<FrameRecord>>,
    encoder: Task,
    sender: PreviewSender,
    written: Arc<AtomicU64>,
    next_sequence: u64,
    ledger: Arc<BufferLedger>,
    close_timeout: Duration,
    terminate_timeout: Duration,
}

impl Recording {
    /// Spawn the encoder and start both stages.
    ///
    /// Every frame the engine is done with, written or not, ends up in
    /// `completed`. Frame ids continue from `first_id`.
    pub fn start(
        settings: RecordSettings,
        first_id: u64,
        completed: Arc<BlockingQueue<FrameRecord>>,
        connector: Arc<dyn PipeConnector>,
        on_error: ErrorCallback,
        ledger: Arc<BufferLedger>,
        config: &EngineConfig,
    ) -> Result<Self, EngineError> {
        if frame_len(settings.width, settings.height) == 0 || settings.fps == 0 {
            return Err(EngineError::InvalidArgument(format!(
                "cannot record {}x{} at {} fps",
                settings.width, settings.height, settings.fps
            )));
        }

        let args = encoder_args(
            settings.width,
            settings.height,
            settings.fps,
            &settings.output_path,
        );
        let encoder = ChildProcess::spawn(&settings.encoder, &args, StdoutMode::Diagnostic)?;

        let pending = Arc::new(BlockingQueue::new());
        let encoded = Arc::new(BlockingQueue::new());
        let written = Arc::new(AtomicU64::new(0));

        let sender = PreviewSender::spawn(
            Arc::clone(&encoded),
            Some(completed),
            connector,
            config.poll_interval(),
        )?;
        let body = EncodeLoop {
            encoder,
            input: Arc::clone(&pending),
            output: encoded,
            on_error,
            poll_interval: config.poll_interval(),
            exit_timeout: config.encoder_exit_timeout(),
            written: Arc::clone(&written),
        };
        let encoder = Task::start("encoder", body)?;

        info!(
            "recording {}x{} @ {} fps to {}",
            settings.width, settings.height, settings.fps, settings.output_path
        );
        Ok(Self {
            settings,
            pending,
            encoder,
            sender,
            written,
            next_sequence: first_id,
            ledger,
            close_timeout: config.encoder_exit_timeout() + config.stage_terminate_timeout(),
            terminate_timeout: config.stage_terminate_timeout(),
        })
    }

    pub fn settings(&self) -> &RecordSettings {
        &self.settings
    }

    /// Id the next queued frame will get.
    pub fn next_id(&self) -> u64 {
        self.next_sequence
    }

    /// Queue a captured frame. Returns its id.
    pub fn queue_frame(&mut self, data: Bytes, width: u32, height: u32) -> Result<u64, EngineError> {
        if !self.encoder.is_running() {
            return Err(EngineError::Other("recording has stopped".into()));
        }
        let id = self.next_sequence;
        let frame = ingest_frame(
            data,
            width,
            height,
            (self.settings.width, self.settings.height),
            self.settings.fps,
            id,
            &self.ledger,
        )?;
        self.pending.push(frame);
        self.next_sequence += 1;
        Ok(id)
    }

    /// Frames successfully written to the encoder.
    pub fn frames_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.encoder.is_running()
    }

    pub fn set_preview_channel(&self, name: String) {
        self.sender.set_channel(name);
    }

    /// Encode everything still queued, let the encoder finish the file and
    /// stop both stages.
    pub fn close(&mut self) {
        if !self.encoder.terminate(self.close_timeout) {
            warn!("encoder stage did not stop in time");
        }
        if !self.sender.terminate(self.terminate_timeout) {
            warn!("recording preview sender did not stop in time");
        }
    }
}

impl Drop for Recording {
    fn drop(&mut self) {
        if self.encoder.is_running() || self.sender.is_running() {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_size_is_borrowed() {
        let ledger = BufferLedger::new();
        let data = Bytes::from(vec![9u8; 2 * 2 * 4 + 3]);
        let frame = ingest_frame(data, 2, 2, (2, 2), 30, 4, &ledger).unwrap();
        assert!(!frame.buffer.is_owned());
        assert_eq!(frame.byte_len(), 16);
        assert_eq!(frame.sequence, 4);
        assert_eq!(ledger.stats().allocated, 0);
    }

    #[test]
    fn oversized_capture_is_resampled() {
        let ledger = BufferLedger::new();
        let data = Bytes::from(vec![200u8; 8 * 6 * 4]);
        let frame = ingest_frame(data, 8, 6, (4, 3), 30, 0, &ledger).unwrap();
        assert!(frame.buffer.is_owned());
        assert_eq!((frame.width(), frame.height()), (4, 3));
        assert_eq!(frame.byte_len(), 4 * 3 * 4);
        assert!(frame.bytes().iter().all(|&b| b == 200));
        drop(frame);
        assert_eq!(ledger.stats().outstanding(), 0);
    }

    #[test]
    fn short_buffer_rejected() {
        let ledger = BufferLedger::new();
        let data = Bytes::from(vec![0u8; 10]);
        assert!(matches!(
            ingest_frame(data, 2, 2, (2, 2), 30, 0, &ledger),
            Err(EngineError::InvalidArgument(_))
        ));
    }
}
