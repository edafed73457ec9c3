//! Caller-facing command surface.
//!
//! A [`Session`] owns whatever recording, playback, preview and calibration
//! is active and exposes the commands a host binding calls. Commands are
//! synchronous and return a descriptive error; failures discovered later
//! inside a stage arrive through the log sink as `ERROR: ...` lines.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::calibration::{Calibration, CalibrationCallbacks, CalibrationSettings};
use crate::callbacks::{
    DelayCallback, DurationCallback, LatencyCallback, LogSink, NoSignalCallback, PositionCallback,
    errors_to_log,
};
use crate::config::EngineConfig;
use crate::display::DisplayBackend;
use crate::error::EngineError;
use crate::frame::{BufferLedger, BufferStats, FrameRecord};
use crate::pipeline::{Playback, PlaybackCallbacks, PlaybackSettings, RecordSettings, Recording};
use crate::preview::{
    PipeConnector, PreviewImage, PreviewReceiver, ReceiverConfig, generate_channel_name,
};
use crate::queue::BlockingQueue;
use crate::scale::preview_png;
use crate::timing::TimingReference;

/// External programs the engine drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub encoder: String,
    pub decoder: String,
    pub probe: String,
}

impl ToolPaths {
    /// One binary encodes and decodes.
    pub fn new(encoder: impl Into<String>, probe: impl Into<String>) -> Self {
        let encoder = encoder.into();
        Self {
            decoder: encoder.clone(),
            encoder,
            probe: probe.into(),
        }
    }
}

/// The collaborators a session runs against.
#[derive(Clone)]
pub struct Backends {
    pub display: Arc<dyn DisplayBackend>,
    pub timing: Arc<dyn TimingReference>,
    pub connector: Arc<dyn PipeConnector>,
}

struct Initialized {
    tools: ToolPaths,
    log: LogSink,
}

pub struct Session {
    config: EngineConfig,
    backends: Backends,
    ledger: Arc<BufferLedger>,
    init: Option<Initialized>,
    recording: Option<Recording>,
    next_frame_id: u64,
    completed: Arc<BlockingQueue<FrameRecord>>,
    playback: Option<Playback>,
    receiver: Option<PreviewReceiver>,
    preview_frames: Arc<BlockingQueue<PreviewImage>>,
    calibration: Option<Calibration>,
}

impl Session {
    pub fn new(config: EngineConfig, backends: Backends) -> Self {
        Self {
            config,
            backends,
            ledger: BufferLedger::new(),
            init: None,
            recording: None,
            next_frame_id: 0,
            completed: Arc::new(BlockingQueue::new()),
            playback: None,
            receiver: None,
            preview_frames: Arc::new(BlockingQueue::new()),
            calibration: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Owned-buffer allocation counters.
    pub fn buffer_stats(&self) -> BufferStats {
        self.ledger.stats()
    }

    fn initialized(&self) -> Result<&Initialized, EngineError> {
        self.init.as_ref().ok_or(EngineError::NotInitialized)
    }

    // ── Setup ────────────────────────────────────────────────────

    /// Remember where the encoder and probe live and where to log.
    pub fn initialize(&mut self, encoder: &str, probe: &str, log: LogSink) {
        self.initialize_with_tools(ToolPaths::new(encoder, probe), log);
    }

    pub fn initialize_with_tools(&mut self, tools: ToolPaths, log: LogSink) {
        debug!("session initialized with {tools:?}");
        self.init = Some(Initialized { tools, log });
    }

    // ── Recording ────────────────────────────────────────────────

    pub fn create_video_output(
        &mut self,
        width: u32,
        height: u32,
        fps: u32,
        output_path: &str,
    ) -> Result<(), EngineError> {
        let init = self.initialized()?;
        if self.recording.is_some() {
            return Err(EngineError::AlreadyActive("Recording"));
        }
        let settings = RecordSettings {
            encoder: init.tools.encoder.clone(),
            width,
            height,
            fps,
            output_path: output_path.to_string(),
        };
        let on_error = errors_to_log(Arc::clone(&init.log));
        let recording = Recording::start(
            settings,
            self.next_frame_id,
            Arc::clone(&self.completed),
            Arc::clone(&self.backends.connector),
            on_error,
            Arc::clone(&self.ledger),
            &self.config,
        )?;
        self.recording = Some(recording);
        Ok(())
    }

    /// Queue a captured BGRA frame for encoding. Returns its id, which
    /// [`poll_completed_frame_ids`](Self::poll_completed_frame_ids) later
    /// reports once the engine no longer needs `data`.
    pub fn queue_frame(&mut self, data: Bytes, width: u32, height: u32) -> Result<u64, EngineError> {
        self.initialized()?;
        let recording = self
            .recording
            .as_mut()
            .ok_or(EngineError::NotActive("Recording"))?;
        let id = recording.queue_frame(data, width, height)?;
        self.next_frame_id = recording.next_id();
        Ok(id)
    }

    /// Ids of frames the engine has finished with.
    pub fn poll_completed_frame_ids(&self) -> Vec<u64> {
        self.completed
            .pop_all_available(Duration::ZERO)
            .into_iter()
            .map(|frame| frame.sequence)
            .collect()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.as_ref().is_some_and(Recording::is_running)
    }

    /// Flush queued frames to the encoder and finish the file.
    pub fn close_video_output(&mut self) {
        if let Some(mut recording) = self.recording.take() {
            recording.close();
            info!("recording closed after {} frames", recording.frames_written());
        }
    }

    // ── Playback ─────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub fn begin_playback(
        &mut self,
        x: i32,
        y: i32,
        videos: Vec<String>,
        scale_to_fit: bool,
        duration: DurationCallback,
        position: PositionCallback,
        delay: DelayCallback,
    ) -> Result<(), EngineError> {
        let init = self.initialized()?;
        if self.playback.is_some() {
            return Err(EngineError::AlreadyActive("Playback"));
        }
        let settings = PlaybackSettings {
            probe: init.tools.probe.clone(),
            decoder: init.tools.decoder.clone(),
            videos,
            x,
            y,
            scale_to_fit,
        };
        let callbacks = PlaybackCallbacks {
            log: Arc::clone(&init.log),
            duration,
            position,
            delay,
            error: errors_to_log(Arc::clone(&init.log)),
        };
        let playback = Playback::start(
            settings,
            Arc::clone(&self.backends.display),
            Arc::clone(&self.backends.connector),
            callbacks,
            Arc::clone(&self.ledger),
            &self.config,
        )?;
        self.playback = Some(playback);
        Ok(())
    }

    /// Whether playback is still decoding or presenting.
    pub fn is_playing(&self) -> bool {
        self.playback.as_ref().is_some_and(Playback::is_running)
    }

    /// Block until playback ends on its own or `timeout` elapses.
    pub fn wait_for_playback(&mut self, timeout: Duration) -> bool {
        match self.playback.as_mut() {
            Some(playback) => playback.wait(timeout),
            None => true,
        }
    }

    pub fn end_playback(&mut self) {
        if let Some(mut playback) = self.playback.take() {
            if !playback.stop() {
                warn!("playback did not stop in time");
            }
        }
    }

    pub fn supported_refresh_rates(&self, x: i32, y: i32) -> Vec<u32> {
        self.backends.display.supported_refresh_rates(x, y)
    }

    // ── Preview ──────────────────────────────────────────────────

    /// Start mirroring the active recording or playback to a new channel.
    pub fn create_preview_channel(&mut self) -> Result<String, EngineError> {
        if self.recording.is_none() && self.playback.is_none() {
            return Err(EngineError::NoActiveSource);
        }
        let name = generate_channel_name();
        if let Some(recording) = self.recording.as_ref() {
            recording.set_preview_channel(name.clone());
        }
        if let Some(playback) = self.playback.as_ref() {
            playback.set_preview_channel(name.clone());
        }
        info!("preview channel {name} created");
        Ok(name)
    }

    /// Start reading frames from `name`, replacing any channel already open.
    pub fn open_preview_channel(&mut self, name: &str) -> Result<(), EngineError> {
        self.close_preview_channel();
        let config = ReceiverConfig {
            open_attempts: self.config.receiver_open_attempts,
            retry_delay: self.config.receiver_retry_delay(),
            max_frame_bytes: self.config.preview_max_frame_bytes,
        };
        let receiver =
            PreviewReceiver::spawn(name.to_string(), Arc::clone(&self.preview_frames), config)?;
        self.receiver = Some(receiver);
        Ok(())
    }

    /// The newest received preview frame scaled to fit `max_width` ×
    /// `max_height`, as PNG. Older frames are discarded.
    pub fn poll_latest_preview_frame(
        &self,
        max_width: u32,
        max_height: u32,
    ) -> Result<Option<Vec<u8>>, EngineError> {
        let mut frames = self.preview_frames.pop_all_available(Duration::ZERO);
        let Some(latest) = frames.pop() else {
            return Ok(None);
        };
        if !frames.is_empty() {
            debug!("preview: discarded {} stale frames", frames.len());
        }
        let png = preview_png(
            &latest.data,
            latest.width,
            latest.height,
            max_width,
            max_height,
        )?;
        Ok(Some(png))
    }

    pub fn close_preview_channel(&mut self) {
        if let Some(mut receiver) = self.receiver.take() {
            if !receiver.terminate(self.config.stage_terminate_timeout()) {
                warn!("preview receiver did not stop in time");
            }
        }
    }

    // ── Calibration ──────────────────────────────────────────────

    pub fn begin_calibration(
        &mut self,
        x: i32,
        y: i32,
        no_signal: NoSignalCallback,
        latency: LatencyCallback,
    ) -> Result<(), EngineError> {
        self.begin_calibration_at(x, y, None, no_signal, latency)
    }

    /// Like [`begin_calibration`](Self::begin_calibration) at an explicit
    /// refresh rate.
    pub fn begin_calibration_at(
        &mut self,
        x: i32,
        y: i32,
        refresh_rate: Option<u32>,
        no_signal: NoSignalCallback,
        latency: LatencyCallback,
    ) -> Result<(), EngineError> {
        let init = self.initialized()?;
        if self.calibration.is_some() {
            return Err(EngineError::AlreadyActive("Calibration"));
        }
        let settings = CalibrationSettings {
            x,
            y,
            refresh_rate,
            window_max: self.config.calibration_window_max,
            window_min: self.config.calibration_window_min,
            poll_interval: self.config.poll_interval(),
            terminate_timeout: self.config.stage_terminate_timeout(),
        };
        let callbacks = CalibrationCallbacks {
            no_signal,
            latency,
            error: errors_to_log(Arc::clone(&init.log)),
        };
        let calibration = Calibration::start(
            Arc::clone(&self.backends.display),
            Arc::clone(&self.backends.timing),
            settings,
            callbacks,
        )?;
        self.calibration = Some(calibration);
        Ok(())
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibration.as_ref().is_some_and(Calibration::is_running)
    }

    pub fn end_calibration(&mut self) {
        if let Some(mut calibration) = self.calibration.take() {
            if !calibration.stop() {
                warn!("calibration did not stop in time");
            }
        }
    }

    /// Stop everything that is running.
    pub fn shutdown(&mut self) {
        self.close_preview_channel();
        self.end_calibration();
        self.end_playback();
        self.close_video_output();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
