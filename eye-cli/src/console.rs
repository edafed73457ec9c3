//! Console driver.
//!
//! Runs one engine command in the foreground against the simulated display
//! and photodiode until it finishes or the stop handle is cleared.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{info, warn};

use eye_core::{EngineError, LogSink, LoopbackPhotodiode, Session};

use crate::config::CliConfig;

const TICK: Duration = Duration::from_millis(100);

/// Where and how big to write preview snapshots.
#[derive(Debug, Clone)]
pub struct PreviewOutput {
    pub path: PathBuf,
    pub max_width: u32,
    pub max_height: u32,
}

/// A synthetic capture source.
#[derive(Debug, Clone)]
pub struct RecordOptions {
    pub output: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Size the test pattern is generated at; differs from the output to
    /// exercise resampling.
    pub capture_width: u32,
    pub capture_height: u32,
    /// Stop after this many seconds; 0 runs until interrupted.
    pub seconds: u64,
}

/// A moving white bar on grey, BGRA.
pub fn test_pattern(width: u32, height: u32, index: u64) -> Bytes {
    const BAR: u32 = 8;
    let width = width.max(1);
    let start = ((index * BAR as u64) % width as u64) as u32;
    let mut data = Vec::with_capacity(width as usize * height as usize * 4);
    for _ in 0..height {
        for x in 0..width {
            let lit = x >= start && x < start + BAR;
            let level = if lit { 255 } else { 64 };
            data.extend_from_slice(&[level, level, level, 255]);
        }
    }
    Bytes::from(data)
}

fn log_sink() -> LogSink {
    Arc::new(|line: &str| info!("engine: {line}"))
}

// ── Console ──────────────────────────────────────────────────────

pub struct Console {
    config: CliConfig,
    session: Session,
    photodiode: LoopbackPhotodiode,
    running: Arc<AtomicBool>,
}

impl Console {
    pub fn new(config: CliConfig) -> Self {
        let (backends, photodiode) = config.backends();
        let mut session = Session::new(config.engine.clone(), backends);
        session.initialize_with_tools(config.tool_paths(), log_sink());
        Self {
            config,
            session,
            photodiode,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Clear to stop the active command.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn refresh_rates(&self, x: i32, y: i32) -> Vec<u32> {
        self.session.supported_refresh_rates(x, y)
    }

    /// Write the newest preview frame, if one arrived.
    fn snapshot(&self, preview: &PreviewOutput) -> Result<bool, EngineError> {
        match self
            .session
            .poll_latest_preview_frame(preview.max_width, preview.max_height)?
        {
            Some(png) => {
                std::fs::write(&preview.path, png)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn start_mirror(&mut self, preview: Option<&PreviewOutput>) -> Result<(), EngineError> {
        if preview.is_some() {
            let channel = self.session.create_preview_channel()?;
            self.session.open_preview_channel(&channel)?;
            info!("mirroring preview channel {channel}");
        }
        Ok(())
    }

    // ── Commands ─────────────────────────────────────────────────

    /// Play `videos` back to back on the monitor at `(x, y)`.
    pub async fn play(
        &mut self,
        videos: Vec<String>,
        position: Option<(i32, i32)>,
        preview: Option<PreviewOutput>,
    ) -> Result<(), EngineError> {
        let (x, y) = position.unwrap_or((self.config.display.x, self.config.display.y));
        let late_frames = Arc::new(AtomicU64::new(0));
        let late = Arc::clone(&late_frames);

        self.session.begin_playback(
            x,
            y,
            videos,
            self.config.display.scale_to_fit,
            Arc::new(|secs: f64| info!("playback duration {secs:.2} s")),
            Arc::new(|ms: u64| tracing::debug!("position {ms} ms")),
            Arc::new(move |ms: u64| {
                late.fetch_add(1, Ordering::Relaxed);
                warn!("frame presented {ms} ms late");
            }),
        )?;
        self.start_mirror(preview.as_ref())?;

        while self.is_running() && self.session.is_playing() {
            tokio::time::sleep(TICK).await;
            if let Some(preview) = preview.as_ref() {
                self.snapshot(preview)?;
            }
        }

        self.session.end_playback();
        self.session.close_preview_channel();
        info!(
            "playback finished; {} late frames",
            late_frames.load(Ordering::Relaxed)
        );
        Ok(())
    }

    /// Feed the synthetic pattern to the encoder at the output frame rate.
    pub async fn record(
        &mut self,
        options: RecordOptions,
        preview: Option<PreviewOutput>,
    ) -> Result<(), EngineError> {
        if options.fps == 0 {
            return Err(EngineError::InvalidArgument("fps must be positive".into()));
        }
        self.session
            .create_video_output(options.width, options.height, options.fps, &options.output)?;
        self.start_mirror(preview.as_ref())?;

        let total = options.seconds * options.fps as u64;
        let mut interval = tokio::time::interval(Duration::from_secs(1) / options.fps);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut queued = 0u64;
        let mut completed = 0usize;
        let mut result = Ok(());
        while self.is_running() && (total == 0 || queued < total) {
            interval.tick().await;
            let frame = test_pattern(options.capture_width, options.capture_height, queued);
            // Writes to the encoder's stdin and may block on a full pipe.
            let queued_frame = tokio::task::block_in_place(|| {
                self.session
                    .queue_frame(frame, options.capture_width, options.capture_height)
            });
            if let Err(e) = queued_frame {
                result = Err(e);
                break;
            }
            queued += 1;
            completed += self.session.poll_completed_frame_ids().len();
            if queued % options.fps as u64 == 0 {
                if let Some(preview) = preview.as_ref() {
                    self.snapshot(preview)?;
                }
            }
        }

        self.session.close_preview_channel();
        tokio::task::block_in_place(|| self.session.close_video_output());
        completed += self.session.poll_completed_frame_ids().len();
        info!("recorded {queued} frames to {}; {completed} released", options.output);
        result
    }

    /// Flicker the monitor and report latency until interrupted or
    /// `seconds` elapse.
    pub async fn calibrate(
        &mut self,
        position: Option<(i32, i32)>,
        seconds: u64,
    ) -> Result<(), EngineError> {
        let (x, y) = position.unwrap_or((self.config.display.x, self.config.display.y));
        self.session.begin_calibration_at(
            x,
            y,
            self.config.calibration_rate(),
            Arc::new(|| warn!("calibration: no signal")),
            Arc::new(|summary: &str| info!("latency {summary} ms")),
        )?;

        let started = Instant::now();
        let limit = Duration::from_secs(seconds);
        while self.is_running()
            && self.session.is_calibrating()
            && (seconds == 0 || started.elapsed() < limit)
        {
            tokio::time::sleep(TICK).await;
        }

        self.session.end_calibration();
        info!("photodiode fired {} times", self.photodiode.fired());
        Ok(())
    }

    /// Mirror an existing channel and keep the newest frame on disk.
    pub async fn preview(&mut self, channel: &str, output: PreviewOutput) -> Result<(), EngineError> {
        self.session.open_preview_channel(channel)?;
        let mut written = 0u64;
        while self.is_running() {
            tokio::time::sleep(TICK).await;
            if self.snapshot(&output)? {
                written += 1;
            }
        }
        self.session.close_preview_channel();
        info!("wrote {written} snapshots to {}", output.path.display());
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
