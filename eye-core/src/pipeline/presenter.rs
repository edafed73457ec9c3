//! Vsync-paced presentation stage.
//!
//! ```text
//!  Starting ──(start buffer full | input closed)──► Steady
//! ```
//!
//! `Starting` buffers frames without presenting so playback does not begin
//! straight into starvation. `Steady` presents each frame for
//! `refresh_rate / fps` vertical refreshes and compares where playback is
//! against where it should be.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, error, info};

use crate::callbacks::{DelayCallback, ErrorCallback, PositionCallback};
use crate::display::{DisplayBackend, PresentationSurface};
use crate::error::EngineError;
use crate::frame::FrameRecord;
use crate::queue::BlockingQueue;
use crate::task::{Runnable, StopToken, Task};

/// Vertical refreshes each frame stays on screen.
///
/// Only exact integer ratios are supported.
pub fn hold_count(refresh_rate: u32, fps: u32) -> Result<u32, EngineError> {
    if fps == 0 || refresh_rate == 0 || refresh_rate % fps != 0 {
        return Err(EngineError::RefreshRateMismatch { refresh_rate, fps });
    }
    Ok(refresh_rate / fps)
}

// ── PaceTracker ──────────────────────────────────────────────────

/// Compares actual presentation times with the ideal timeline.
///
/// The ideal position of frame `k` is the summed duration of frames
/// `0..k`; the first presented frame defines position zero. Durations are
/// summed per run of equal frame rate so integer rounding never
/// accumulates.
#[derive(Debug, Default)]
pub struct PaceTracker {
    first_us: Option<u64>,
    run_base_us: u64,
    run_fps: u32,
    run_frames: u64,
}

impl PaceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn target_us(&self) -> u64 {
        if self.run_fps == 0 {
            return self.run_base_us;
        }
        self.run_base_us + self.run_frames * 1_000_000 / self.run_fps as u64
    }

    /// Record a frame first shown at `presented_us`. Returns how far
    /// playback has fallen behind, in whole milliseconds.
    pub fn record(&mut self, presented_us: u64, fps: u32) -> u64 {
        let first = *self.first_us.get_or_insert(presented_us);
        let target = self.target_us();
        let actual = presented_us.saturating_sub(first);

        if fps != self.run_fps {
            self.run_base_us = target;
            self.run_fps = fps;
            self.run_frames = 0;
        }
        self.run_frames += 1;

        actual.saturating_sub(target) / 1000
    }
}

// ── Presenter ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenterPhase {
    Starting,
    Steady,
}

impl std::fmt::Display for PresenterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "Starting"),
            Self::Steady => write!(f, "Steady"),
        }
    }
}

/// Where and how to present.
#[derive(Debug, Clone, Copy)]
pub struct PresenterSettings {
    pub x: i32,
    pub y: i32,
    pub scale_to_fit: bool,
    pub refresh_rate: u32,
    /// Seconds of frames to buffer before the first present.
    pub start_buffer_seconds: u32,
    pub poll_interval: Duration,
}

#[derive(Clone)]
pub struct PresenterCallbacks {
    pub position: PositionCallback,
    pub delay: DelayCallback,
    pub error: ErrorCallback,
}

struct PresentLoop {
    display: Arc<dyn DisplayBackend>,
    settings: PresenterSettings,
    input: Arc<BlockingQueue<FrameRecord>>,
    output: Option<Arc<BlockingQueue<FrameRecord>>>,
    callbacks: PresenterCallbacks,
    finished: Arc<AtomicBool>,
}

impl PresentLoop {
    fn present_all(&mut self, stop: &StopToken) -> Result<(), EngineError> {
        let s = self.settings;
        let mut surface = self.display.open(s.x, s.y, s.scale_to_fit, s.refresh_rate)?;
        info!("presenter: surface open at ({}, {}) {} Hz", s.x, s.y, s.refresh_rate);

        let mut phase = PresenterPhase::Starting;
        let mut buffered: VecDeque<FrameRecord> = VecDeque::new();
        let mut pace = PaceTracker::new();

        while !stop.is_stop_requested() {
            match phase {
                PresenterPhase::Starting => {
                    if let Some(frame) = self.input.try_pop(s.poll_interval) {
                        buffered.push_back(frame);
                    }
                    let threshold = buffered
                        .front()
                        .map(|f| (f.fps as usize * s.start_buffer_seconds as usize).max(1))
                        .unwrap_or(usize::MAX);
                    if buffered.len() >= threshold || self.input.is_drained() {
                        phase = PresenterPhase::Steady;
                        debug!("presenter: {phase} with {} frames buffered", buffered.len());
                    }
                }
                PresenterPhase::Steady => {
                    let next = match buffered.pop_front() {
                        Some(frame) => Some(frame),
                        None => self.input.try_pop(s.poll_interval),
                    };
                    match next {
                        Some(frame) => self.present_frame(surface.as_mut(), &mut pace, frame)?,
                        None if self.input.is_drained() => {
                            self.finished.store(true, Ordering::SeqCst);
                        }
                        None => {}
                    }
                }
            }
        }
        Ok(())
    }

    fn present_frame(
        &self,
        surface: &mut dyn PresentationSurface,
        pace: &mut PaceTracker,
        frame: FrameRecord,
    ) -> Result<(), EngineError> {
        let hold = hold_count(surface.refresh_rate(), frame.fps)?;
        let mut shown_at = None;
        for _ in 0..hold {
            let at = surface.present(&frame)?;
            shown_at.get_or_insert(at);
        }

        let delay = pace.record(shown_at.unwrap_or_default(), frame.fps);
        if delay > 0 {
            (self.callbacks.delay)(delay);
        }
        (self.callbacks.position)(frame.timestamp_ms + 1000 / frame.fps as u64 + 1);

        if let Some(output) = self.output.as_ref() {
            output.push(frame);
        }
        Ok(())
    }
}

impl Runnable for PresentLoop {
    fn run(&mut self, stop: &StopToken) -> Result<(), EngineError> {
        let result = self.present_all(stop);
        if let Err(e) = &result {
            error!("presenter: {e}");
            (self.callbacks.error)(e);
        }
        result
    }
}

/// Background stage presenting frames in sync with the display.
pub struct Presenter {
    task: Task,
    finished: Arc<AtomicBool>,
}

impl Presenter {
    /// Start presenting frames from `input`. Presented frames go to
    /// `output`, or are released when it is `None`.
    pub fn spawn(
        display: Arc<dyn DisplayBackend>,
        settings: PresenterSettings,
        input: Arc<BlockingQueue<FrameRecord>>,
        output: Option<Arc<BlockingQueue<FrameRecord>>>,
        callbacks: PresenterCallbacks,
    ) -> Result<Self, EngineError> {
        let finished = Arc::new(AtomicBool::new(false));
        let body = PresentLoop {
            display,
            settings,
            input,
            output,
            callbacks,
            finished: Arc::clone(&finished),
        };
        let task = Task::start("presenter", body)?;
        Ok(Self { task, finished })
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// Input closed and every frame presented.
    pub fn has_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn terminate(&mut self, timeout: Duration) -> bool {
        self.task.terminate(timeout)
    }
}
