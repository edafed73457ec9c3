//! End-to-end latency calibration.
//!
//! The display flickers through a 12-frame cycle, six black then six
//! white. The presentation timestamp of the first white frame of each cycle
//! is compared with the moment the external timing reference saw the light
//! change. The differences feed a [`LatencyWindow`].
//!
//! A cycle whose white frame was never detected by the time the next one
//! starts means the sensor has no signal. The window is cleared because a
//! gap invalidates what came before. Two missed cycles in a row look the
//! same as one.

pub mod window;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::callbacks::{ErrorCallback, LatencyCallback, NoSignalCallback};
use crate::display::{DisplayBackend, PresentationSurface};
use crate::error::EngineError;
use crate::task::{StopToken, Task};
use crate::timing::TimingReference;

pub use window::{LatencyWindow, format_latency};

// ── Pattern ──────────────────────────────────────────────────────

/// Position within the black/white cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlickerPattern {
    phase: u32,
}

impl FlickerPattern {
    pub const LENGTH: u32 = 12;
    pub const DARK_FRAMES: u32 = 6;

    /// The next frame to show: `(white, first_white_of_cycle)`.
    pub fn advance(&mut self) -> (bool, bool) {
        let white = self.phase >= Self::DARK_FRAMES;
        let first_white = self.phase == Self::DARK_FRAMES;
        self.phase = (self.phase + 1) % Self::LENGTH;
        (white, first_white)
    }
}

// ── LatencyTracker ───────────────────────────────────────────────

/// Pairs white-frame timestamps with detected events.
#[derive(Debug, Clone)]
pub struct LatencyTracker {
    window: LatencyWindow,
    pending_white_us: Option<u64>,
}

impl LatencyTracker {
    pub fn new(window_max: usize, window_min: usize) -> Self {
        Self {
            window: LatencyWindow::new(window_max, window_min),
            pending_white_us: None,
        }
    }

    pub fn window(&self) -> &LatencyWindow {
        &self.window
    }

    /// A new white cycle is about to start. Returns `true` when the
    /// previous one was never detected; the window is then cleared.
    pub fn begin_white_cycle(&mut self) -> bool {
        if self.pending_white_us.take().is_some() {
            self.window.clear();
            return true;
        }
        false
    }

    /// The first white frame of the cycle went on screen at `presented_us`.
    pub fn arm(&mut self, presented_us: u64) {
        self.pending_white_us = Some(presented_us);
    }

    /// An event was detected at `event_us`. Returns the updated summary
    /// once the window is ready.
    pub fn on_event(&mut self, event_us: u64) -> Option<String> {
        let white = self.pending_white_us?;
        if event_us <= white {
            return None;
        }
        self.pending_white_us = None;
        let delta_ms = (event_us - white) as f64 / 1000.0;
        debug!("calibration: delta {delta_ms:.3} ms");
        self.window.push(delta_ms);
        self.window.summary()
    }
}

// ── Calibration stage ────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct CalibrationSettings {
    pub x: i32,
    pub y: i32,
    /// Refresh rate to run at; the monitor's preferred rate when `None`.
    pub refresh_rate: Option<u32>,
    pub window_max: usize,
    pub window_min: usize,
    pub poll_interval: Duration,
    pub terminate_timeout: Duration,
}

#[derive(Clone)]
pub struct CalibrationCallbacks {
    pub no_signal: NoSignalCallback,
    pub latency: LatencyCallback,
    pub error: ErrorCallback,
}

type EventSlot = Arc<Mutex<Option<u64>>>;

/// Background task forwarding the newest event timestamp into `slot`.
fn spawn_event_task(
    timing: &dyn TimingReference,
    slot: EventSlot,
    poll_interval: Duration,
) -> Result<Task, EngineError> {
    let mut source = timing.open()?;
    let task = Task::start(
        "external-event",
        move |stop: &StopToken| -> Result<(), EngineError> {
            source.start()?;
            let mut result = Ok(());
            while !stop.is_stop_requested() {
                match source.wait_for_event(poll_interval) {
                    Ok(Some(at)) => {
                        if let Ok(mut pending) = slot.lock() {
                            *pending = Some(at);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
            }
            source.stop();
            result
        },
    )?;
    Ok(task)
}

fn run_pattern(
    surface: &mut dyn PresentationSurface,
    events: &Task,
    slot: &EventSlot,
    settings: &CalibrationSettings,
    callbacks: &CalibrationCallbacks,
    stop: &StopToken,
) -> Result<(), EngineError> {
    let mut pattern = FlickerPattern::default();
    let mut tracker = LatencyTracker::new(settings.window_max, settings.window_min);

    while !stop.is_stop_requested() {
        if !events.is_running() {
            return Err(EngineError::Other("external event task stopped".into()));
        }

        let event = slot.lock().ok().and_then(|mut s| s.take());
        if let Some(summary) = event.and_then(|at| tracker.on_event(at)) {
            (callbacks.latency)(&summary);
        }

        let (white, first_white) = pattern.advance();
        if first_white {
            if tracker.begin_white_cycle() {
                info!("calibration: no signal");
                (callbacks.no_signal)();
            }
            if let Ok(mut pending) = slot.lock() {
                *pending = None;
            }
        }

        let at = surface.present_solid(white)?;
        if first_white {
            tracker.arm(at);
        }
    }
    Ok(())
}

/// A running calibration.
pub struct Calibration {
    task: Task,
    terminate_timeout: Duration,
}

impl Calibration {
    /// Open a surface on the monitor at `(x, y)` and start flickering.
    pub fn start(
        display: Arc<dyn DisplayBackend>,
        timing: Arc<dyn TimingReference>,
        settings: CalibrationSettings,
        callbacks: CalibrationCallbacks,
    ) -> Result<Self, EngineError> {
        let task = Task::start(
            "calibration",
            move |stop: &StopToken| -> Result<(), EngineError> {
                let result = calibrate(display.as_ref(), timing.as_ref(), &settings, &callbacks, stop);
                if let Err(e) = &result {
                    error!("calibration: {e}");
                    (callbacks.error)(e);
                }
                result
            },
        )?;
        Ok(Self {
            task,
            terminate_timeout: settings.terminate_timeout * 2,
        })
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    pub fn stop(&mut self) -> bool {
        self.task.terminate(self.terminate_timeout)
    }
}

fn calibrate(
    display: &dyn DisplayBackend,
    timing: &dyn TimingReference,
    settings: &CalibrationSettings,
    callbacks: &CalibrationCallbacks,
    stop: &StopToken,
) -> Result<(), EngineError> {
    let refresh_rate = match settings.refresh_rate {
        Some(rate) => rate,
        None => display
            .supported_refresh_rates(settings.x, settings.y)
            .first()
            .copied()
            .ok_or(EngineError::NoCompatibleRefreshRate)?,
    };
    let mut surface = display.open(settings.x, settings.y, false, refresh_rate)?;
    info!("calibration: surface open at {refresh_rate} Hz");

    let slot: EventSlot = Arc::new(Mutex::new(None));
    let mut events = spawn_event_task(timing, Arc::clone(&slot), settings.poll_interval)?;

    let result = run_pattern(surface.as_mut(), &events, &slot, settings, callbacks, stop);

    // The detector goes first, then the surface.
    if !events.terminate(settings.terminate_timeout) {
        warn!("calibration: event task did not stop in time");
    }
    drop(surface);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{SimulatedDisplay, VsyncMode};
    use crate::timing::LoopbackPhotodiode;
    use std::time::Instant;

    #[test]
    fn pattern_is_six_dark_six_light() {
        let mut p = FlickerPattern::default();
        let cycle: Vec<_> = (0..12).map(|_| p.advance()).collect();
        assert!(cycle[..6].iter().all(|&(w, _)| !w));
        assert!(cycle[6..].iter().all(|&(w, _)| w));
        assert_eq!(cycle.iter().filter(|(_, first)| *first).count(), 1);
        assert!(cycle[6].1);
        assert_eq!(p.advance(), (false, false));
    }

    #[test]
    fn pairs_event_with_white_frame() {
        let mut t = LatencyTracker::new(50, 1);
        assert!(!t.begin_white_cycle());
        t.arm(1_000);
        assert_eq!(t.on_event(13_500).as_deref(), Some("12.50 ± 0.00"));
        // Consumed; a second event is ignored.
        assert!(t.on_event(14_000).is_none());
        assert!(!t.begin_white_cycle());
    }

    #[test]
    fn stale_event_ignored() {
        let mut t = LatencyTracker::new(50, 1);
        t.arm(5_000);
        assert!(t.on_event(4_000).is_none());
        assert_eq!(t.window().len(), 0);
    }

    #[test]
    fn missed_cycle_clears_window() {
        let mut t = LatencyTracker::new(50, 1);
        t.arm(0);
        t.on_event(2_000);
        t.arm(10_000);
        assert_eq!(t.window().len(), 1);
        assert!(t.begin_white_cycle());
        assert!(t.window().is_empty());
        t.arm(20_000);
        assert_eq!(t.on_event(27_000).as_deref(), Some("7.00 ± 0.00"));
    }

    #[test]
    fn loopback_calibration_reports_latency() {
        let display = SimulatedDisplay::new(vec![240], VsyncMode::Paced);
        let diode = LoopbackPhotodiode::attach(&display, Duration::from_millis(3));

        let reports = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&reports);
        let callbacks = CalibrationCallbacks {
            no_signal: Arc::new(|| {}),
            latency: Arc::new(move |s: &str| sink.lock().unwrap().push(s.to_string())),
            error: Arc::new(|_: &EngineError| {}),
        };
        let settings = CalibrationSettings {
            x: 0,
            y: 0,
            refresh_rate: None,
            window_max: 50,
            window_min: 5,
            poll_interval: Duration::from_millis(10),
            terminate_timeout: Duration::from_secs(1),
        };
        let mut calibration = Calibration::start(
            Arc::new(display.clone()),
            Arc::new(diode),
            settings,
            callbacks,
        )
        .unwrap();

        let start = Instant::now();
        while reports.lock().unwrap().is_empty() && start.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(calibration.stop());
        assert_eq!(reports.lock().unwrap()[0], "3.00 ± 0.00");
        assert_eq!(display.surfaces_closed(), 1);
    }
}
