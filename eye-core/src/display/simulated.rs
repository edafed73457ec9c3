//! In-process display with a synthetic vertical refresh.
//!
//! [`VsyncMode::Paced`] sleeps until each refresh boundary, like real
//! hardware. [`VsyncMode::Instant`] returns at once with exact synthetic
//! timestamps (`open + k / refresh`), which keeps pacing tests
//! deterministic and fast.
//!
//! Solid-field presentations are broadcast to observers so a simulated
//! photodiode can react to them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::clock;
use crate::display::{DisplayBackend, PresentationSurface};
use crate::error::EngineError;
use crate::frame::FrameRecord;

/// How a [`SimulatedSurface`] waits for its refresh boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VsyncMode {
    Paced,
    Instant,
}

/// Called with `(white, timestamp_us)` for each solid-field presentation.
pub type SolidObserver = Box<dyn Fn(bool, u64) + Send + Sync>;

#[derive(Default)]
struct Counters {
    opened: AtomicU64,
    closed: AtomicU64,
    presents: AtomicU64,
    solids: AtomicU64,
}

struct Inner {
    refresh_rates: Vec<u32>,
    mode: VsyncMode,
    fail_present: AtomicBool,
    counters: Counters,
    presented: Mutex<Vec<(u64, u64)>>,
    observers: Mutex<Vec<SolidObserver>>,
}

/// A [`DisplayBackend`] that runs without a GPU.
#[derive(Clone)]
pub struct SimulatedDisplay {
    inner: Arc<Inner>,
}

impl SimulatedDisplay {
    pub fn new(refresh_rates: Vec<u32>, mode: VsyncMode) -> Self {
        Self {
            inner: Arc::new(Inner {
                refresh_rates,
                mode,
                fail_present: AtomicBool::new(false),
                counters: Counters::default(),
                presented: Mutex::new(Vec::new()),
                observers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register an observer of solid-field presentations.
    pub fn observe_solids(&self, observer: SolidObserver) {
        if let Ok(mut observers) = self.inner.observers.lock() {
            observers.push(observer);
        }
    }

    /// Make every subsequent present fail.
    pub fn set_fail_present(&self, fail: bool) {
        self.inner.fail_present.store(fail, Ordering::SeqCst);
    }

    /// Surfaces opened so far.
    pub fn surfaces_opened(&self) -> u64 {
        self.inner.counters.opened.load(Ordering::SeqCst)
    }

    /// Surfaces torn down so far.
    pub fn surfaces_closed(&self) -> u64 {
        self.inner.counters.closed.load(Ordering::SeqCst)
    }

    /// Frame presentations (one per refresh interval).
    pub fn present_count(&self) -> u64 {
        self.inner.counters.presents.load(Ordering::SeqCst)
    }

    /// Solid-field presentations.
    pub fn solid_count(&self) -> u64 {
        self.inner.counters.solids.load(Ordering::SeqCst)
    }

    /// `(sequence, timestamp_us)` of every frame presentation, in order.
    pub fn presented(&self) -> Vec<(u64, u64)> {
        self.inner
            .presented
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

impl DisplayBackend for SimulatedDisplay {
    fn supported_refresh_rates(&self, _x: i32, _y: i32) -> Vec<u32> {
        self.inner.refresh_rates.clone()
    }

    fn open(
        &self,
        x: i32,
        y: i32,
        _scale_to_fit: bool,
        refresh_rate: u32,
    ) -> Result<Box<dyn PresentationSurface>, EngineError> {
        if !self.inner.refresh_rates.contains(&refresh_rate) {
            return Err(EngineError::Surface(format!(
                "monitor at ({x}, {y}) does not support {refresh_rate} Hz"
            )));
        }
        self.inner.counters.opened.fetch_add(1, Ordering::SeqCst);
        debug!("simulated surface opened at ({x}, {y}) {refresh_rate} Hz");
        Ok(Box::new(SimulatedSurface {
            inner: Arc::clone(&self.inner),
            refresh_rate,
            origin_us: clock::now_us(),
            vsyncs: 0,
        }))
    }
}

/// Surface handed out by [`SimulatedDisplay`].
pub struct SimulatedSurface {
    inner: Arc<Inner>,
    refresh_rate: u32,
    origin_us: u64,
    vsyncs: u64,
}

impl SimulatedSurface {
    fn next_vsync(&mut self) -> Result<u64, EngineError> {
        if self.inner.fail_present.load(Ordering::SeqCst) {
            return Err(EngineError::Surface("present failed".into()));
        }
        self.vsyncs += 1;
        let at = self.origin_us + self.vsyncs * 1_000_000 / self.refresh_rate as u64;
        if self.inner.mode == VsyncMode::Paced {
            let now = clock::now_us();
            if at > now {
                std::thread::sleep(std::time::Duration::from_micros(at - now));
            }
        }
        Ok(at)
    }
}

impl PresentationSurface for SimulatedSurface {
    fn refresh_rate(&self) -> u32 {
        self.refresh_rate
    }

    fn present(&mut self, frame: &FrameRecord) -> Result<u64, EngineError> {
        let at = self.next_vsync()?;
        self.inner.counters.presents.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut presented) = self.inner.presented.lock() {
            presented.push((frame.sequence, at));
        }
        Ok(at)
    }

    fn present_solid(&mut self, white: bool) -> Result<u64, EngineError> {
        let at = self.next_vsync()?;
        self.inner.counters.solids.fetch_add(1, Ordering::SeqCst);
        if let Ok(observers) = self.inner.observers.lock() {
            for observer in observers.iter() {
                observer(white, at);
            }
        }
        Ok(at)
    }
}

impl Drop for SimulatedSurface {
    fn drop(&mut self) {
        self.inner.counters.closed.fetch_add(1, Ordering::SeqCst);
        debug!("simulated surface closed after {} vsyncs", self.vsyncs);
    }
}
