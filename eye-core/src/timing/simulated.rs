//! Software timing references.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};

use crate::display::SimulatedDisplay;
use crate::error::EngineError;
use crate::timing::{ExternalEventSource, TimingReference};

// ── LoopbackPhotodiode ───────────────────────────────────────────

/// A photodiode taped to a [`SimulatedDisplay`].
///
/// Fires once per black-to-white transition, `latency` after the white
/// field was presented. Covering it simulates a lost signal.
#[derive(Clone)]
pub struct LoopbackPhotodiode {
    events: Receiver<u64>,
    covered: Arc<AtomicBool>,
    fired: Arc<AtomicU64>,
}

impl LoopbackPhotodiode {
    /// Attach to `display`.
    pub fn attach(display: &SimulatedDisplay, latency: Duration) -> Self {
        let (tx, rx): (Sender<u64>, Receiver<u64>) = channel::unbounded();
        let covered = Arc::new(AtomicBool::new(false));
        let fired = Arc::new(AtomicU64::new(0));
        let lit = Mutex::new(false);
        let latency_us = latency.as_micros() as u64;

        let sensor_covered = Arc::clone(&covered);
        let sensor_fired = Arc::clone(&fired);
        display.observe_solids(Box::new(move |white, at| {
            let Ok(mut lit) = lit.lock() else {
                return;
            };
            let rising = white && !*lit;
            *lit = white;
            if rising && !sensor_covered.load(Ordering::SeqCst) {
                sensor_fired.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(at + latency_us);
            }
        }));

        Self {
            events: rx,
            covered,
            fired,
        }
    }

    /// Block or unblock the sensor.
    pub fn set_covered(&self, covered: bool) {
        self.covered.store(covered, Ordering::SeqCst);
    }

    /// Transitions detected so far.
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::SeqCst)
    }
}

impl TimingReference for LoopbackPhotodiode {
    fn open(&self) -> Result<Box<dyn ExternalEventSource>, EngineError> {
        Ok(Box::new(LoopbackSource {
            events: self.events.clone(),
            armed: false,
        }))
    }
}

struct LoopbackSource {
    events: Receiver<u64>,
    armed: bool,
}

impl ExternalEventSource for LoopbackSource {
    fn start(&mut self) -> Result<(), EngineError> {
        // Stale transitions from before arming are not reported.
        while self.events.try_recv().is_ok() {}
        self.armed = true;
        Ok(())
    }

    fn wait_for_event(&mut self, timeout: Duration) -> Result<Option<u64>, EngineError> {
        if !self.armed {
            return Err(EngineError::Other("event source not started".into()));
        }
        Ok(self.events.recv_timeout(timeout).ok())
    }

    fn stop(&mut self) {
        self.armed = false;
    }
}

// ── NullTimingReference ──────────────────────────────────────────

/// A timing reference with nothing attached. Never reports an event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTimingReference;

impl TimingReference for NullTimingReference {
    fn open(&self) -> Result<Box<dyn ExternalEventSource>, EngineError> {
        Ok(Box::new(NullSource))
    }
}

struct NullSource;

impl ExternalEventSource for NullSource {
    fn start(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn wait_for_event(&mut self, timeout: Duration) -> Result<Option<u64>, EngineError> {
        std::thread::sleep(timeout);
        Ok(None)
    }

    fn stop(&mut self) {}
}
