//! External timing reference contract.
//!
//! A timing reference is hardware (a photodiode on a timing card) that
//! timestamps light transitions on the display. The engine only needs to
//! start it, wait a bounded time for the next event and stop it.

pub mod simulated;

use std::time::Duration;

use crate::error::EngineError;

pub use simulated::{LoopbackPhotodiode, NullTimingReference};

/// Source of hardware-detected event timestamps.
pub trait ExternalEventSource: Send {
    /// Arm the detector.
    fn start(&mut self) -> Result<(), EngineError>;

    /// Wait up to `timeout` for the next event. Returns its timestamp in
    /// microseconds in the [`crate::clock`] domain.
    fn wait_for_event(&mut self, timeout: Duration) -> Result<Option<u64>, EngineError>;

    /// Disarm the detector.
    fn stop(&mut self);
}

/// Factory for [`ExternalEventSource`]s.
pub trait TimingReference: Send + Sync {
    fn open(&self) -> Result<Box<dyn ExternalEventSource>, EngineError>;
}
