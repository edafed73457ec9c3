//! Presentation surface contract.
//!
//! The engine never paints pixels itself. A [`DisplayBackend`] opens a
//! [`PresentationSurface`] on the monitor containing a desktop point; the
//! surface shows one bitmap per vertical refresh and blocks until it is on
//! screen. Dropping the surface tears it down.
//!
//! Presentation timestamps are microseconds in the [`crate::clock`] domain
//! so they can be compared with external event timestamps.

pub mod simulated;

use crate::error::EngineError;
use crate::frame::FrameRecord;

pub use simulated::{SimulatedDisplay, SimulatedSurface, VsyncMode};

/// A display subsystem able to enumerate monitors and open surfaces.
pub trait DisplayBackend: Send + Sync {
    /// Refresh rates (Hz) the monitor at `(x, y)` supports, preferred first.
    fn supported_refresh_rates(&self, x: i32, y: i32) -> Vec<u32>;

    /// Open a full-screen surface on the monitor at `(x, y)` running at
    /// `refresh_rate` Hz.
    fn open(
        &self,
        x: i32,
        y: i32,
        scale_to_fit: bool,
        refresh_rate: u32,
    ) -> Result<Box<dyn PresentationSurface>, EngineError>;
}

/// A vsync-locked output.
pub trait PresentationSurface: Send {
    /// Refresh rate the surface runs at.
    fn refresh_rate(&self) -> u32;

    /// Show `frame` for one refresh interval. Blocks until it is on screen
    /// and returns the presentation timestamp.
    fn present(&mut self, frame: &FrameRecord) -> Result<u64, EngineError>;

    /// Show a solid black or white field for one refresh interval.
    fn present_solid(&mut self, white: bool) -> Result<u64, EngineError>;
}
