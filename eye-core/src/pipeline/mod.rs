//! Pipeline stages built from tasks, queues and child processes.
//!
//! Stages talk only through [`BlockingQueue`](crate::queue::BlockingQueue)s.
//! Each reports its own fatal error through a callback and stops itself;
//! the owner of a stage tears down whatever depends on it.

pub mod capture;
pub mod playback;
pub mod presenter;

pub use capture::{RecordSettings, Recording, ingest_frame};
pub use playback::{Playback, PlaybackCallbacks, PlaybackSettings, select_refresh_rate};
pub use presenter::{
    PaceTracker, Presenter, PresenterCallbacks, PresenterPhase, PresenterSettings, hold_count,
};
