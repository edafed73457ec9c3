//! # eye-core
//!
//! Capture and playback engine for a vision-research display rig.
//!
//! This crate contains:
//! - **Tasks and queues**: `Task` with cooperative cancellation, `BlockingQueue`
//! - **Processes**: `ChildProcess` with background `PipeDrainer`s for the
//!   external encoder, decoder and probe
//! - **Pipelines**: recording (`Recording`), playback (`Playback`) and the
//!   vsync-paced `Presenter`
//! - **Preview**: a header-plus-pixels stream over named pipes
//! - **Calibration**: flicker pattern and rolling latency statistics
//! - **Session**: the command surface a host binding calls
//! - **Backends**: `DisplayBackend` and `TimingReference` contracts with
//!   simulated implementations
//! - **Error**: `EngineError`, a typed `thiserror` hierarchy

pub mod calibration;
pub mod callbacks;
pub mod clock;
pub mod config;
pub mod display;
pub mod error;
pub mod frame;
pub mod media;
pub mod pipeline;
pub mod preview;
pub mod process;
pub mod queue;
pub mod scale;
pub mod session;
pub mod task;
pub mod timing;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use calibration::{Calibration, LatencyWindow};
pub use callbacks::LogSink;
pub use config::EngineConfig;
pub use display::{DisplayBackend, PresentationSurface, SimulatedDisplay, VsyncMode};
pub use error::{EngineError, TaskError};
pub use frame::{BufferLedger, BufferStats, FrameBuffer, FrameRecord};
pub use media::{FrameAssembler, VideoInfo};
pub use pipeline::{Playback, Presenter, Recording};
pub use preview::{ChannelState, NamedPipeConnector, PipeConnector, PreviewHeader};
pub use process::{ChildProcess, PipeDrainer, StdoutMode};
pub use queue::BlockingQueue;
pub use session::{Backends, Session, ToolPaths};
pub use task::{StopToken, Task, TaskState};
pub use timing::{LoopbackPhotodiode, NullTimingReference, TimingReference};
