//! Engine tunables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing and sizing knobs shared by every pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bounded wait used by every stage loop (milliseconds).
    pub poll_interval_ms: u64,
    /// Decoder pauses while the presentation queue holds this many seconds
    /// of frames.
    pub backpressure_seconds: u32,
    /// Presenter buffers this many seconds of frames before its first
    /// present.
    pub start_buffer_seconds: u32,
    /// Decoder stdout drainer stops reading past this many bytes.
    pub drainer_max_buffer: usize,
    /// How long the encoder may take to exit after stdin is closed
    /// (milliseconds).
    pub encoder_exit_timeout_ms: u64,
    /// How long a stage has to stop after a stop request (milliseconds).
    pub stage_terminate_timeout_ms: u64,
    /// Attempts the preview receiver makes to open a channel.
    pub receiver_open_attempts: u32,
    /// Delay between receiver open attempts (milliseconds).
    pub receiver_retry_delay_ms: u64,
    /// Latency samples kept by calibration.
    pub calibration_window_max: usize,
    /// Samples needed before calibration reports statistics.
    pub calibration_window_min: usize,
    /// Largest preview frame payload the receiver accepts (bytes).
    pub preview_max_frame_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            backpressure_seconds: 5,
            start_buffer_seconds: 2,
            drainer_max_buffer: 64 * 1024 * 1024,
            encoder_exit_timeout_ms: 5_000,
            stage_terminate_timeout_ms: 1_000,
            receiver_open_attempts: 30,
            receiver_retry_delay_ms: 100,
            calibration_window_max: 50,
            calibration_window_min: 5,
            // 8K BGRA.
            preview_max_frame_bytes: 7680 * 4320 * 4,
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn encoder_exit_timeout(&self) -> Duration {
        Duration::from_millis(self.encoder_exit_timeout_ms)
    }

    pub fn stage_terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_terminate_timeout_ms)
    }

    pub fn receiver_retry_delay(&self) -> Duration {
        Duration::from_millis(self.receiver_retry_delay_ms)
    }
}
