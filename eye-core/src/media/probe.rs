//! Video metadata from the external probe.

use bytes::BytesMut;
use serde::Deserialize;
use tracing::debug;

use crate::error::EngineError;
use crate::media::commands::probe_args;
use crate::process::{ChildProcess, StdoutMode};
use crate::task::{MAX_UNCHECKED_WAIT, StopToken};

/// What playback needs to know about one video file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoInfo {
    pub path: String,
    pub width: u32,
    pub height: u32,
    /// Integer frame rate.
    pub fps: u32,
    pub frame_count: u64,
}

impl VideoInfo {
    /// Length of the video in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        self.frame_count as f64 / self.fps as f64 * 1000.0
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
}

/// Interpret the probe's JSON output.
///
/// The first video stream wins. `r_frame_rate` is rounded to an integer
/// (`"30/1"` is 30, `"30000/1001"` is 30).
pub fn parse_probe_output(path: &str, raw: &[u8]) -> Result<VideoInfo, EngineError> {
    let output: ProbeOutput = serde_json::from_slice(raw)?;
    let stream = output
        .streams
        .into_iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| EngineError::Probe(format!("{path}: no video stream")))?;

    let fps = stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .filter(|fps| *fps > 0)
        .ok_or_else(|| EngineError::Probe(format!("{path}: unusable frame rate")))?;

    let frame_count = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.trim().parse::<u64>().ok())
        .ok_or_else(|| EngineError::Probe(format!("{path}: missing frame count")))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(EngineError::Probe(format!("{path}: missing dimensions"))),
    };

    Ok(VideoInfo {
        path: path.to_string(),
        width,
        height,
        fps,
        frame_count,
    })
}

fn parse_rate(rate: &str) -> Option<u32> {
    let (num, den) = match rate.split_once('/') {
        Some((num, den)) => (num.trim().parse::<f64>().ok()?, den.trim().parse::<f64>().ok()?),
        None => (rate.trim().parse::<f64>().ok()?, 1.0),
    };
    if den <= 0.0 || !num.is_finite() {
        return None;
    }
    Some((num / den).round() as u32)
}

/// Run the probe against `path` and parse its output.
pub fn probe_video(probe: &str, path: &str, stop: &StopToken) -> Result<VideoInfo, EngineError> {
    let mut process = ChildProcess::spawn(
        probe,
        &probe_args(path),
        StdoutMode::Data { max_buffered: None },
    )?;

    let mut raw = BytesMut::new();
    loop {
        raw.extend_from_slice(&process.take_stdout());
        process.pump_diagnostics();
        process.check_drainers()?;
        if !process.is_alive() && process.stdout_finished() {
            raw.extend_from_slice(&process.take_stdout());
            break;
        }
        if stop.sleep(MAX_UNCHECKED_WAIT) {
            process.terminate();
            return Err(EngineError::Cancelled);
        }
    }

    debug!("probe output for {path}: {} bytes", raw.len());
    parse_probe_output(path, &raw)
}
