//! Playback pipeline.
//!
//! ```text
//!  probe ─► decoder stdout ─► FrameAssembler ─► pending ─► presenter ─► preview ─► sender
//! ```
//!
//! Videos are probed up front so the total duration and a common refresh
//! rate are known before anything is shown. They are then decoded one
//! after another onto a single continuous timeline.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::callbacks::{DelayCallback, DurationCallback, ErrorCallback, LogSink, PositionCallback};
use crate::config::EngineConfig;
use crate::display::DisplayBackend;
use crate::error::EngineError;
use crate::frame::{BufferLedger, FrameRecord, frame_len};
use crate::media::{FrameAssembler, VideoInfo, decoder_args, format_duration, probe_video};
use crate::pipeline::presenter::{Presenter, PresenterCallbacks, PresenterSettings};
use crate::preview::{ChannelHandle, PipeConnector, PreviewSender};
use crate::process::{ChildProcess, StdoutMode};
use crate::queue::BlockingQueue;
use crate::task::{Runnable, StopToken, Task};

/// Pause between producer retries while the pipeline is full or idle.
const PRODUCER_BACKOFF: Duration = Duration::from_millis(5);

/// First supported refresh rate that is an exact multiple of every frame
/// rate.
pub fn select_refresh_rate(supported: &[u32], frame_rates: &[u32]) -> Option<u32> {
    supported.iter().copied().find(|&rate| {
        rate > 0 && frame_rates.iter().all(|&fps| fps > 0 && rate % fps == 0)
    })
}

/// What to play and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSettings {
    pub probe: String,
    pub decoder: String,
    pub videos: Vec<String>,
    pub x: i32,
    pub y: i32,
    pub scale_to_fit: bool,
}

#[derive(Clone)]
pub struct PlaybackCallbacks {
    pub log: LogSink,
    pub duration: DurationCallback,
    pub position: PositionCallback,
    pub delay: DelayCallback,
    pub error: ErrorCallback,
}

struct PlaybackLoop {
    settings: PlaybackSettings,
    display: Arc<dyn DisplayBackend>,
    callbacks: PlaybackCallbacks,
    config: EngineConfig,
    ledger: Arc<BufferLedger>,
    preview: Arc<BlockingQueue<FrameRecord>>,
    sender: PreviewSender,
    presenter: Option<Presenter>,
}

impl PlaybackLoop {
    fn log(&self, message: &str) {
        info!("playback: {message}");
        (self.callbacks.log)(message);
    }

    fn probe_all(&self, stop: &StopToken) -> Result<Vec<VideoInfo>, EngineError> {
        self.log("Examining video files...");
        let mut videos = Vec::with_capacity(self.settings.videos.len());
        for (i, path) in self.settings.videos.iter().enumerate() {
            let info = probe_video(&self.settings.probe, path, stop)?;
            self.log(&format!(
                "{}. {}: {} x {} @ {} fps, {} frames, {}",
                i + 1,
                path,
                info.width,
                info.height,
                info.fps,
                info.frame_count,
                format_duration((info.duration_ms() / 1000.0) as u64)
            ));
            videos.push(info);
            if stop.is_stop_requested() {
                return Err(EngineError::Cancelled);
            }
        }
        Ok(videos)
    }

    fn play(&mut self, stop: &StopToken) -> Result<(), EngineError> {
        let videos = self.probe_all(stop)?;

        let supported = self
            .display
            .supported_refresh_rates(self.settings.x, self.settings.y);
        let frame_rates: Vec<u32> = videos.iter().map(|v| v.fps).collect();
        let Some(refresh_rate) = select_refresh_rate(&supported, &frame_rates) else {
            (self.callbacks.duration)(0.0);
            (self.callbacks.position)(0);
            return Err(EngineError::NoCompatibleRefreshRate);
        };
        debug!("playback: {refresh_rate} Hz fits {frame_rates:?} (supported {supported:?})");

        let total_ms: f64 = videos.iter().map(VideoInfo::duration_ms).sum();
        (self.callbacks.duration)(total_ms);
        self.log(&format!(
            "Total playback duration: {}",
            format_duration((total_ms / 1000.0) as u64)
        ));

        let pending = Arc::new(BlockingQueue::new());
        self.presenter = Some(Presenter::spawn(
            Arc::clone(&self.display),
            PresenterSettings {
                x: self.settings.x,
                y: self.settings.y,
                scale_to_fit: self.settings.scale_to_fit,
                refresh_rate,
                start_buffer_seconds: self.config.start_buffer_seconds,
                poll_interval: self.config.poll_interval(),
            },
            Arc::clone(&pending),
            Some(Arc::clone(&self.preview)),
            PresenterCallbacks {
                position: Arc::clone(&self.callbacks.position),
                delay: Arc::clone(&self.callbacks.delay),
                error: Arc::clone(&self.callbacks.error),
            },
        )?);

        let mut base_ms = 0;
        let mut sequence = 0;
        for (i, info) in videos.iter().enumerate() {
            if stop.is_stop_requested() {
                break;
            }
            self.log(&format!("Starting to decode video file {}.", i + 1));
            let assembler = self.decode(info, &pending, base_ms, sequence, stop)?;
            base_ms = assembler.next_timestamp_ms();
            sequence = assembler.next_sequence();
            if !stop.is_stop_requested() {
                self.log(&format!("Decoding of video file {} complete.", i + 1));
            }
        }

        pending.close();
        self.wait_for_drain(&pending, stop);
        Ok(())
    }

    /// The presenter reports its own failure; playback just winds down.
    fn presenter_alive(&self) -> Result<(), EngineError> {
        match self.presenter.as_ref() {
            Some(p) if p.is_running() => Ok(()),
            _ => {
                debug!("playback: presentation stage stopped; ending playback");
                Err(EngineError::Cancelled)
            }
        }
    }

    /// Decode one video onto `pending`. Returns the assembler so the caller
    /// can continue the timeline where it stopped.
    fn decode(
        &self,
        info: &VideoInfo,
        pending: &BlockingQueue<FrameRecord>,
        base_ms: u64,
        first_sequence: u64,
        stop: &StopToken,
    ) -> Result<FrameAssembler, EngineError> {
        let mut assembler = FrameAssembler::new(
            info.width,
            info.height,
            info.fps,
            base_ms,
            first_sequence,
            info.frame_count,
            Arc::clone(&self.ledger),
        )?;
        let mut decoder = ChildProcess::spawn(
            &self.settings.decoder,
            &decoder_args(&info.path),
            StdoutMode::Data {
                max_buffered: Some(self.config.drainer_max_buffer),
            },
        )?;
        let backlog = (self.config.backpressure_seconds as usize * info.fps as usize).max(1);
        let slice_len = frame_len(info.width, info.height);
        // Decoder output not yet fed to the assembler.
        let mut carry = Bytes::new();

        while !stop.is_stop_requested() && !assembler.is_complete() {
            self.presenter_alive()?;
            decoder.pump_diagnostics();
            decoder.check_drainers()?;

            if carry.is_empty() {
                carry = decoder.take_stdout();
            }
            if carry.is_empty() {
                if decoder.stdout_finished() {
                    carry = decoder.take_stdout();
                    if carry.is_empty() {
                        warn!(
                            "playback: decoder ended after {} of {} frames of {}",
                            assembler.frames_emitted(),
                            info.frame_count,
                            info.path
                        );
                        break;
                    }
                    continue;
                }
                stop.sleep(PRODUCER_BACKOFF);
                continue;
            }

            // One frame's worth of bytes completes at most one frame, so
            // `pending` never grows past the backlog.
            while pending.len() < backlog && !carry.is_empty() {
                let slice = carry.split_to(slice_len.min(carry.len()));
                for frame in assembler.push(&slice) {
                    pending.push(frame);
                }
            }
            if pending.len() >= backlog {
                stop.sleep(PRODUCER_BACKOFF);
            }
        }

        if stop.is_stop_requested() {
            let dropped = assembler.discard_partial();
            if dropped > 0 {
                debug!("playback: dropped {dropped} bytes of a partial frame");
            }
            decoder.terminate();
        } else if !decoder.shutdown(self.config.encoder_exit_timeout()) {
            warn!("playback: decoder for {} had to be killed", info.path);
        }
        Ok(assembler)
    }

    /// Let the presenter and preview sender finish what is queued.
    fn wait_for_drain(&self, pending: &BlockingQueue<FrameRecord>, stop: &StopToken) {
        loop {
            let presenter_done = match self.presenter.as_ref() {
                Some(p) => p.has_finished() || !p.is_running(),
                None => true,
            };
            if presenter_done && pending.is_empty() && self.preview.is_empty() {
                return;
            }
            if stop.sleep(PRODUCER_BACKOFF) {
                return;
            }
        }
    }

    fn shutdown(&mut self) {
        let timeout = self.config.stage_terminate_timeout();
        if let Some(mut presenter) = self.presenter.take() {
            if !presenter.terminate(timeout) {
                warn!("playback: presenter did not stop in time");
            }
        }
        if !self.sender.terminate(timeout) {
            warn!("playback: preview sender did not stop in time");
        }
    }
}

impl Runnable for PlaybackLoop {
    fn run(&mut self, stop: &StopToken) -> Result<(), EngineError> {
        let result = match self.play(stop) {
            Err(EngineError::Cancelled) => Ok(()),
            other => other,
        };
        if let Err(e) = &result {
            error!("playback: {e}");
            (self.callbacks.error)(e);
        }
        self.shutdown();
        result
    }
}

/// A running playback session.
pub struct Playback {
    task: Task,
    sender_channel: ChannelHandle,
    terminate_timeout: Duration,
}

impl Playback {
    /// Start playing `settings.videos` on `display`.
    pub fn start(
        settings: PlaybackSettings,
        display: Arc<dyn DisplayBackend>,
        connector: Arc<dyn PipeConnector>,
        callbacks: PlaybackCallbacks,
        ledger: Arc<BufferLedger>,
        config: &EngineConfig,
    ) -> Result<Self, EngineError> {
        if settings.videos.is_empty() {
            return Err(EngineError::InvalidArgument("no videos to play".into()));
        }
        let preview = Arc::new(BlockingQueue::new());
        let sender = PreviewSender::spawn(
            Arc::clone(&preview),
            None,
            connector,
            config.poll_interval(),
        )?;
        let sender_channel = sender.channel_handle();
        let body = PlaybackLoop {
            settings,
            display,
            callbacks,
            config: config.clone(),
            ledger,
            preview,
            sender,
            presenter: None,
        };
        let task = Task::start("playback", body)?;
        // Child stages get their own terminate window inside the body.
        let terminate_timeout = config.stage_terminate_timeout() * 3;
        Ok(Self {
            task,
            sender_channel,
            terminate_timeout,
        })
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    pub fn set_preview_channel(&self, name: String) {
        self.sender_channel.set(name);
    }

    /// Stop decoding and presenting.
    pub fn stop(&mut self) -> bool {
        self.task.terminate(self.terminate_timeout)
    }

    /// Block until playback ends on its own or `timeout` elapses.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        self.task.join(timeout)
    }

    pub fn outcome(&self) -> Option<Result<(), String>> {
        self.task.outcome()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_rate_fits_every_video() {
        assert_eq!(select_refresh_rate(&[60, 120], &[30, 60]), Some(60));
        assert_eq!(select_refresh_rate(&[144, 120, 60], &[24, 30]), Some(120));
        assert_eq!(select_refresh_rate(&[60], &[25]), None);
        assert_eq!(select_refresh_rate(&[], &[30]), None);
        assert_eq!(select_refresh_rate(&[60], &[0]), None);
    }

    #[test]
    fn preferred_order_wins() {
        assert_eq!(select_refresh_rate(&[120, 60], &[30]), Some(120));
    }

    #[test]
    fn empty_video_list_rejected() {
        let display = Arc::new(crate::display::SimulatedDisplay::new(
            vec![60],
            crate::display::VsyncMode::Instant,
        ));
        let silent: LogSink = Arc::new(|_: &str| {});
        let result = Playback::start(
            PlaybackSettings {
                probe: "ffprobe".into(),
                decoder: "ffmpeg".into(),
                videos: vec![],
                x: 0,
                y: 0,
                scale_to_fit: false,
            },
            display,
            Arc::new(crate::preview::NamedPipeConnector),
            PlaybackCallbacks {
                log: Arc::clone(&silent),
                duration: Arc::new(|_: f64| {}),
                position: Arc::new(|_: u64| {}),
                delay: Arc::new(|_: u64| {}),
                error: Arc::new(|_: &EngineError| {}),
            },
            BufferLedger::new(),
            &EngineConfig::default(),
        );
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
    }
}
