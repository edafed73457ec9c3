//! Preview sender stage.
//!
//! Takes frames from its input queue, mirrors them to the preview channel
//! when one is open, and passes them on to the output queue (or drops them
//! when there is none). Channel failures never stop the stage: the channel
//! moves to `Error` and frames keep flowing downstream.

use std::io::ErrorKind;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::frame::FrameRecord;
use crate::preview::channel::ChannelState;
use crate::preview::header::PreviewHeader;
use crate::preview::pipe::{OutboundPipe, PipeConnector};
use crate::queue::BlockingQueue;
use crate::task::{MAX_UNCHECKED_WAIT, StopToken, Task};

// ── ChannelWriter ────────────────────────────────────────────────

/// Sender-side state machine for one preview channel.
pub struct ChannelWriter {
    connector: Arc<dyn PipeConnector>,
    state: ChannelState,
    name: Option<String>,
    pipe: Option<Box<dyn OutboundPipe>>,
    frame_number: u32,
}

impl ChannelWriter {
    pub fn new(connector: Arc<dyn PipeConnector>) -> Self {
        Self {
            connector,
            state: ChannelState::Closed,
            name: None,
            pipe: None,
            frame_number: 0,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Frames seen so far, written or not.
    pub fn frame_number(&self) -> u32 {
        self.frame_number
    }

    /// Assign the channel to create on the next frame. Only accepted while
    /// `Closed`.
    pub fn set_name(&mut self, name: String) -> Result<(), EngineError> {
        if !self.state.accepts_name() {
            return Err(EngineError::ProtocolViolation(
                "channel name accepted only while Closed",
            ));
        }
        self.name = Some(name);
        Ok(())
    }

    /// Advance the channel for one frame and write it if the channel is
    /// open.
    pub fn handle_frame(&mut self, frame: &FrameRecord, stop: &StopToken) {
        self.advance();
        if self.state.is_open() {
            if let Err(e) = self.write_frame(frame, stop) {
                warn!("preview channel write failed: {e}");
                self.fail();
            }
        }
        self.frame_number = self.frame_number.wrapping_add(1);
    }

    fn advance(&mut self) {
        if self.state == ChannelState::Closed {
            let Some(name) = self.name.clone() else {
                return;
            };
            match self.connector.create(&name) {
                Ok(pipe) => {
                    self.pipe = Some(pipe);
                    if self.state.begin_open().is_err() {
                        self.fail();
                        return;
                    }
                    debug!("preview channel {name} opening");
                }
                Err(e) => {
                    warn!("failed to create preview channel {name}: {e}");
                    self.fail();
                    return;
                }
            }
        }

        if self.state == ChannelState::Opening {
            let connected = match self.pipe.as_mut() {
                Some(pipe) => pipe.poll_connected(),
                None => Ok(false),
            };
            match connected {
                Ok(true) => {
                    if self.state.complete_open().is_ok() {
                        info!("preview channel connected");
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("preview channel connection failed: {e}");
                    self.fail();
                }
            }
        }
    }

    fn write_frame(&mut self, frame: &FrameRecord, stop: &StopToken) -> Result<(), EngineError> {
        let payload = frame.bytes();
        let length = u32::try_from(payload.len())
            .map_err(|_| EngineError::InvalidArgument("preview frame over 4 GiB".into()))?;
        let header = PreviewHeader::new(self.frame_number, frame.width(), frame.height(), length);
        let pipe = self
            .pipe
            .as_mut()
            .ok_or(EngineError::ProtocolViolation("open channel without a pipe"))?;
        write_all(pipe.as_mut(), &header.to_bytes(), stop)?;
        write_all(pipe.as_mut(), payload, stop)
    }

    fn fail(&mut self) {
        self.state.fail();
        self.pipe = None;
    }

    /// Release the pipe. The channel is abandoned.
    pub fn close(&mut self) {
        self.pipe = None;
        if self.state.close().is_err() {
            debug!("preview channel closed after error");
        }
        self.name = None;
    }
}

/// Keep writing until every byte is accepted or the pipe fails.
fn write_all(pipe: &mut dyn OutboundPipe, mut data: &[u8], stop: &StopToken) -> Result<(), EngineError> {
    while !data.is_empty() {
        match pipe.write(data) {
            Ok(0) => {
                return Err(EngineError::Io(std::io::Error::new(
                    ErrorKind::WriteZero,
                    "preview pipe accepted no bytes",
                )));
            }
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if stop.is_stop_requested() {
                    return Err(EngineError::Cancelled);
                }
                pipe.wait_writable(MAX_UNCHECKED_WAIT)?;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

// ── PreviewSender ────────────────────────────────────────────────

/// Shared slot through which a channel name reaches a running sender.
#[derive(Clone, Default)]
pub struct ChannelHandle(Arc<Mutex<Option<String>>>);

impl ChannelHandle {
    /// Hand the sender a channel to create on its next frame.
    pub fn set(&self, name: String) {
        if let Ok(mut pending) = self.0.lock() {
            *pending = Some(name);
        }
    }

    fn take(&self) -> Option<String> {
        self.0.lock().ok().and_then(|mut n| n.take())
    }
}

/// Background stage running a [`ChannelWriter`].
pub struct PreviewSender {
    task: Task,
    channel: ChannelHandle,
    state: Arc<Mutex<ChannelState>>,
}

impl PreviewSender {
    /// Start the stage. Frames go to `output` after mirroring, or are
    /// dropped when it is `None`.
    pub fn spawn(
        input: Arc<BlockingQueue<FrameRecord>>,
        output: Option<Arc<BlockingQueue<FrameRecord>>>,
        connector: Arc<dyn PipeConnector>,
        poll_interval: Duration,
    ) -> Result<Self, EngineError> {
        let channel = ChannelHandle::default();
        let state = Arc::new(Mutex::new(ChannelState::Closed));

        let names = channel.clone();
        let published = Arc::clone(&state);
        let mut writer = ChannelWriter::new(connector);

        let forward = move |frame: FrameRecord| {
            if let Some(out) = output.as_ref() {
                out.push(frame);
            }
        };

        let task = Task::start(
            "preview-send",
            move |stop: &StopToken| -> Result<(), EngineError> {
                while !stop.is_stop_requested() {
                    let Some(frame) = input.try_pop(poll_interval) else {
                        continue;
                    };

                    if let Some(name) = names.take() {
                        if let Err(e) = writer.set_name(name) {
                            warn!("ignoring preview channel: {e}");
                        }
                    }

                    writer.handle_frame(&frame, stop);
                    if let Ok(mut s) = published.lock() {
                        *s = writer.state();
                    }
                    forward(frame);
                }

                // Whatever is still queued goes downstream unmirrored.
                for frame in input.pop_all_available(Duration::ZERO) {
                    forward(frame);
                }
                writer.close();
                Ok(())
            },
        )?;

        Ok(Self {
            task,
            channel,
            state,
        })
    }

    /// Hand the stage a channel to create on its next frame.
    pub fn set_channel(&self, name: String) {
        self.channel.set(name);
    }

    /// A handle that can assign channels after the stage has been moved.
    pub fn channel_handle(&self) -> ChannelHandle {
        self.channel.clone()
    }

    pub fn channel_state(&self) -> ChannelState {
        self.state.lock().map(|s| *s).unwrap_or(ChannelState::Error)
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    pub fn terminate(&mut self, timeout: Duration) -> bool {
        self.task.terminate(timeout)
    }
}

// ── Tests ────────────────────────────────────────────────────────
