//! Cross-process preview streaming.
//!
//! A sender stage mirrors pipeline frames over a named pipe; a receiver
//! stage in another process (or another session) reads them back. Each
//! frame on the wire is a [`PreviewHeader`] followed by raw BGRA pixels.
//! Preview is best effort: a broken channel is abandoned without touching
//! the pipeline that feeds it.

pub mod channel;
pub mod header;
pub mod pipe;
pub mod receiver;
pub mod sender;

pub use channel::ChannelState;
pub use header::PreviewHeader;
pub use pipe::{NamedPipeConnector, OutboundPipe, PipeConnector, generate_channel_name};
pub use receiver::{PreviewImage, PreviewReceiver, ReceiverConfig};
pub use sender::{ChannelHandle, ChannelWriter, PreviewSender};
