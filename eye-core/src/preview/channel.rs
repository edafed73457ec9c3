//! Preview channel state machine.
//!
//! ```text
//!  Closed ──open──► Opening ──connected──► Open
//!                      │                     │
//!                      └────────► Error ◄────┘
//! ```
//!
//! Frames are written only while `Open`. `Error` is terminal for the
//! channel instance; a fresh instance starts `Closed` again.

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Closed,
    Opening,
    Open,
    Error,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Opening => write!(f, "Opening"),
            Self::Open => write!(f, "Open"),
            Self::Error => write!(f, "Error"),
        }
    }
}

impl ChannelState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// A new channel name is accepted only while closed.
    pub fn accepts_name(&self) -> bool {
        matches!(self, Self::Closed)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Pipe created, reader not yet attached.
    ///
    /// Valid from: `Closed`.
    pub fn begin_open(&mut self) -> Result<(), EngineError> {
        match self {
            Self::Closed => {
                *self = Self::Opening;
                Ok(())
            }
            _ => Err(EngineError::ProtocolViolation(
                "cannot open: channel is not Closed",
            )),
        }
    }

    /// Reader attached.
    ///
    /// Valid from: `Opening`.
    pub fn complete_open(&mut self) -> Result<(), EngineError> {
        match self {
            Self::Opening => {
                *self = Self::Open;
                Ok(())
            }
            _ => Err(EngineError::ProtocolViolation(
                "cannot complete open: channel is not Opening",
            )),
        }
    }

    /// Any I/O failure.
    pub fn fail(&mut self) {
        *self = Self::Error;
    }

    /// Return to `Closed` so a new name can be accepted.
    ///
    /// Valid from any state except `Error`.
    pub fn close(&mut self) -> Result<(), EngineError> {
        match self {
            Self::Error => Err(EngineError::ProtocolViolation(
                "cannot close: channel is in Error",
            )),
            _ => {
                *self = Self::Closed;
                Ok(())
            }
        }
    }
}
