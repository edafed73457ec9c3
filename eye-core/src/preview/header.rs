//! Fixed-size header preceding each preview frame on the wire.
//!
//! ```text
//!  0        4        8        12       16
//!  ┌────────┬────────┬────────┬────────┐
//!  │ frame  │ width  │ height │ length │  u32, little-endian
//!  └────────┴────────┴────────┴────────┘
//! ```
//!
//! `length` bytes of raw BGRA pixels follow the header.

use crate::error::EngineError;
use crate::frame::frame_len;

pub type PreviewHeaderBytes = [u8; PreviewHeader::SIZE];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewHeader {
    pub frame_number: u32,
    pub width: u32,
    pub height: u32,
    pub byte_length: u32,
}

impl PreviewHeader {
    pub const SIZE: usize = 16;

    pub fn new(frame_number: u32, width: u32, height: u32, byte_length: u32) -> Self {
        Self {
            frame_number,
            width,
            height,
            byte_length,
        }
    }

    pub fn to_bytes(&self) -> PreviewHeaderBytes {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.frame_number.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.width.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.height.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.byte_length.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &PreviewHeaderBytes) -> Self {
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Self {
            frame_number: word(0),
            width: word(4),
            height: word(8),
            byte_length: word(12),
        }
    }

    /// Check that the header describes a frame the receiver can accept.
    pub fn validate(&self, max_frame_bytes: usize) -> Result<(), EngineError> {
        if self.width == 0 || self.height == 0 {
            return Err(EngineError::InvalidHeader("zero dimension"));
        }
        let size = self.byte_length as usize;
        if size > max_frame_bytes {
            return Err(EngineError::FrameTooLarge {
                size,
                max: max_frame_bytes,
            });
        }
        if size != frame_len(self.width, self.height) {
            return Err(EngineError::InvalidHeader(
                "byte length does not match dimensions",
            ));
        }
        Ok(())
    }
}
