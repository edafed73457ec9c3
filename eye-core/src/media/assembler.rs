//! Reassembly of a raw decoder byte stream into whole frames.
//!
//! The decoder writes headerless BGRA frames back to back. Pipe reads split
//! them at arbitrary points, so the assembler fills one owned buffer at a
//! time and emits a [`FrameRecord`] each time a buffer is complete. Leftover
//! bytes start the next buffer.

use std::sync::Arc;

use crate::error::EngineError;
use crate::frame::{BufferLedger, FrameBuffer, FrameRecord, OwnedBuffer, frame_len};

pub struct FrameAssembler {
    width: u32,
    height: u32,
    fps: u32,
    frame_len: usize,
    base_ms: u64,
    max_frames: u64,
    emitted: u64,
    next_sequence: u64,
    partial: Option<(OwnedBuffer, usize)>,
    ledger: Arc<BufferLedger>,
}

impl FrameAssembler {
    /// Assemble `width`×`height` frames at `fps`.
    ///
    /// Timestamps start at `base_ms`; sequence ids start at
    /// `first_sequence`. Bytes past `max_frames` whole frames are ignored.
    pub fn new(
        width: u32,
        height: u32,
        fps: u32,
        base_ms: u64,
        first_sequence: u64,
        max_frames: u64,
        ledger: Arc<BufferLedger>,
    ) -> Result<Self, EngineError> {
        let frame_len = frame_len(width, height);
        if frame_len == 0 || fps == 0 {
            return Err(EngineError::InvalidArgument(format!(
                "cannot assemble {width}x{height} frames at {fps} fps"
            )));
        }
        Ok(Self {
            width,
            height,
            fps,
            frame_len,
            base_ms,
            max_frames,
            emitted: 0,
            next_sequence: first_sequence,
            partial: None,
            ledger,
        })
    }

    /// Timestamp of frame `index` within this video.
    fn timestamp_of(&self, index: u64) -> u64 {
        self.base_ms + index * 1000 / self.fps as u64
    }

    /// Feed decoder output; returns the frames it completed, oldest first.
    pub fn push(&mut self, mut data: &[u8]) -> Vec<FrameRecord> {
        let mut frames = Vec::new();
        while !data.is_empty() && !self.is_complete() {
            let (mut buffer, mut filled) = match self.partial.take() {
                Some(partial) => partial,
                None => (self.ledger.allocate(self.frame_len), 0),
            };

            let take = (self.frame_len - filled).min(data.len());
            buffer.as_mut_slice()[filled..filled + take].copy_from_slice(&data[..take]);
            filled += take;
            data = &data[take..];

            if filled < self.frame_len {
                self.partial = Some((buffer, filled));
                break;
            }

            frames.push(FrameRecord::new(
                self.next_sequence,
                self.timestamp_of(self.emitted),
                self.fps,
                FrameBuffer::Owned {
                    data: buffer,
                    width: self.width,
                    height: self.height,
                },
            ));
            self.next_sequence += 1;
            self.emitted += 1;
        }
        frames
    }

    /// Every expected frame has been emitted.
    pub fn is_complete(&self) -> bool {
        self.emitted >= self.max_frames
    }

    pub fn frames_emitted(&self) -> u64 {
        self.emitted
    }

    /// Sequence id the next emitted frame will carry.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Timestamp the next emitted frame would carry. Once decoding stops
    /// this is where the following video's timeline begins.
    pub fn next_timestamp_ms(&self) -> u64 {
        self.timestamp_of(self.emitted)
    }

    pub fn has_partial(&self) -> bool {
        self.partial.is_some()
    }

    /// Drop a half-filled frame. Returns how many bytes it held.
    pub fn discard_partial(&mut self) -> usize {
        self.partial.take().map(|(_, filled)| filled).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler(max_frames: u64) -> (FrameAssembler, Arc<BufferLedger>) {
        let ledger = BufferLedger::new();
        let asm = FrameAssembler::new(2, 1, 5, 1_000, 7, max_frames, Arc::clone(&ledger)).unwrap();
        (asm, ledger)
    }

    #[test]
    fn splits_stream_at_frame_boundaries() {
        let (mut asm, _) = assembler(10);
        let stream: Vec<u8> = (0..24).collect();

        let mut frames = asm.push(&stream[..5]);
        assert!(frames.is_empty());
        assert!(asm.has_partial());
        frames.extend(asm.push(&stream[5..19]));
        frames.extend(asm.push(&stream[19..]));

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].bytes(), &stream[0..8]);
        assert_eq!(frames[1].bytes(), &stream[8..16]);
        assert_eq!(frames[2].bytes(), &stream[16..24]);
        assert!(!asm.has_partial());
    }

    #[test]
    fn timestamps_and_sequences_advance() {
        let (mut asm, _) = assembler(10);
        let frames = asm.push(&[0u8; 8 * 3]);
        let ts: Vec<_> = frames.iter().map(|f| f.timestamp_ms).collect();
        let seq: Vec<_> = frames.iter().map(|f| f.sequence).collect();
        assert_eq!(ts, vec![1_000, 1_200, 1_400]);
        assert_eq!(seq, vec![7, 8, 9]);
        assert_eq!(asm.next_sequence(), 10);
        assert_eq!(asm.next_timestamp_ms(), 1_600);
    }

    #[test]
    fn stops_at_expected_frame_count() {
        let (mut asm, _) = assembler(2);
        let frames = asm.push(&[1u8; 8 * 4]);
        assert_eq!(frames.len(), 2);
        assert!(asm.is_complete());
        assert!(asm.push(&[1u8; 8]).is_empty());
    }

    #[test]
    fn discarded_partial_is_released() {
        let (mut asm, ledger) = assembler(10);
        asm.push(&[0u8; 3]);
        assert_eq!(ledger.stats().outstanding(), 1);
        assert_eq!(asm.discard_partial(), 3);
        assert_eq!(ledger.stats().outstanding(), 0);
    }

    #[test]
    fn zero_sized_frames_rejected() {
        let ledger = BufferLedger::new();
        assert!(FrameAssembler::new(0, 10, 30, 0, 0, 1, ledger).is_err());
    }
}
