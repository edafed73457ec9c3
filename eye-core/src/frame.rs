//! Frame ownership records passed between pipeline stages.
//!
//! Every queue in the engine carries [`FrameRecord`]s. The pixel buffer is
//! tagged with who owns it:
//!
//! - [`FrameBuffer::Borrowed`]: memory handed in by the caller. The engine
//!   only drops its reference; the caller learns the frame is finished
//!   through the completed-frame id list.
//! - [`FrameBuffer::Owned`]: memory allocated by the engine through a
//!   [`BufferLedger`]. It is released exactly once, when the record is
//!   dropped by the terminal stage.
//!
//! Pixels are always tightly packed BGRA.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

/// Bytes per pixel of every frame in the engine (BGRA).
pub const BYTES_PER_PIXEL: usize = 4;

/// Size in bytes of a tightly packed BGRA frame.
pub const fn frame_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * BYTES_PER_PIXEL
}

// ── BufferLedger ─────────────────────────────────────────────────

/// Counts owned-buffer allocations and releases.
#[derive(Debug, Default)]
pub struct BufferLedger {
    allocated: AtomicU64,
    released: AtomicU64,
}

/// Snapshot of a [`BufferLedger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferStats {
    pub allocated: u64,
    pub released: u64,
}

impl BufferStats {
    /// Buffers allocated but not yet released.
    pub fn outstanding(&self) -> u64 {
        self.allocated.saturating_sub(self.released)
    }
}

impl BufferLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Allocate a zeroed buffer of `len` bytes.
    pub fn allocate(self: &Arc<Self>, len: usize) -> OwnedBuffer {
        self.adopt(vec![0; len])
    }

    /// Take ownership of an already-filled vector.
    pub fn adopt(self: &Arc<Self>, data: Vec<u8>) -> OwnedBuffer {
        self.allocated.fetch_add(1, Ordering::Relaxed);
        OwnedBuffer {
            data,
            ledger: Arc::clone(self),
        }
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
        }
    }
}

// ── OwnedBuffer ──────────────────────────────────────────────────

/// Engine-allocated pixel memory. Released to its ledger on drop.
pub struct OwnedBuffer {
    data: Vec<u8>,
    ledger: Arc<BufferLedger>,
}

impl OwnedBuffer {
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Drop for OwnedBuffer {
    fn drop(&mut self) {
        self.ledger.released.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for OwnedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedBuffer")
            .field("len", &self.data.len())
            .finish()
    }
}

// ── FrameBuffer ──────────────────────────────────────────────────

/// Pixel data of a frame, tagged by owner.
#[derive(Debug)]
pub enum FrameBuffer {
    /// Caller-owned memory. Never freed by the engine.
    Borrowed { data: Bytes, width: u32, height: u32 },
    /// Engine-owned memory.
    Owned {
        data: OwnedBuffer,
        width: u32,
        height: u32,
    },
}

impl FrameBuffer {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Borrowed { data, .. } => data,
            Self::Owned { data, .. } => data.as_slice(),
        }
    }

    pub fn width(&self) -> u32 {
        match self {
            Self::Borrowed { width, .. } | Self::Owned { width, .. } => *width,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Self::Borrowed { height, .. } | Self::Owned { height, .. } => *height,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned { .. })
    }
}

// ── FrameRecord ──────────────────────────────────────────────────

/// The unit of data flowing through every queue.
#[derive(Debug)]
pub struct FrameRecord {
    /// Monotonic id assigned at ingestion.
    pub sequence: u64,
    /// Presentation or decode time in milliseconds.
    pub timestamp_ms: u64,
    /// Rate the frame is meant to be shown at.
    pub fps: u32,
    pub buffer: FrameBuffer,
}

impl FrameRecord {
    pub fn new(sequence: u64, timestamp_ms: u64, fps: u32, buffer: FrameBuffer) -> Self {
        Self {
            sequence,
            timestamp_ms,
            fps,
            buffer,
        }
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    pub fn bytes(&self) -> &[u8] {
        self.buffer.bytes()
    }

    pub fn byte_len(&self) -> usize {
        self.buffer.len()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CallerMemory {
        data: Vec<u8>,
        freed: Arc<AtomicUsize>,
    }

    impl AsRef<[u8]> for CallerMemory {
        fn as_ref(&self) -> &[u8] {
            &self.data
        }
    }

    impl Drop for CallerMemory {
        fn drop(&mut self) {
            self.freed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn owned_buffers_released_exactly_once() {
        let ledger = BufferLedger::new();
        let frames: Vec<_> = (0..10)
            .map(|i| {
                FrameRecord::new(
                    i,
                    0,
                    30,
                    FrameBuffer::Owned {
                        data: ledger.allocate(frame_len(2, 2)),
                        width: 2,
                        height: 2,
                    },
                )
            })
            .collect();
        assert_eq!(ledger.stats().allocated, 10);
        assert_eq!(ledger.stats().outstanding(), 10);
        drop(frames);
        assert_eq!(
            ledger.stats(),
            BufferStats {
                allocated: 10,
                released: 10
            }
        );
    }

    #[test]
    fn borrowed_buffers_are_never_freed_by_engine() {
        let freed = Arc::new(AtomicUsize::new(0));
        let caller = Bytes::from_owner(CallerMemory {
            data: vec![7; frame_len(2, 2)],
            freed: Arc::clone(&freed),
        });

        let frames: Vec<_> = (0..10)
            .map(|i| {
                FrameRecord::new(
                    i,
                    0,
                    30,
                    FrameBuffer::Borrowed {
                        data: caller.clone(),
                        width: 2,
                        height: 2,
                    },
                )
            })
            .collect();
        drop(frames);
        assert_eq!(freed.load(Ordering::SeqCst), 0);
        assert_eq!(caller[0], 7);
    }

    #[test]
    fn accessors_follow_the_tag() {
        let ledger = BufferLedger::new();
        let owned = FrameBuffer::Owned {
            data: ledger.adopt(vec![1, 2, 3, 4]),
            width: 1,
            height: 1,
        };
        assert!(owned.is_owned());
        assert_eq!(owned.bytes(), &[1, 2, 3, 4]);

        let borrowed = FrameBuffer::Borrowed {
            data: Bytes::from_static(&[9; 8]),
            width: 2,
            height: 1,
        };
        assert!(!borrowed.is_owned());
        assert_eq!(borrowed.width(), 2);
        assert_eq!(borrowed.len(), 8);
    }
}
