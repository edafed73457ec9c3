//! Thread-safe FIFO used between pipeline stages.
//!
//! A [`BlockingQueue`] never blocks producers; consumers wait with a
//! timeout so their loops stay cancellable. Ownership of each item moves to
//! whichever consumer pops it.
//!
//! Producers that outrun their consumers apply their own backpressure by
//! checking [`BlockingQueue::len`]. A producer that is done calls
//! [`BlockingQueue::close`]; consumers then see [`BlockingQueue::is_drained`]
//! once the remaining items have been popped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

/// Unbounded multi-producer, multi-consumer FIFO.
pub struct BlockingQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    closed: AtomicBool,
}

impl<T> BlockingQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            tx,
            rx,
            closed: AtomicBool::new(false),
        }
    }

    /// Append an item. Never blocks.
    pub fn push(&self, item: T) {
        // Both halves live in `self`, so the channel cannot be disconnected.
        let _ = self.tx.send(item);
    }

    /// Pop the oldest item, waiting up to `timeout` for one to arrive.
    pub fn try_pop(&self, timeout: Duration) -> Option<T> {
        if timeout.is_zero() {
            return self.rx.try_recv().ok();
        }
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Pop every item currently queued, waiting up to `timeout` for the
    /// first one. Items are returned oldest first.
    pub fn pop_all_available(&self, timeout: Duration) -> Vec<T> {
        let mut items = Vec::new();
        if let Some(first) = self.try_pop(timeout) {
            items.push(first);
            items.extend(self.rx.try_iter());
        }
        items
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether no items are queued.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Mark that no further items will be pushed.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Whether the producer has called [`close`](Self::close).
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Closed and empty: nothing more will ever be popped.
    pub fn is_drained(&self) -> bool {
        self.is_closed() && self.is_empty()
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for BlockingQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingQueue")
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn fifo_order() {
        let q = BlockingQueue::new();
        for i in 0..5 {
            q.push(i);
        }
        assert_eq!(q.len(), 5);
        for i in 0..5 {
            assert_eq!(q.try_pop(Duration::ZERO), Some(i));
        }
        assert!(q.is_empty());
    }

    #[test]
    fn try_pop_times_out() {
        let q: BlockingQueue<u32> = BlockingQueue::new();
        let start = Instant::now();
        assert_eq!(q.try_pop(Duration::from_millis(20)), None);
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn try_pop_wakes_on_push() {
        let q = Arc::new(BlockingQueue::new());
        let producer = Arc::clone(&q);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            producer.push(42u32);
        });
        assert_eq!(q.try_pop(Duration::from_secs(2)), Some(42));
    }

    #[test]
    fn pop_all_returns_everything_in_order() {
        let q = BlockingQueue::new();
        q.push("a");
        q.push("b");
        q.push("c");
        assert_eq!(q.pop_all_available(Duration::ZERO), vec!["a", "b", "c"]);
        assert!(q.pop_all_available(Duration::from_millis(1)).is_empty());
    }

    #[test]
    fn per_producer_order_is_preserved() {
        let q = Arc::new(BlockingQueue::new());
        let producers: Vec<_> = (0..4u32)
            .map(|p| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || {
                    for i in 0..500u32 {
                        q.push((p, i));
                    }
                })
            })
            .collect();
        for h in producers {
            h.join().unwrap();
        }

        let mut last = [None::<u32>; 4];
        while let Some((p, i)) = q.try_pop(Duration::ZERO) {
            if let Some(prev) = last[p as usize] {
                assert!(i > prev, "producer {p}: {i} after {prev}");
            }
            last[p as usize] = Some(i);
        }
        assert!(last.iter().all(|l| *l == Some(499)));
    }

    #[test]
    fn drained_after_close_and_empty() {
        let q = BlockingQueue::new();
        q.push(1);
        q.close();
        assert!(q.is_closed());
        assert!(!q.is_drained());
        q.try_pop(Duration::ZERO);
        assert!(q.is_drained());
    }
}
