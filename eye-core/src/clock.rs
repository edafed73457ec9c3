//! Process-wide monotonic microsecond clock.
//!
//! Presentation timestamps and external-event timestamps must live in the
//! same time domain so they can be subtracted. Every backend reports times
//! through [`now_us`].

use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Microseconds elapsed since the first call into the clock.
pub fn now_us() -> u64 {
    EPOCH.elapsed().as_micros() as u64
}

/// Convert an [`Instant`] into the clock's microsecond domain.
///
/// Instants that precede the epoch map to zero.
pub fn instant_to_us(at: Instant) -> u64 {
    at.saturating_duration_since(*EPOCH).as_micros() as u64
}

/// The [`Instant`] corresponding to a microsecond timestamp.
pub fn us_to_instant(us: u64) -> Instant {
    *EPOCH + Duration::from_micros(us)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic() {
        let a = now_us();
        std::thread::sleep(Duration::from_millis(2));
        let b = now_us();
        assert!(b > a);
    }

    #[test]
    fn instant_round_trip() {
        let us = now_us() + 5_000;
        assert_eq!(instant_to_us(us_to_instant(us)), us);
    }
}
