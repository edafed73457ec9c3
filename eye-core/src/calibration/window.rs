//! Rolling window of latency samples.

use std::collections::VecDeque;

/// Bounded FIFO of latency samples in milliseconds.
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: VecDeque<f64>,
    max: usize,
    min: usize,
}

impl LatencyWindow {
    /// Keep at most `max` samples; statistics need at least `min`.
    pub fn new(max: usize, min: usize) -> Self {
        let max = max.max(1);
        Self {
            samples: VecDeque::with_capacity(max),
            max,
            min: min.clamp(1, max),
        }
    }

    /// Add a sample, evicting the oldest when full.
    pub fn push(&mut self, sample_ms: f64) {
        if self.samples.len() == self.max {
            self.samples.pop_front();
        }
        self.samples.push_back(sample_ms);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Enough samples to report.
    pub fn is_ready(&self) -> bool {
        self.samples.len() >= self.min
    }

    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Population standard deviation.
    pub fn std_dev(&self) -> Option<f64> {
        let mean = self.mean()?;
        let variance = self
            .samples
            .iter()
            .map(|s| (s - mean).powi(2))
            .sum::<f64>()
            / self.samples.len() as f64;
        Some(variance.sqrt())
    }

    /// `mean ± stddev` with precision chosen by the spread, or `None`
    /// until the window is ready.
    pub fn summary(&self) -> Option<String> {
        if !self.is_ready() {
            return None;
        }
        let mean = self.mean()?;
        let sd = self.std_dev()?;
        Some(format_latency(mean, sd))
    }
}

/// Whole milliseconds when the spread exceeds 1 ms, one decimal above
/// 0.1 ms, two otherwise.
pub fn format_latency(mean: f64, sd: f64) -> String {
    let precision = if sd > 1.0 {
        0
    } else if sd > 0.1 {
        1
    } else {
        2
    };
    format!("{mean:.precision$} ± {sd:.precision$}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_samples() {
        let mut w = LatencyWindow::new(50, 5);
        for _ in 0..5 {
            w.push(10.0);
        }
        assert_eq!(w.mean(), Some(10.0));
        assert_eq!(w.std_dev(), Some(0.0));
        assert_eq!(w.summary().as_deref(), Some("10.00 ± 0.00"));
    }

    #[test]
    fn not_ready_below_minimum() {
        let mut w = LatencyWindow::new(50, 5);
        for _ in 0..4 {
            w.push(10.0);
        }
        assert!(w.summary().is_none());
    }

    #[test]
    fn evicts_oldest() {
        let mut w = LatencyWindow::new(3, 1);
        for s in [100.0, 1.0, 2.0, 3.0] {
            w.push(s);
        }
        assert_eq!(w.len(), 3);
        assert_eq!(w.mean(), Some(2.0));
    }

    #[test]
    fn precision_follows_spread() {
        assert_eq!(format_latency(20.4, 4.0), "20 ± 4");
        assert_eq!(format_latency(20.44, 0.5), "20.4 ± 0.5");
        assert_eq!(format_latency(20.444, 0.05), "20.44 ± 0.05");
    }

    #[test]
    fn population_std_dev() {
        let mut w = LatencyWindow::new(10, 1);
        for s in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            w.push(s);
        }
        assert_eq!(w.mean(), Some(5.0));
        assert_eq!(w.std_dev(), Some(2.0));
    }

    #[test]
    fn clear_resets() {
        let mut w = LatencyWindow::new(10, 2);
        w.push(1.0);
        w.push(2.0);
        w.clear();
        assert!(w.is_empty());
        w.push(7.0);
        w.push(7.0);
        assert_eq!(w.mean(), Some(7.0));
    }
}
