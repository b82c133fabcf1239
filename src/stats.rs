//! Rolling statistics over recent event-loop lag measurements.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Number of lag samples retained.
pub const WINDOW_CAPACITY: usize = 100;

/// Lag (ms) below which utilization scales linearly up to 10%.
const UTILIZATION_KNEE_MS: f64 = 1.0;
const UTILIZATION_AT_KNEE: f64 = 10.0;
/// Percentage points of utilization added per millisecond of lag above the knee.
pub const UTILIZATION_SLOPE: f64 = 5.0;
const UTILIZATION_CEILING: f64 = 100.0;

/// Mean/min/max/p95 over the current window. All zero for an empty window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LagStats {
    pub mean: f64,
    pub max: f64,
    pub min: f64,
    pub p95: f64,
}

/// Bounded FIFO of lag samples, oldest first.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl RollingWindow {
    pub fn new() -> Self {
        Self::with_capacity(WINDOW_CAPACITY)
    }

    /// A capacity of zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `sample`, evicting the oldest once full, and returns the
    /// statistics over the updated window. Non-finite samples are ignored.
    pub fn update(&mut self, sample: f64) -> LagStats {
        if sample.is_finite() {
            if self.samples.len() == self.capacity {
                self.samples.pop_front();
            }
            self.samples.push_back(sample);
        }
        self.stats()
    }

    pub fn stats(&self) -> LagStats {
        if self.samples.is_empty() {
            return LagStats::default();
        }

        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &v in &self.samples {
            sum += v;
            min = min.min(v);
            max = max.max(v);
        }

        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);

        LagStats {
            mean: sum / sorted.len() as f64,
            max,
            min,
            p95: nearest_rank(&sorted, 0.95),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.samples.iter()
    }
}

/// Nearest-rank percentile over an ascending slice: index `floor(q * len)`
/// clamped to the last element. Not interpolated.
fn nearest_rank(sorted: &[f64], q: f64) -> f64 {
    let idx = ((sorted.len() as f64) * q).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Coarse event-loop utilization (percent) derived from the latest lag.
///
/// Linear from 0 to 10% up to 1ms of lag, then `UTILIZATION_SLOPE` points
/// per extra millisecond, saturating at 100%. This is a proxy, not a
/// measured time-in-loop ratio.
pub fn utilization(lag_ms: f64) -> f64 {
    let lag = if lag_ms.is_finite() { lag_ms.max(0.0) } else { 0.0 };
    if lag <= UTILIZATION_KNEE_MS {
        return lag * (UTILIZATION_AT_KNEE / UTILIZATION_KNEE_MS);
    }
    (UTILIZATION_AT_KNEE + (lag - UTILIZATION_KNEE_MS) * UTILIZATION_SLOPE)
        .min(UTILIZATION_CEILING)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window_is_all_zero() {
        let window = RollingWindow::new();
        assert_eq!(window.stats(), LagStats::default());
        assert!(window.is_empty());
    }

    #[test]
    fn test_p95_nearest_rank_takes_max_of_ten() {
        let mut window = RollingWindow::new();
        let mut stats = LagStats::default();
        for v in 1..=10 {
            stats = window.update(v as f64);
        }
        assert_eq!(stats.p95, 10.0);
        assert_eq!(stats.mean, 5.5);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 10.0);
    }

    #[test]
    fn test_p95_ignores_insertion_order() {
        let mut window = RollingWindow::new();
        for v in [9.0, 3.0, 10.0, 1.0, 7.0, 2.0, 8.0, 4.0, 6.0, 5.0] {
            window.update(v);
        }
        assert_eq!(window.stats().p95, 10.0);
    }

    #[test]
    fn test_p95_over_full_window() {
        let mut window = RollingWindow::new();
        for v in 0..100 {
            window.update(v as f64);
        }
        // floor(0.95 * 100) = 95
        assert_eq!(window.stats().p95, 95.0);
    }

    #[test]
    fn test_single_sample() {
        let mut window = RollingWindow::new();
        let stats = window.update(3.5);
        assert_eq!(
            stats,
            LagStats {
                mean: 3.5,
                max: 3.5,
                min: 3.5,
                p95: 3.5
            }
        );
    }

    #[test]
    fn test_fifo_eviction_drops_oldest() {
        let mut window = RollingWindow::new();
        // Oldest sample is the extreme value; it must stop influencing max.
        window.update(1000.0);
        for _ in 0..99 {
            window.update(2.0);
        }
        assert_eq!(window.len(), WINDOW_CAPACITY);
        assert_eq!(window.stats().max, 1000.0);

        let stats = window.update(3.0);
        assert_eq!(window.len(), WINDOW_CAPACITY);
        assert_eq!(stats.max, 3.0);
        assert_eq!(stats.min, 2.0);
    }

    #[test]
    fn test_eviction_of_minimum() {
        let mut window = RollingWindow::with_capacity(3);
        window.update(0.5);
        window.update(4.0);
        window.update(5.0);
        let stats = window.update(6.0);
        assert_eq!(stats.min, 4.0);
        assert_eq!(stats.mean, 5.0);
        assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_non_finite_samples_are_ignored() {
        let mut window = RollingWindow::new();
        window.update(2.0);
        let stats = window.update(f64::NAN);
        assert_eq!(window.len(), 1);
        assert_eq!(stats.mean, 2.0);
    }

    #[test]
    fn test_utilization_curve() {
        assert_eq!(utilization(0.0), 0.0);
        assert_eq!(utilization(0.5), 5.0);
        assert_eq!(utilization(1.0), 10.0);
        assert_eq!(utilization(3.0), 20.0);
        assert_eq!(utilization(19.0), 100.0);
        assert_eq!(utilization(500.0), 100.0);
        assert_eq!(utilization(-4.0), 0.0);
    }

    #[test]
    fn test_utilization_is_monotonic() {
        let mut prev = utilization(0.0);
        for i in 1..400 {
            let cur = utilization(i as f64 * 0.1);
            assert!(cur >= prev);
            prev = cur;
        }
    }
}
