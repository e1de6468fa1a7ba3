//! Fixed-window sliding statistics.
//!
//! The trackers judge whether a motion model has settled by watching the
//! spread of its recent state components: a velocity whose windowed standard
//! deviation is still large belongs to a filter that has not converged, and
//! firing on it would miss. All three aggregators share the same small API
//! (`push`, `clear`, `len`, `is_full`) and drop the oldest sample once the
//! window is full.

use std::collections::VecDeque;

/// Running arithmetic mean over the last `capacity` pushes.
#[derive(Debug, Clone)]
pub struct SlideAvg {
    window: VecDeque<f64>,
    capacity: usize,
    sum: f64,
}

impl SlideAvg {
    /// Creates an averager over a window of `capacity` samples (min 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            sum: 0.0,
        }
    }

    /// Pushes a sample, dropping the oldest if the window is full.
    pub fn push(&mut self, value: f64) {
        if self.window.len() == self.capacity {
            if let Some(old) = self.window.pop_front() {
                self.sum -= old;
            }
        }
        self.window.push_back(value);
        self.sum += value;
    }

    /// Current mean; 0 when empty.
    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            self.sum / self.window.len() as f64
        }
    }

    /// Number of samples currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// True when no samples are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// True once the window holds `capacity` samples.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.window.len() == self.capacity
    }

    /// Empties the window.
    pub fn clear(&mut self) {
        self.window.clear();
        self.sum = 0.0;
    }
}

/// Unbiased sample standard deviation over the last `capacity` pushes.
///
/// Maintained with the windowed form of Welford's recurrence: inserting a
/// sample and evicting the oldest update the mean and the centred second
/// moment together, so no large-magnitude sums are ever subtracted from one
/// another.
#[derive(Debug, Clone)]
pub struct SlideStd {
    window: VecDeque<f64>,
    capacity: usize,
    mean: f64,
    m2: f64,
}

impl SlideStd {
    /// Creates an aggregator over a window of `capacity` samples (min 2).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            mean: 0.0,
            m2: 0.0,
        }
    }

    /// Pushes a sample, dropping the oldest if the window is full.
    pub fn push(&mut self, value: f64) {
        if self.window.len() < self.capacity {
            // Growing phase: plain Welford insertion.
            self.window.push_back(value);
            let n = self.window.len() as f64;
            let delta = value - self.mean;
            self.mean += delta / n;
            self.m2 += delta * (value - self.mean);
        } else if let Some(old) = self.window.pop_front() {
            // Steady state: joint insert/evict update at constant n.
            self.window.push_back(value);
            let n = self.capacity as f64;
            let old_mean = self.mean;
            self.mean += (value - old) / n;
            self.m2 += (value - old) * (value - self.mean + old - old_mean);
            // Guard against tiny negative drift from rounding.
            if self.m2 < 0.0 {
                self.m2 = 0.0;
            }
        }
    }

    /// Current unbiased standard deviation; 0 with fewer than two samples.
    #[must_use]
    pub fn std(&self) -> f64 {
        let n = self.window.len();
        if n < 2 {
            0.0
        } else {
            (self.m2 / (n as f64 - 1.0)).max(0.0).sqrt()
        }
    }

    /// Current mean of the window.
    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            self.mean
        }
    }

    /// Number of samples currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// True when no samples are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// True once the window holds `capacity` samples.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.window.len() == self.capacity
    }

    /// Empties the window.
    pub fn clear(&mut self) {
        self.window.clear();
        self.mean = 0.0;
        self.m2 = 0.0;
    }
}

/// Weighted mean `Σwᵢvᵢ / Σwᵢ` over the last `capacity` pushes.
///
/// Used to favour observations taken near the face-on angle when smoothing
/// slowly varying quantities like target height.
#[derive(Debug, Clone)]
pub struct SlideWeightedAvg {
    window: VecDeque<(f64, f64)>,
    capacity: usize,
    weighted_sum: f64,
    weight_sum: f64,
}

impl SlideWeightedAvg {
    /// Creates an averager over a window of `capacity` samples (min 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            weighted_sum: 0.0,
            weight_sum: 0.0,
        }
    }

    /// Pushes a (value, weight) pair, dropping the oldest if full.
    ///
    /// Non-positive weights are clamped to a small floor so a window of
    /// edge-on observations still produces a defined mean.
    pub fn push(&mut self, value: f64, weight: f64) {
        let weight = weight.max(1e-6);
        if self.window.len() == self.capacity {
            if let Some((v, w)) = self.window.pop_front() {
                self.weighted_sum -= v * w;
                self.weight_sum -= w;
            }
        }
        self.window.push_back((value, weight));
        self.weighted_sum += value * weight;
        self.weight_sum += weight;
    }

    /// Current weighted mean; 0 when empty.
    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.window.is_empty() || self.weight_sum <= 0.0 {
            0.0
        } else {
            self.weighted_sum / self.weight_sum
        }
    }

    /// Number of samples currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// True when no samples are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// True once the window holds `capacity` samples.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.window.len() == self.capacity
    }

    /// Empties the window.
    pub fn clear(&mut self) {
        self.window.clear();
        self.weighted_sum = 0.0;
        self.weight_sum = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn naive_std(values: &[f64]) -> f64 {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let m2 = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
        (m2 / (n - 1.0)).sqrt()
    }

    #[test]
    fn test_avg_drop_oldest() {
        let mut avg = SlideAvg::new(3);
        for v in [1.0, 2.0, 3.0] {
            avg.push(v);
        }
        assert!(avg.is_full());
        assert_relative_eq!(avg.mean(), 2.0, epsilon = 1e-12);

        // 1.0 falls out of the window.
        avg.push(7.0);
        assert_relative_eq!(avg.mean(), 4.0, epsilon = 1e-12);
        assert_eq!(avg.len(), 3);
    }

    #[test]
    fn test_std_constant_stream_is_zero() {
        let mut std = SlideStd::new(8);
        for _ in 0..30 {
            std.push(5.0);
        }
        assert_relative_eq!(std.std(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_std_alternating_closed_form() {
        // ±1 with an even window: mean 0, unbiased variance n/(n−1).
        let mut std = SlideStd::new(4);
        for i in 0..20 {
            std.push(if i % 2 == 0 { 1.0 } else { -1.0 });
        }
        assert_relative_eq!(std.std(), (4.0_f64 / 3.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_std_matches_naive_recompute() {
        let mut std = SlideStd::new(5);
        let stream: Vec<f64> = (0..40)
            .map(|i| (i as f64 * 0.7).sin() * 3.0 + i as f64 * 0.01)
            .collect();
        for (i, &v) in stream.iter().enumerate() {
            std.push(v);
            if i >= 4 {
                let window = &stream[i - 4..=i];
                assert_relative_eq!(std.std(), naive_std(window), epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_std_stable_against_large_offset() {
        // A large common offset must not destroy the small spread.
        let mut std = SlideStd::new(6);
        for i in 0..24 {
            std.push(1e9 + if i % 2 == 0 { 0.001 } else { -0.001 });
        }
        assert_relative_eq!(std.std(), naive_std(&[0.001, -0.001, 0.001, -0.001, 0.001, -0.001]), epsilon = 1e-6);
    }

    #[test]
    fn test_std_clear() {
        let mut std = SlideStd::new(4);
        for v in [1.0, 9.0, -4.0] {
            std.push(v);
        }
        std.clear();
        assert!(std.is_empty());
        assert_relative_eq!(std.std(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_weighted_avg_favours_heavy_samples() {
        let mut avg = SlideWeightedAvg::new(4);
        avg.push(10.0, 1.0);
        avg.push(0.0, 3.0);
        assert_relative_eq!(avg.mean(), 2.5, epsilon = 1e-12);
    }

    #[test]
    fn test_weighted_avg_drop_oldest() {
        let mut avg = SlideWeightedAvg::new(2);
        avg.push(1.0, 1.0);
        avg.push(2.0, 1.0);
        avg.push(4.0, 1.0); // evicts (1.0, 1.0)
        assert_relative_eq!(avg.mean(), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_weighted_avg_zero_weight_floor() {
        let mut avg = SlideWeightedAvg::new(3);
        avg.push(5.0, 0.0);
        // Clamped weight keeps the mean defined.
        assert_relative_eq!(avg.mean(), 5.0, epsilon = 1e-9);
    }
}
