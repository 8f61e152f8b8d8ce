//! Rolling-window speed estimation.
//!
//! One estimator per session, fed by progress updates and queried by the
//! UI. Pure value object: timestamps come in through the API, so tests
//! control the clock completely.
//!
//! Sampling: up to 12 `(timestamp, raw, smoothed)` samples over the last
//! 5 s. Updates closer together than the minimum interval are folded into
//! the next sample. Smoothing is exponential with α = 0.8; outliers more
//! than twice the recent mean away from it are dropped once enough history
//! exists. High-throughput mode (≥ 20 MiB moved in ≥ 2 s) halves the
//! minimum sampling interval and switches the current-speed query to a
//! newest-biased weighted mean.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Maximum retained samples.
const MAX_SAMPLES: usize = 12;

/// Samples older than this are evicted.
const SAMPLE_WINDOW: Duration = Duration::from_secs(5);

/// Minimum spacing between samples in normal mode.
const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Minimum spacing between samples in high-throughput mode.
const MIN_SAMPLE_INTERVAL_FAST: Duration = Duration::from_millis(50);

/// Exponential smoothing factor (weight of the newest raw value).
const SMOOTHING_ALPHA: f64 = 0.8;

/// Queries return nothing until this much time has passed since the first
/// sample.
const WARMUP: Duration = Duration::from_millis(200);

/// Bytes threshold for high-throughput mode.
const HIGH_THROUGHPUT_BYTES: u64 = 20 * 1024 * 1024;

/// Elapsed threshold for high-throughput mode.
const HIGH_THROUGHPUT_ELAPSED: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    raw_bps: f64,
    smoothed_bps: f64,
}

/// Per-session throughput estimator.
#[derive(Debug)]
pub struct SpeedEstimator {
    samples: VecDeque<Sample>,
    started_at: Instant,
    first_sample_at: Option<Instant>,
    last_update_at: Instant,
    last_bytes: u64,
    total_bytes: u64,
    peak_raw_bps: f64,
    high_throughput: bool,
}

impl SpeedEstimator {
    /// Create an estimator anchored at `now`.
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self {
            samples: VecDeque::with_capacity(MAX_SAMPLES),
            started_at: now,
            first_sample_at: None,
            last_update_at: now,
            last_bytes: 0,
            total_bytes: 0,
            peak_raw_bps: 0.0,
            high_throughput: false,
        }
    }

    /// Feed a progress update: the session's cumulative byte counter at
    /// `now`.
    pub fn record(&mut self, now: Instant, total_bytes: u64) {
        self.total_bytes = total_bytes.max(self.total_bytes);
        self.maybe_enter_high_throughput(now);

        let dt = now.saturating_duration_since(self.last_update_at);
        let min_interval = if self.high_throughput {
            MIN_SAMPLE_INTERVAL_FAST
        } else {
            MIN_SAMPLE_INTERVAL
        };
        if dt < min_interval {
            // Too close to the previous update; the delta stays pending and
            // folds into the next sample.
            return;
        }

        let delta = self.total_bytes.saturating_sub(self.last_bytes);
        let raw_bps = delta as f64 * 1000.0 / dt.as_millis().max(1) as f64;

        self.last_update_at = now;
        self.last_bytes = self.total_bytes;

        if self.is_outlier(raw_bps) {
            return;
        }

        self.peak_raw_bps = self.peak_raw_bps.max(raw_bps);

        let smoothed_bps = match self.samples.back() {
            Some(prev) => SMOOTHING_ALPHA * raw_bps + (1.0 - SMOOTHING_ALPHA) * prev.smoothed_bps,
            None => raw_bps,
        };

        if self.first_sample_at.is_none() {
            self.first_sample_at = Some(now);
        }

        self.samples.push_back(Sample {
            at: now,
            raw_bps,
            smoothed_bps,
        });
        self.evict(now);
    }

    fn maybe_enter_high_throughput(&mut self, now: Instant) {
        if !self.high_throughput
            && self.total_bytes >= HIGH_THROUGHPUT_BYTES
            && now.saturating_duration_since(self.started_at) >= HIGH_THROUGHPUT_ELAPSED
        {
            self.high_throughput = true;
        }
    }

    fn is_outlier(&self, raw_bps: f64) -> bool {
        if self.samples.len() < 3 {
            return false;
        }
        let recent: Vec<f64> = self
            .samples
            .iter()
            .rev()
            .take(5)
            .map(|s| s.raw_bps)
            .collect();
        let mean = recent.iter().sum::<f64>() / recent.len() as f64;
        mean > 0.0 && (raw_bps - mean).abs() > 2.0 * mean
    }

    fn evict(&mut self, now: Instant) {
        while self.samples.len() > MAX_SAMPLES {
            self.samples.pop_front();
        }
        while let Some(front) = self.samples.front() {
            if now.saturating_duration_since(front.at) > SAMPLE_WINDOW {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Current speed in bytes per second.
    ///
    /// `None` during the warm-up window or before any sample exists. In
    /// high-throughput mode this is a weighted mean with weights `2^i`
    /// biased toward the newest sample; otherwise the latest smoothed
    /// value.
    #[must_use]
    pub fn current_bps(&self, now: Instant) -> Option<f64> {
        let first = self.first_sample_at?;
        if now.saturating_duration_since(first) < WARMUP {
            return None;
        }

        if self.high_throughput {
            let mut weight_sum = 0.0;
            let mut acc = 0.0;
            for (i, sample) in self.samples.iter().enumerate() {
                let weight = (2.0f64).powi(i as i32);
                acc += sample.smoothed_bps * weight;
                weight_sum += weight;
            }
            if weight_sum > 0.0 {
                Some(acc / weight_sum)
            } else {
                None
            }
        } else {
            self.samples.back().map(|s| s.smoothed_bps)
        }
    }

    /// Latest smoothed sample, warm-up gate not applied.
    #[must_use]
    pub fn instantaneous_bps(&self) -> Option<f64> {
        self.samples.back().map(|s| s.smoothed_bps)
    }

    /// Highest raw sample seen.
    #[must_use]
    pub fn peak_bps(&self) -> f64 {
        self.peak_raw_bps
    }

    /// Whole-session average: total bytes over elapsed time.
    #[must_use]
    pub fn average_bps(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.started_at);
        if elapsed.is_zero() {
            return 0.0;
        }
        self.total_bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimated seconds to move `remaining` bytes at the current speed.
    #[must_use]
    pub fn eta(&self, now: Instant, remaining: u64) -> Option<Duration> {
        let bps = self.current_bps(now)?;
        if bps <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / bps))
    }

    /// Whether high-throughput mode is active.
    #[must_use]
    pub fn is_high_throughput(&self) -> bool {
        self.high_throughput
    }

    /// Number of retained samples.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advance(now: &mut Instant, ms: u64) -> Instant {
        *now += Duration::from_millis(ms);
        *now
    }

    #[test]
    fn test_steady_rate_converges() {
        let mut now = Instant::now();
        let mut est = SpeedEstimator::new(now);

        // 100 KiB every 200 ms = 512000 B/s.
        let mut total = 0u64;
        for _ in 0..10 {
            total += 102_400;
            est.record(advance(&mut now, 200), total);
        }

        let bps = est.current_bps(now).unwrap();
        assert!((bps - 512_000.0).abs() < 1_000.0, "got {bps}");
    }

    #[test]
    fn test_warmup_gate() {
        let mut now = Instant::now();
        let mut est = SpeedEstimator::new(now);
        est.record(advance(&mut now, 150), 10_000);
        // Inside the 200 ms warm-up window after the first sample.
        assert!(est.current_bps(now + Duration::from_millis(10)).is_none());
        assert!(est.current_bps(now + Duration::from_millis(300)).is_some());
        assert!(est.instantaneous_bps().is_some());
    }

    #[test]
    fn test_updates_below_min_interval_are_folded() {
        let mut now = Instant::now();
        let mut est = SpeedEstimator::new(now);
        est.record(advance(&mut now, 150), 1_000);
        // 40 ms later: below the 100 ms floor; no new sample.
        est.record(advance(&mut now, 40), 2_000);
        assert_eq!(est.sample_count(), 1);
        // The folded delta shows up in the next spaced sample.
        est.record(advance(&mut now, 160), 3_000);
        assert_eq!(est.sample_count(), 2);
    }

    #[test]
    fn test_outlier_is_dropped() {
        let mut now = Instant::now();
        let mut est = SpeedEstimator::new(now);
        let mut total = 0u64;
        for _ in 0..4 {
            total += 100_000;
            est.record(advance(&mut now, 200), total);
        }
        let before = est.sample_count();

        // A 100× spike relative to the recent mean.
        total += 10_000_000;
        est.record(advance(&mut now, 200), total);
        assert_eq!(est.sample_count(), before);
    }

    #[test]
    fn test_ring_and_window_bounds() {
        let mut now = Instant::now();
        let mut est = SpeedEstimator::new(now);
        let mut total = 0u64;
        for _ in 0..50 {
            total += 50_000;
            est.record(advance(&mut now, 200), total);
        }
        assert!(est.sample_count() <= MAX_SAMPLES);
    }

    #[test]
    fn test_high_throughput_mode_entry() {
        let mut now = Instant::now();
        let mut est = SpeedEstimator::new(now);

        // 30 MiB over 3 seconds.
        let mut total = 0u64;
        for _ in 0..15 {
            total += 2 * 1024 * 1024;
            est.record(advance(&mut now, 200), total);
        }
        assert!(est.is_high_throughput());
        assert!(est.current_bps(now).is_some());
    }

    #[test]
    fn test_high_throughput_not_entered_too_early() {
        let mut now = Instant::now();
        let mut est = SpeedEstimator::new(now);
        // 30 MiB but in under 2 seconds.
        est.record(advance(&mut now, 500), 30 * 1024 * 1024);
        assert!(!est.is_high_throughput());
    }

    #[test]
    fn test_peak_and_average() {
        let mut now = Instant::now();
        let start = now;
        let mut est = SpeedEstimator::new(now);
        est.record(advance(&mut now, 200), 100_000);
        est.record(advance(&mut now, 200), 400_000);
        est.record(advance(&mut now, 200), 500_000);

        assert!(est.peak_bps() >= 1_000_000.0);
        let avg = est.average_bps(start + Duration::from_secs(1));
        assert!((avg - 500_000.0).abs() < 1.0);
    }

    #[test]
    fn test_eta() {
        let mut now = Instant::now();
        let mut est = SpeedEstimator::new(now);
        let mut total = 0u64;
        for _ in 0..5 {
            total += 100_000;
            est.record(advance(&mut now, 200), total);
        }
        // ~500 KB/s; 1 MB remaining → ~2 s.
        let eta = est.eta(now, 1_000_000).unwrap();
        assert!(eta > Duration::from_secs(1) && eta < Duration::from_secs(4));
    }
}
