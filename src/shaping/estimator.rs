//! # Throughput Estimation
//!
//! Measurement side of adaptive shaping. The estimator watches the
//! stream of outbound payload sizes through a sliding time window and
//! proposes a target rate for the bucket whenever the picture changes
//! enough to matter.
//!
//! ```text
//!     offered load ──► record(bytes) ──► [samples within window]
//!                                               │
//!                     recompute() ──► measured = Σ bytes / window
//!                                               │
//!                                  candidate = measured × limit_ratio
//!                                               │
//!                              changed > 10%? ──► propose new target
//! ```
//!
//! Two deliberate properties:
//!
//! - **Offered load, not throttled load.** `record` runs before the
//!   bucket delays anything, so the measurement tracks what callers
//!   tried to send. Under sustained overload the estimate converges on
//!   the attempted rate rather than the previously enforced one.
//! - **Decisions, not side effects.** `recompute` returns the candidate
//!   when a retarget is warranted and the caller applies it to the
//!   bucket. The estimator itself never touches a bucket.
//!
//! The type is single-owner (`&mut self` mutators); the transport
//! guards its instance with a mutex.

use super::{
    config::AdaptiveConfig,
    error::{Result, ShaperError},
    utils::current_time_ns,
};
use std::collections::VecDeque;
use tracing::debug;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Minimum relative change between the current target and a new
/// candidate before a retarget is proposed.
///
/// Keeps the bucket from being rebuilt on every datagram when the
/// measured rate wobbles around a steady value.
pub const RETARGET_HYSTERESIS: f64 = 0.10;

/// One recorded send.
#[derive(Debug, Clone, Copy)]
struct Sample {
    at_ns: u64,
    bytes: f64,
}

/// Sliding-window throughput estimator.
///
/// Feeds a token bucket its target rate in adaptive mode: the measured
/// throughput over the last `window_seconds`, scaled by `limit_ratio`.
///
/// ## Example
///
/// ```rust
/// use shaper::ThroughputEstimator;
///
/// let mut estimator = ThroughputEstimator::new(1.0, 0.3).unwrap();
/// estimator.record(400.0);
/// estimator.record(400.0);
/// estimator.record(400.0);
///
/// // 1200 bytes in a 1s window, scaled by 0.3.
/// let target = estimator.recompute().unwrap();
/// assert!((target - 360.0).abs() < 1.0);
/// ```
#[derive(Debug)]
pub struct ThroughputEstimator {
    /// Sliding window length, seconds. Also the divisor for the rate.
    window_seconds: f64,
    /// Window length in nanoseconds, for pruning.
    window_ns: u64,
    /// Fraction of the measured rate to propose as the target.
    limit_ratio: f64,
    /// Samples within the window, oldest first.
    history: VecDeque<Sample>,
    /// Last proposed target, unset until the first measurement lands.
    current_target: Option<f64>,
    total_samples: u64,
    total_retargets: u64,
}

impl ThroughputEstimator {
    /// Creates an estimator with the given window and ratio.
    ///
    /// # Errors
    ///
    /// [`ShaperError::InvalidConfig`] if either parameter is zero,
    /// negative, NaN, or infinite.
    pub fn new(window_seconds: f64, limit_ratio: f64) -> Result<Self> {
        if !window_seconds.is_finite() || window_seconds <= 0.0 {
            return Err(ShaperError::InvalidConfig(
                "window_seconds must be positive and finite",
            ));
        }
        if !limit_ratio.is_finite() || limit_ratio <= 0.0 {
            return Err(ShaperError::InvalidConfig(
                "limit_ratio must be positive and finite",
            ));
        }

        Ok(Self {
            window_seconds,
            window_ns: (window_seconds * NANOS_PER_SEC) as u64,
            limit_ratio,
            history: VecDeque::new(),
            current_target: None,
            total_samples: 0,
            total_retargets: 0,
        })
    }

    /// Creates an estimator from a validated [`AdaptiveConfig`].
    ///
    /// # Errors
    ///
    /// [`ShaperError::InvalidConfig`] if the configuration fails
    /// [`AdaptiveConfig::validate`].
    pub fn from_config(config: &AdaptiveConfig) -> Result<Self> {
        config.validate()?;
        Self::new(config.window_seconds, config.limit_ratio)
    }

    /// Records one outbound send of `byte_count` bytes at the current
    /// time.
    ///
    /// Expected to be called once per datagram, *before* the bucket
    /// delays it. Non-finite or negative counts are ignored.
    pub fn record(&mut self, byte_count: f64) {
        if !byte_count.is_finite() || byte_count < 0.0 {
            return;
        }
        let now_ns = current_time_ns();
        self.prune(now_ns);
        self.history.push_back(Sample {
            at_ns: now_ns,
            bytes: byte_count,
        });
        self.total_samples += 1;
    }

    /// Re-derives the measured rate and decides whether the bucket
    /// should be retargeted.
    ///
    /// Returns `Some(candidate_rate)` when a retarget is warranted:
    /// either no target has been set yet, or the candidate differs from
    /// the current target by more than [`RETARGET_HYSTERESIS`]. The
    /// returned candidate has already been adopted as the new current
    /// target; the caller's only job is to apply it to the bucket.
    ///
    /// Returns `None` when the window is empty (the previous target, if
    /// any, stays in force) or the change is within the hysteresis
    /// band.
    pub fn recompute(&mut self) -> Option<f64> {
        let now_ns = current_time_ns();
        self.prune(now_ns);

        let windowed_bytes: f64 = self.history.iter().map(|s| s.bytes).sum();
        let measured = windowed_bytes / self.window_seconds;
        if measured <= 0.0 {
            return None;
        }

        let candidate = measured * self.limit_ratio;
        let triggered = match self.current_target {
            None => true,
            Some(current) => (candidate - current).abs() / current > RETARGET_HYSTERESIS,
        };
        if !triggered {
            return None;
        }

        self.current_target = Some(candidate);
        self.total_retargets += 1;
        debug!(
            measured_rate = measured,
            candidate, "throughput target updated"
        );
        Some(candidate)
    }

    /// Throughput measured over the current window, bytes per second.
    ///
    /// Unlike [`recompute`](Self::recompute) this neither prunes nor
    /// changes the target; stale samples are simply skipped.
    pub fn measured_rate(&self) -> f64 {
        let now_ns = current_time_ns();
        let cutoff = now_ns.saturating_sub(self.window_ns);
        let windowed_bytes: f64 = self
            .history
            .iter()
            .filter(|s| s.at_ns >= cutoff)
            .map(|s| s.bytes)
            .sum();
        windowed_bytes / self.window_seconds
    }

    /// The target currently in force, if a measurement has landed.
    pub fn target_rate(&self) -> Option<f64> {
        self.current_target
    }

    /// Number of samples currently inside the window.
    pub fn sample_count(&self) -> usize {
        self.history.len()
    }

    /// The configured window length in seconds.
    pub fn window_seconds(&self) -> f64 {
        self.window_seconds
    }

    /// The configured fraction of measured throughput to target.
    pub fn limit_ratio(&self) -> f64 {
        self.limit_ratio
    }

    /// How many times [`recompute`](Self::recompute) proposed a new
    /// target.
    pub fn total_retargets(&self) -> u64 {
        self.total_retargets
    }

    /// Drops all samples and forgets the current target, returning the
    /// estimator to its cold state.
    pub fn reset(&mut self) {
        self.history.clear();
        self.current_target = None;
    }

    /// Drops samples older than the window.
    fn prune(&mut self, now_ns: u64) {
        let cutoff = now_ns.saturating_sub(self.window_ns);
        while let Some(front) = self.history.front() {
            if front.at_ns >= cutoff {
                break;
            }
            self.history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_invalid_construction() {
        assert!(ThroughputEstimator::new(0.0, 0.3).is_err());
        assert!(ThroughputEstimator::new(-1.0, 0.3).is_err());
        assert!(ThroughputEstimator::new(f64::NAN, 0.3).is_err());
        assert!(ThroughputEstimator::new(1.0, 0.0).is_err());
        assert!(ThroughputEstimator::new(1.0, -0.3).is_err());
        assert!(ThroughputEstimator::new(1.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_measured_rate_and_candidate() {
        let mut estimator = ThroughputEstimator::new(1.0, 0.3).unwrap();
        estimator.record(400.0);
        estimator.record(400.0);
        estimator.record(400.0);

        let measured = estimator.measured_rate();
        assert!(
            (measured - 1200.0).abs() < 1.0,
            "expected ~1200 B/s, got {measured}"
        );

        let target = estimator.recompute().expect("first measurement retargets");
        assert!(
            (target - 360.0).abs() < 1.0,
            "expected ~360 B/s candidate, got {target}"
        );
        assert_eq!(estimator.target_rate(), Some(target));
    }

    #[test]
    fn test_first_measurement_always_retargets() {
        let mut estimator = ThroughputEstimator::new(1.0, 1.0).unwrap();
        assert_eq!(estimator.target_rate(), None);

        estimator.record(100.0);
        let target = estimator.recompute().unwrap();
        assert!((target - 100.0).abs() < 0.5);
        assert_eq!(estimator.total_retargets(), 1);
    }

    #[test]
    fn test_hysteresis_band() {
        let mut estimator = ThroughputEstimator::new(1.0, 1.0).unwrap();

        // Establish a 1000 B/s target.
        estimator.record(1000.0);
        let target = estimator.recompute().unwrap();
        assert!((target - 1000.0).abs() < 1.0);

        // +5%: inside the band, no retarget, old target stays.
        estimator.record(50.0);
        assert_eq!(estimator.recompute(), None);
        let current = estimator.target_rate().unwrap();
        assert!((current - 1000.0).abs() < 1.0);

        // +20% cumulative: outside the band, retarget fires.
        estimator.record(150.0);
        let target = estimator.recompute().expect("20% change must retarget");
        assert!((target - 1200.0).abs() < 1.0);
        assert_eq!(estimator.total_retargets(), 2);
    }

    #[test]
    fn test_empty_window_retains_target() {
        // 50ms window so it drains quickly.
        let mut estimator = ThroughputEstimator::new(0.05, 0.5).unwrap();
        assert_eq!(estimator.recompute(), None);

        estimator.record(500.0);
        let target = estimator.recompute().unwrap();

        thread::sleep(Duration::from_millis(80));

        // Window empty now: no proposal, previous target still set.
        assert_eq!(estimator.recompute(), None);
        assert_eq!(estimator.target_rate(), Some(target));
        assert_eq!(estimator.sample_count(), 0);
    }

    #[test]
    fn test_pruning() {
        let mut estimator = ThroughputEstimator::new(0.05, 1.0).unwrap();
        estimator.record(400.0);
        estimator.record(400.0);
        estimator.record(400.0);
        assert_eq!(estimator.sample_count(), 3);

        thread::sleep(Duration::from_millis(80));
        estimator.record(100.0);

        assert_eq!(estimator.sample_count(), 1);
        let measured = estimator.measured_rate();
        assert!(
            (measured - 2000.0).abs() < 50.0,
            "expected ~2000 B/s (100 bytes / 0.05s), got {measured}"
        );
    }

    #[test]
    fn test_ratio_scales_candidate() {
        let mut estimator = ThroughputEstimator::new(2.0, 0.5).unwrap();
        estimator.record(1000.0);

        // 1000 bytes over a 2s window: measured 500, candidate 250.
        let target = estimator.recompute().unwrap();
        assert!((target - 250.0).abs() < 1.0);
    }

    #[test]
    fn test_invalid_samples_ignored() {
        let mut estimator = ThroughputEstimator::new(1.0, 1.0).unwrap();
        estimator.record(-100.0);
        estimator.record(f64::NAN);
        estimator.record(f64::INFINITY);

        assert_eq!(estimator.sample_count(), 0);
        assert_eq!(estimator.recompute(), None);
    }

    #[test]
    fn test_reset() {
        let mut estimator = ThroughputEstimator::new(1.0, 0.5).unwrap();
        estimator.record(800.0);
        estimator.recompute().unwrap();

        estimator.reset();
        assert_eq!(estimator.sample_count(), 0);
        assert_eq!(estimator.target_rate(), None);

        // Cold again: the next measurement retargets unconditionally.
        estimator.record(100.0);
        assert!(estimator.recompute().is_some());
    }

    #[test]
    fn test_from_config() {
        let config = AdaptiveConfig::ratio(0.3).with_window_seconds(2.0);
        let estimator = ThroughputEstimator::from_config(&config).unwrap();
        assert_eq!(estimator.window_seconds(), 2.0);
        assert_eq!(estimator.limit_ratio(), 0.3);

        let bad = AdaptiveConfig::ratio(0.0);
        assert!(ThroughputEstimator::from_config(&bad).is_err());
    }
}
