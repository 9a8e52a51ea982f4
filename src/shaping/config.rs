//! Configuration for the shaping layer.
//!
//! Two small structs cover the two operating modes. [`BucketConfig`]
//! describes a fixed target rate; [`AdaptiveConfig`] describes how the
//! estimator should chase the observed rate instead.
//!
//! ## Static shaping
//!
//! ```text
//!     BucketConfig { rate_kbps: 256, burst_seconds: 2.0 }
//!
//!     ┌──────────────────────────────────┐
//!     │ capacity = 256 KiB/s × 2s        │ ← burst allowance
//!     │ ┌──────────────────────────┐     │
//!     │ │ ░░░░░░░░ 512 KiB ░░░░░░░ │     │ ← bucket, starts full
//!     │ └──────────────────────────┘     │
//!     │ refill: 262 144 bytes/second     │ ← sustained rate
//!     └──────────────────────────────────┘
//! ```
//!
//! ## Adaptive shaping
//!
//! ```text
//!     AdaptiveConfig { limit_ratio: 0.3, window_seconds: 1.0 }
//!
//!     offered load ──► measured rate ──► × 0.3 ──► bucket target
//!                      (1s window)
//! ```
//!
//! Rates use binary kilobytes: `rate_kbps × 1024 = bytes/second`.

use crate::shaping::error::{Result, ShaperError};

/// Bytes per configured kilobyte (binary, KiB).
pub const BYTES_PER_KB: f64 = 1024.0;

/// Configuration for a fixed-rate token bucket.
///
/// Capacity is derived, never set directly: `rate × burst_seconds`
/// bytes. A longer burst window lets idle connections catch up faster;
/// the sustained ceiling stays at `rate_kbps`.
///
/// ## Examples
///
/// ```rust
/// use shaper::BucketConfig;
///
/// // 512 KiB/s with the default one-second burst window
/// let config = BucketConfig::kbps(512.0);
/// assert_eq!(config.capacity_bytes(), 512.0 * 1024.0);
///
/// // 2 MiB/s that may burst three seconds worth after idling
/// let config = BucketConfig::mbps(2.0).with_burst_seconds(3.0);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketConfig {
    /// Sustained rate in binary kilobytes per second (KiB/s).
    pub rate_kbps: f64,

    /// Burst window in seconds. Bucket capacity is
    /// `rate × burst_seconds` bytes. Default 1.0.
    pub burst_seconds: f64,
}

impl Default for BucketConfig {
    /// 256 KiB/s with a one-second burst window.
    fn default() -> Self {
        Self {
            rate_kbps: 256.0,
            burst_seconds: 1.0,
        }
    }
}

impl BucketConfig {
    /// Creates a configuration with an explicit rate and burst window.
    pub fn new(rate_kbps: f64, burst_seconds: f64) -> Self {
        Self {
            rate_kbps,
            burst_seconds,
        }
    }

    /// Rate in KiB/s with the default one-second burst window.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shaper::BucketConfig;
    ///
    /// let config = BucketConfig::kbps(128.0);
    /// assert_eq!(config.rate_bytes_per_sec(), 131_072.0);
    /// ```
    pub fn kbps(rate_kbps: f64) -> Self {
        Self {
            rate_kbps,
            burst_seconds: 1.0,
        }
    }

    /// Rate in MiB/s with the default one-second burst window.
    pub fn mbps(rate_mbps: f64) -> Self {
        Self {
            rate_kbps: rate_mbps * 1024.0,
            burst_seconds: 1.0,
        }
    }

    /// Sets the burst window.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shaper::BucketConfig;
    ///
    /// let config = BucketConfig::kbps(100.0).with_burst_seconds(5.0);
    /// assert_eq!(config.capacity_bytes(), 100.0 * 1024.0 * 5.0);
    /// ```
    pub fn with_burst_seconds(mut self, burst_seconds: f64) -> Self {
        self.burst_seconds = burst_seconds;
        self
    }

    /// The configured rate in bytes per second.
    pub fn rate_bytes_per_sec(&self) -> f64 {
        self.rate_kbps * BYTES_PER_KB
    }

    /// The derived bucket capacity in bytes.
    pub fn capacity_bytes(&self) -> f64 {
        self.rate_bytes_per_sec() * self.burst_seconds
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ShaperError::InvalidConfig`] if `rate_kbps` or
    /// `burst_seconds` is zero, negative, NaN, or infinite.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shaper::BucketConfig;
    ///
    /// assert!(BucketConfig::kbps(0.0).validate().is_err());
    /// assert!(BucketConfig::kbps(64.0).validate().is_ok());
    /// ```
    pub fn validate(&self) -> Result<()> {
        if !self.rate_kbps.is_finite() || self.rate_kbps <= 0.0 {
            return Err(ShaperError::InvalidConfig(
                "rate_kbps must be positive and finite",
            ));
        }
        if !self.burst_seconds.is_finite() || self.burst_seconds <= 0.0 {
            return Err(ShaperError::InvalidConfig(
                "burst_seconds must be positive and finite",
            ));
        }
        Ok(())
    }
}

/// Configuration for the adaptive estimator.
///
/// Instead of a fixed rate, the limiter measures throughput over a
/// sliding window and targets `limit_ratio` of what it saw. A ratio of
/// 0.3 means "use at most 30% of the observed rate".
///
/// ## Examples
///
/// ```rust
/// use shaper::AdaptiveConfig;
///
/// let config = AdaptiveConfig::ratio(0.3);
/// assert_eq!(config.window_seconds, 1.0);
///
/// let config = AdaptiveConfig::ratio(0.5).with_window_seconds(2.0);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveConfig {
    /// Fraction of the measured throughput to target. May exceed 1.0
    /// (shape above the observed rate) but must be positive.
    pub limit_ratio: f64,

    /// Sliding measurement window in seconds. Default 1.0.
    pub window_seconds: f64,
}

impl Default for AdaptiveConfig {
    /// Target half the observed throughput over a one-second window.
    fn default() -> Self {
        Self {
            limit_ratio: 0.5,
            window_seconds: 1.0,
        }
    }
}

impl AdaptiveConfig {
    /// Creates a configuration with an explicit ratio and window.
    pub fn new(limit_ratio: f64, window_seconds: f64) -> Self {
        Self {
            limit_ratio,
            window_seconds,
        }
    }

    /// Ratio with the default one-second window.
    pub fn ratio(limit_ratio: f64) -> Self {
        Self {
            limit_ratio,
            window_seconds: 1.0,
        }
    }

    /// Sets the measurement window.
    pub fn with_window_seconds(mut self, window_seconds: f64) -> Self {
        self.window_seconds = window_seconds;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ShaperError::InvalidConfig`] if `limit_ratio` or
    /// `window_seconds` is zero, negative, NaN, or infinite.
    pub fn validate(&self) -> Result<()> {
        if !self.limit_ratio.is_finite() || self.limit_ratio <= 0.0 {
            return Err(ShaperError::InvalidConfig(
                "limit_ratio must be positive and finite",
            ));
        }
        if !self.window_seconds.is_finite() || self.window_seconds <= 0.0 {
            return Err(ShaperError::InvalidConfig(
                "window_seconds must be positive and finite",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_config_validation() {
        assert!(BucketConfig::default().validate().is_ok());
        assert!(BucketConfig::kbps(512.0).validate().is_ok());

        assert!(BucketConfig::kbps(0.0).validate().is_err());
        assert!(BucketConfig::kbps(-1.0).validate().is_err());
        assert!(BucketConfig::kbps(f64::NAN).validate().is_err());
        assert!(BucketConfig::kbps(f64::INFINITY).validate().is_err());

        assert!(BucketConfig::kbps(64.0)
            .with_burst_seconds(0.0)
            .validate()
            .is_err());
        assert!(BucketConfig::kbps(64.0)
            .with_burst_seconds(f64::NAN)
            .validate()
            .is_err());
    }

    #[test]
    fn test_rate_conversion() {
        let config = BucketConfig::kbps(1.0);
        assert_eq!(config.rate_bytes_per_sec(), 1024.0);

        let config = BucketConfig::mbps(1.0);
        assert_eq!(config.rate_kbps, 1024.0);
        assert_eq!(config.rate_bytes_per_sec(), 1024.0 * 1024.0);
    }

    #[test]
    fn test_capacity_derivation() {
        let config = BucketConfig::kbps(100.0).with_burst_seconds(2.0);
        assert_eq!(config.capacity_bytes(), 100.0 * 1024.0 * 2.0);

        // Default burst window is one second: capacity equals the rate.
        let config = BucketConfig::kbps(100.0);
        assert_eq!(config.capacity_bytes(), config.rate_bytes_per_sec());
    }

    #[test]
    fn test_adaptive_config_validation() {
        assert!(AdaptiveConfig::default().validate().is_ok());
        assert!(AdaptiveConfig::ratio(0.3).validate().is_ok());

        // Shaping above the measured rate is allowed.
        assert!(AdaptiveConfig::ratio(1.5).validate().is_ok());

        assert!(AdaptiveConfig::ratio(0.0).validate().is_err());
        assert!(AdaptiveConfig::ratio(-0.3).validate().is_err());
        assert!(AdaptiveConfig::ratio(f64::NAN).validate().is_err());
        assert!(AdaptiveConfig::ratio(0.3)
            .with_window_seconds(-1.0)
            .validate()
            .is_err());
        assert!(AdaptiveConfig::ratio(0.3)
            .with_window_seconds(f64::INFINITY)
            .validate()
            .is_err());
    }

    #[test]
    fn test_defaults() {
        let bucket = BucketConfig::default();
        assert_eq!(bucket.rate_kbps, 256.0);
        assert_eq!(bucket.burst_seconds, 1.0);

        let adaptive = AdaptiveConfig::default();
        assert_eq!(adaptive.limit_ratio, 0.5);
        assert_eq!(adaptive.window_seconds, 1.0);
    }

    #[test]
    fn test_builder_chaining() {
        let config = BucketConfig::new(64.0, 0.5).with_burst_seconds(4.0);
        assert_eq!(config.rate_kbps, 64.0);
        assert_eq!(config.burst_seconds, 4.0);

        let config = AdaptiveConfig::new(0.8, 3.0).with_window_seconds(0.25);
        assert_eq!(config.limit_ratio, 0.8);
        assert_eq!(config.window_seconds, 0.25);
    }
}
