//! # Bucket Metrics and Health Analysis
//!
//! Point-in-time snapshots of a bucket's counters plus derived views
//! for dashboards and alerting: how often senders are throttled, how
//! long they wait, how much of the burst budget is in use.
//!
//! ## Metrics Overview
//!
//! ```text
//!     Shaping Dashboard:
//!     ┌─────────────────────────────────────┐
//!     │  Throttle Rate: 15%                 │
//!     │  ▓▓▓░░░░░░░░░░░░░░░░░  (15/100)     │
//!     │                                     │
//!     │  Budget Used: 70%                   │
//!     │  ▓▓▓▓▓▓▓▓▓▓▓▓▓▓░░░░░░  (70/100)     │
//!     │                                     │
//!     │  Health: ✅ Healthy                 │
//!     │  Avg Wait: 2.1ms                    │
//!     │  Max Wait: 14.8ms                   │
//!     └─────────────────────────────────────┘
//! ```

use std::fmt;

/// Snapshot of a token bucket's activity and current budget.
///
/// All counters are cumulative since construction (or the last
/// `reset`); the token fields reflect the moment the snapshot was
/// taken, after a refill.
///
/// ## Reading the numbers
///
/// - **total_waits** counts blocking grants: the send went through,
///   but only after sleeping. A rising wait rate means senders offer
///   more than the shaped rate.
/// - **total_denials** counts `try_consume` probes that found an
///   insufficient budget.
/// - **consecutive_throttled** is the current streak of throttled
///   requests without an instant grant; it resets to zero whenever a
///   request is granted without waiting.
///
/// ## Example
///
/// ```rust
/// use shaper::TokenBucket;
///
/// let bucket = TokenBucket::new(128.0 * 1024.0, 1.0).unwrap();
/// bucket.consume(4096.0).unwrap();
///
/// let metrics = bucket.metrics();
/// if metrics.is_under_pressure() {
///     println!("⚠️ senders are outrunning the shaped rate");
/// }
/// println!("{}", metrics.summary());
/// ```
#[derive(Debug, Clone)]
pub struct BucketMetrics {
    /// Bytes granted through the bucket since startup.
    pub total_consumed_bytes: u64,

    /// Consume requests seen (granted, waited, or denied).
    pub total_requests: u64,

    /// Requests that blocked at least once before being granted.
    pub total_waits: u64,

    /// Non-blocking probes that found an insufficient budget.
    pub total_denials: u64,

    /// Rate changes applied via `retarget`.
    pub total_retargets: u64,

    /// Blocking waits abandoned because their deadline elapsed.
    pub total_cancellations: u64,

    /// Token balance at snapshot time, in bytes.
    pub current_tokens: f64,

    /// Burst capacity, in bytes.
    pub capacity: f64,

    /// Sustained rate the bucket refills at, in bytes per second.
    pub rate_bytes_per_sec: f64,

    /// Current streak of throttled requests. Values above 10 indicate
    /// sustained pressure.
    pub consecutive_throttled: u32,

    /// Longest single wait observed, in nanoseconds.
    pub max_wait_ns: u64,

    /// Total time spent blocked across all waits, in nanoseconds.
    pub total_wait_ns: u64,
}

impl BucketMetrics {
    /// Fraction of requests that were throttled, either by blocking or
    /// by a denied probe (0.0 to 1.0).
    ///
    /// # Example
    ///
    /// ```rust
    /// use shaper::TokenBucket;
    ///
    /// let bucket = TokenBucket::new(1024.0 * 1024.0, 1.0).unwrap();
    /// let metrics = bucket.metrics();
    /// if metrics.throttle_rate() > 0.2 {
    ///     println!("Warning: heavy throttling!");
    /// }
    /// ```
    #[inline]
    pub fn throttle_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.total_waits + self.total_denials) as f64 / self.total_requests as f64
        }
    }

    /// Fraction of requests that blocked before being granted
    /// (0.0 to 1.0). Unlike [`throttle_rate`](Self::throttle_rate)
    /// this excludes denied probes.
    #[inline]
    pub fn wait_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_waits as f64 / self.total_requests as f64
        }
    }

    /// How much of the burst budget is spent right now:
    /// 0.0 means a full bucket, 1.0 an empty one.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shaper::TokenBucket;
    ///
    /// let bucket = TokenBucket::new(1024.0, 1.0).unwrap();
    /// let metrics = bucket.metrics();
    /// if metrics.utilization() > 0.9 {
    ///     println!("Burst budget nearly exhausted!");
    /// }
    /// ```
    #[inline]
    pub fn utilization(&self) -> f64 {
        if self.capacity <= 0.0 {
            0.0
        } else {
            1.0 - (self.current_tokens / self.capacity)
        }
    }

    /// Remaining budget as a percentage of capacity: 100 means a full
    /// bucket, 0 an empty one.
    #[inline]
    pub fn availability_percentage(&self) -> f64 {
        if self.capacity <= 0.0 {
            0.0
        } else {
            (self.current_tokens / self.capacity) * 100.0
        }
    }

    /// Mean blocking time per waited request, in milliseconds. Zero
    /// when nothing has waited yet.
    #[inline]
    pub fn avg_wait_ms(&self) -> f64 {
        if self.total_waits == 0 {
            0.0
        } else {
            self.total_wait_ns as f64 / self.total_waits as f64 / 1_000_000.0
        }
    }

    /// Longest single wait, in microseconds.
    #[inline]
    pub fn max_wait_us(&self) -> f64 {
        self.max_wait_ns as f64 / 1000.0
    }

    /// Longest single wait, in milliseconds.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shaper::TokenBucket;
    ///
    /// let bucket = TokenBucket::new(1024.0 * 1024.0, 1.0).unwrap();
    /// let metrics = bucket.metrics();
    /// if metrics.max_wait_ms() > 100.0 {
    ///     println!("Long stall observed: {:.2}ms", metrics.max_wait_ms());
    /// }
    /// ```
    #[inline]
    pub fn max_wait_ms(&self) -> f64 {
        self.max_wait_ns as f64 / 1_000_000.0
    }

    /// Whether the bucket is under immediate pressure: more than half
    /// of requests throttled, or the budget effectively empty.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shaper::TokenBucket;
    ///
    /// let bucket = TokenBucket::new(1024.0 * 1024.0, 1.0).unwrap();
    /// let metrics = bucket.metrics();
    /// if metrics.is_under_pressure() {
    ///     // Consider pacing senders before they hit the bucket.
    /// }
    /// ```
    #[inline]
    pub fn is_under_pressure(&self) -> bool {
        self.throttle_rate() > 0.5 || self.current_tokens < 1.0
    }

    /// Whether demand has exceeded the shaped rate for a while: a long
    /// throttle streak, or more than 30% of all requests throttled.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shaper::TokenBucket;
    ///
    /// let bucket = TokenBucket::new(1024.0 * 1024.0, 1.0).unwrap();
    /// let metrics = bucket.metrics();
    /// if metrics.is_under_sustained_pressure() {
    ///     println!("Offered load persistently exceeds the configured rate");
    /// }
    /// ```
    #[inline]
    pub fn is_under_sustained_pressure(&self) -> bool {
        self.consecutive_throttled > 10 || self.throttle_rate() > 0.3
    }

    /// Three-level health assessment.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shaper::{HealthStatus, TokenBucket};
    ///
    /// let bucket = TokenBucket::new(1024.0 * 1024.0, 1.0).unwrap();
    /// match bucket.metrics().health_status() {
    ///     HealthStatus::Healthy => println!("✅ All good"),
    ///     HealthStatus::Degraded => println!("⚠️ Monitor closely"),
    ///     HealthStatus::Critical => println!("🔴 Take action!"),
    /// }
    /// ```
    pub fn health_status(&self) -> HealthStatus {
        if self.is_under_sustained_pressure() {
            HealthStatus::Critical
        } else if self.is_under_pressure() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Human-readable multi-line report, suitable for logs.
    ///
    /// # Example Output
    ///
    /// ```text
    /// TokenBucket Metrics:
    /// ├─ Traffic:
    /// │  ├─ Consumed: 1048576 bytes over 256 requests
    /// │  ├─ Throttle Rate: 12.50%
    /// │  ├─ Avg Wait: 2.150ms
    /// │  └─ Max Wait: 14.800ms
    /// ├─ Budget:
    /// │  ├─ Tokens: 96256/131072 bytes
    /// │  ├─ Rate: 131072 B/s
    /// │  └─ Availability: 73.44%
    /// └─ Health:
    ///    ├─ Status: Healthy
    ///    └─ Under Pressure: false
    /// ```
    pub fn summary(&self) -> String {
        format!(
            "TokenBucket Metrics:\n\
             ├─ Traffic:\n\
             │  ├─ Consumed: {} bytes over {} requests\n\
             │  ├─ Throttle Rate: {:.2}%\n\
             │  ├─ Avg Wait: {:.3}ms\n\
             │  └─ Max Wait: {:.3}ms\n\
             ├─ Budget:\n\
             │  ├─ Tokens: {:.0}/{:.0} bytes\n\
             │  ├─ Rate: {:.0} B/s\n\
             │  └─ Availability: {:.2}%\n\
             ├─ Counters:\n\
             │  ├─ Waits: {}\n\
             │  ├─ Denials: {}\n\
             │  ├─ Retargets: {}\n\
             │  ├─ Cancellations: {}\n\
             │  └─ Throttle Streak: {}\n\
             └─ Health:\n\
                ├─ Status: {:?}\n\
                ├─ Under Pressure: {}\n\
                └─ Under Sustained Pressure: {}",
            self.total_consumed_bytes,
            self.total_requests,
            self.throttle_rate() * 100.0,
            self.avg_wait_ms(),
            self.max_wait_ms(),
            self.current_tokens,
            self.capacity,
            self.rate_bytes_per_sec,
            self.availability_percentage(),
            self.total_waits,
            self.total_denials,
            self.total_retargets,
            self.total_cancellations,
            self.consecutive_throttled,
            self.health_status(),
            self.is_under_pressure(),
            self.is_under_sustained_pressure()
        )
    }
}

impl fmt::Display for BucketMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

/// Health status of a shaped link.
///
/// ## Status Levels
///
/// ```text
///     Healthy ──────► Senders fit within the shaped rate
///        │
///     Degraded ─────► Budget exhausted, senders are waiting
///        │
///     Critical ─────► Demand persistently exceeds the rate
/// ```
///
/// ## Example
///
/// ```rust
/// use tracing::{error, warn};
/// use shaper::{HealthStatus, TokenBucket};
///
/// let bucket = TokenBucket::new(128.0 * 1024.0, 1.0).unwrap();
/// // ... heavy traffic ...
///
/// let health = bucket.metrics().health_status();
/// match health {
///     HealthStatus::Healthy => {
///         // Normal operation
///     }
///     HealthStatus::Degraded => {
///         warn!("shaping degraded: {}", health.suggested_action());
///     }
///     HealthStatus::Critical => {
///         error!("shaping critical: {}", health.suggested_action());
///     }
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Traffic fits within the shaped rate with budget to spare.
    Healthy,

    /// The budget is exhausted or most requests are throttled; the
    /// link recovers if offered load drops.
    Degraded,

    /// Sustained overload: a long throttle streak or a high overall
    /// throttle rate. The configured rate no longer matches demand.
    Critical,
}

impl HealthStatus {
    /// `true` for any status other than [`Healthy`](Self::Healthy).
    ///
    /// # Example
    ///
    /// ```rust
    /// use shaper::TokenBucket;
    ///
    /// let bucket = TokenBucket::new(1024.0 * 1024.0, 1.0).unwrap();
    /// let health = bucket.metrics().health_status();
    /// assert!(!health.is_unhealthy());
    /// ```
    pub fn is_unhealthy(&self) -> bool {
        !matches!(self, Self::Healthy)
    }

    /// Operator guidance for this status.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shaper::TokenBucket;
    ///
    /// let bucket = TokenBucket::new(1024.0 * 1024.0, 1.0).unwrap();
    /// let health = bucket.metrics().health_status();
    /// println!("Recommendation: {}", health.suggested_action());
    /// ```
    pub fn suggested_action(&self) -> &'static str {
        match self {
            Self::Healthy => "No action needed",
            Self::Degraded => "Monitor closely, consider raising the configured rate",
            Self::Critical => "Immediate action required: raise the rate or reduce offered load",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "✅ Healthy"),
            Self::Degraded => write!(f, "⚠️ Degraded"),
            Self::Critical => write!(f, "🔴 Critical"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_metrics() -> BucketMetrics {
        BucketMetrics {
            total_consumed_bytes: 80_000,
            total_requests: 100,
            total_waits: 10,
            total_denials: 5,
            total_retargets: 0,
            total_cancellations: 0,
            current_tokens: 24_000.0,
            capacity: 32_000.0,
            consecutive_throttled: 0,
            rate_bytes_per_sec: 32_000.0,
            max_wait_ns: 2_000_000,
            total_wait_ns: 8_000_000,
        }
    }

    #[test]
    fn test_metrics_calculations() {
        let metrics = quiet_metrics();

        assert!((metrics.throttle_rate() - 0.15).abs() < 1e-9);
        assert!((metrics.wait_rate() - 0.10).abs() < 1e-9);
        assert!((metrics.utilization() - 0.25).abs() < 1e-9);
        assert!((metrics.availability_percentage() - 75.0).abs() < 1e-9);
        assert!(!metrics.is_under_pressure());
        assert_eq!(metrics.health_status(), HealthStatus::Healthy);
    }

    #[test]
    fn test_wait_time_views() {
        let metrics = quiet_metrics();

        // 8ms of waiting across 10 waits.
        assert!((metrics.avg_wait_ms() - 0.8).abs() < 1e-9);
        assert_eq!(metrics.max_wait_us(), 2000.0);
        assert_eq!(metrics.max_wait_ms(), 2.0);
    }

    #[test]
    fn test_sustained_pressure_detection() {
        let metrics = BucketMetrics {
            total_consumed_bytes: 10_000,
            total_requests: 100,
            total_waits: 55,
            total_denials: 10,
            total_retargets: 2,
            total_cancellations: 3,
            current_tokens: 0.0,
            capacity: 32_000.0,
            rate_bytes_per_sec: 32_000.0,
            consecutive_throttled: 15,
            max_wait_ns: 120_000_000,
            total_wait_ns: 900_000_000,
        };

        assert!(metrics.is_under_pressure());
        assert!(metrics.is_under_sustained_pressure());
        assert_eq!(metrics.health_status(), HealthStatus::Critical);
    }

    #[test]
    fn test_degraded_without_sustained_pressure() {
        // Empty budget but a low overall throttle rate.
        let metrics = BucketMetrics {
            total_consumed_bytes: 32_000,
            total_requests: 100,
            total_waits: 5,
            total_denials: 0,
            total_retargets: 0,
            total_cancellations: 0,
            current_tokens: 0.2,
            capacity: 32_000.0,
            rate_bytes_per_sec: 32_000.0,
            consecutive_throttled: 2,
            max_wait_ns: 0,
            total_wait_ns: 0,
        };

        assert!(metrics.is_under_pressure());
        assert!(!metrics.is_under_sustained_pressure());
        assert_eq!(metrics.health_status(), HealthStatus::Degraded);
    }

    #[test]
    fn test_edge_cases() {
        let mut metrics = quiet_metrics();
        metrics.total_requests = 0;
        metrics.total_waits = 0;
        metrics.total_denials = 0;

        assert_eq!(metrics.throttle_rate(), 0.0);
        assert_eq!(metrics.avg_wait_ms(), 0.0);

        metrics.capacity = 0.0;
        metrics.current_tokens = 0.0;
        assert_eq!(metrics.utilization(), 0.0);
        assert_eq!(metrics.availability_percentage(), 0.0);
    }

    #[test]
    fn test_health_status_methods() {
        assert!(!HealthStatus::Healthy.is_unhealthy());
        assert!(HealthStatus::Degraded.is_unhealthy());
        assert!(HealthStatus::Critical.is_unhealthy());

        assert_eq!(HealthStatus::Healthy.suggested_action(), "No action needed");
        assert!(HealthStatus::Degraded.suggested_action().contains("Monitor"));
        assert!(HealthStatus::Critical
            .suggested_action()
            .contains("Immediate"));
    }

    #[test]
    fn test_health_status_display() {
        assert!(format!("{}", HealthStatus::Healthy).contains("Healthy"));
        assert!(format!("{}", HealthStatus::Degraded).contains("Degraded"));
        assert!(format!("{}", HealthStatus::Critical).contains("Critical"));
    }

    #[test]
    fn test_metrics_display() {
        let metrics = quiet_metrics();

        let display = format!("{}", metrics);
        assert!(display.contains("TokenBucket Metrics"));
        assert!(display.contains("Throttle Rate"));

        let summary = metrics.summary();
        assert!(summary.contains("Traffic"));
        assert!(summary.contains("Budget"));
        assert!(summary.contains("Health"));
    }
}
