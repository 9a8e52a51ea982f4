//! Timing utilities shared by the shaping components.
//!
//! Token accounting needs a clock that is cheap, monotonic, and
//! expressible as a plain integer so timestamps can live in atomics and
//! in the bucket state without dragging [`Instant`] values around. The
//! helpers here anchor one wall-clock reading taken at first use to a
//! monotonic [`Instant`], then report elapsed time on top of that base.
//! Values are comparable within the process and roughly epoch-aligned,
//! which keeps log output readable.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

// Monotonic time base: the Instant captured at first use paired with the
// wall-clock epoch milliseconds at that same moment. Advancing from the
// Instant keeps readings immune to system clock jumps.
static TIME_BASE: OnceLock<(Instant, u64)> = OnceLock::new();

fn time_base() -> &'static (Instant, u64) {
    TIME_BASE.get_or_init(|| {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        (Instant::now(), epoch_ms)
    })
}

/// Returns the current time in milliseconds since the UNIX epoch.
///
/// Monotonic for the lifetime of the process. Used for access tracking
/// and idle detection, where millisecond precision is plenty.
///
/// # Example
///
/// ```rust
/// use shaper::current_time_ms;
///
/// let a = current_time_ms();
/// let b = current_time_ms();
/// assert!(b >= a);
/// ```
#[inline(always)]
pub fn current_time_ms() -> u64 {
    let (start, base_ms) = time_base();
    base_ms.saturating_add(start.elapsed().as_millis() as u64)
}

/// Returns the current time in microseconds since the UNIX epoch.
///
/// Higher precision timing for performance measurements.
#[inline(always)]
pub fn current_time_us() -> u64 {
    let (start, base_ms) = time_base();
    base_ms
        .saturating_mul(1000)
        .saturating_add(start.elapsed().as_micros() as u64)
}

/// Returns the current time in nanoseconds since the UNIX epoch.
///
/// This is the resolution refill accounting runs at: elapsed seconds
/// multiply a bytes-per-second rate, and at high rates millisecond
/// granularity would round whole refill periods down to zero.
///
/// # Example
///
/// ```rust
/// use shaper::current_time_ns;
///
/// let start = current_time_ns();
/// // ... some fast operation ...
/// let elapsed = current_time_ns() - start;
/// assert!(elapsed < 1_000_000_000);
/// ```
#[inline(always)]
pub fn current_time_ns() -> u64 {
    let (start, base_ms) = time_base();
    base_ms
        .saturating_mul(1_000_000)
        .saturating_add(start.elapsed().as_nanos() as u64)
}
