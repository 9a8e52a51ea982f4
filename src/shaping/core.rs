//! # Token Bucket Core
//!
//! The heart of the shaping layer: a token bucket that accumulates
//! sending permission over time and blocks callers until enough has
//! accumulated for the payload they want to transmit.
//!
//! ## The Token Bucket Algorithm
//!
//! ```text
//!     Tokens are bytes of sending permission:
//!
//!     Idle bucket (t=0):
//!     ┌────────────────────┐
//!     │ ░░░░░░░░░░░░░░░░░░ │ 4096/4096 bytes
//!     └────────────────────┘
//!
//!     After sending 3 KiB (t=0.01):
//!     ┌────────────────────┐
//!     │ ░░░░░              │ 1024/4096 bytes
//!     └────────────────────┘
//!
//!     Refilled at rate × elapsed (t=0.5, rate 4096 B/s):
//!     ┌────────────────────┐
//!     │ ░░░░░░░░░░░░░      │ 3072/4096 bytes
//!     └────────────────────┘
//! ```
//!
//! ## Blocking Design
//!
//! Unlike admission-control limiters that reject excess requests, a
//! shaper *delays* them: [`TokenBucket::consume`] sleeps until the
//! requested bytes can be debited, so backpressure lands at the call
//! site and nothing queues internally.
//!
//! ```text
//!     consume(amount) flow:
//!
//!     lock ──► refill from elapsed ──► enough tokens?
//!                                       │         │
//!                                      yes        no
//!                                       │         │
//!                                       ▼         ▼
//!                                    debit,    compute wait,
//!                                    return    unlock, sleep,
//!                                              retry
//! ```
//!
//! The lock scopes only the refill/debit arithmetic. It is **never**
//! held across a sleep, so concurrent senders interleave freely and
//! aggregate throughput converges on the configured rate.

use super::{
    config::BucketConfig,
    error::{Result, ShaperError},
    metrics::BucketMetrics,
    utils::{current_time_ms, current_time_ns},
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Minimum interval between last-access timestamp updates (milliseconds).
///
/// Access times only feed idle detection, so 100ms granularity is
/// sufficient and keeps the atomic mostly read-only.
const LAST_ACCESS_UPDATE_INTERVAL_MS: u64 = 100;

/// Mutable bucket accounting, guarded by the bucket's mutex.
struct BucketState {
    /// Replenishment rate in bytes per second. Always positive.
    rate: f64,
    /// Maximum tokens the bucket holds. Always positive.
    capacity: f64,
    /// Available tokens, kept within `[0, capacity]`.
    tokens: f64,
    /// Timestamp of the last refill accounting, monotonic nanoseconds.
    last_refill_ns: u64,
}

impl BucketState {
    /// Credits tokens for the time elapsed since the last refill and
    /// advances the refill timestamp. Tokens cap at `capacity`.
    fn refill(&mut self, now_ns: u64) {
        let elapsed_ns = now_ns.saturating_sub(self.last_refill_ns);
        self.last_refill_ns = now_ns;
        if elapsed_ns > 0 {
            let replenished = elapsed_ns as f64 / NANOS_PER_SEC * self.rate;
            self.tokens = (self.tokens + replenished).min(self.capacity);
        }
    }
}

/// Blocking token bucket over byte amounts.
///
/// Created full, so a freshly configured limiter allows an immediate
/// burst of up to `rate × burst_seconds` bytes before the sustained
/// rate takes over. All-or-nothing semantics per call: `consume` either
/// debits the full amount or keeps waiting.
///
/// ## Thread Safety
///
/// Share it behind an [`Arc`](std::sync::Arc); any number of threads
/// may call [`consume`](Self::consume) concurrently. Callers serialize
/// only for the short refill/debit computation, never for each other's
/// waits.
///
/// ## Example
///
/// ```rust
/// use shaper::TokenBucket;
///
/// // 1 MiB/s sustained, 1 MiB burst capacity.
/// let bucket = TokenBucket::new(1024.0 * 1024.0, 1.0).unwrap();
///
/// // The bucket starts full, so this returns immediately.
/// bucket.consume(4096.0).unwrap();
/// assert!(bucket.available() < 1024.0 * 1024.0);
/// ```
pub struct TokenBucket {
    /// Rate, capacity, tokens, and refill clock. Lock scope is the
    /// refill/debit arithmetic only.
    state: Mutex<BucketState>,

    /// Timestamp of last use in milliseconds, for idle detection.
    last_access_ms: AtomicU64,

    // Pressure tracking. A shaper under pressure is one whose callers
    // keep having to wait (or being denied on the probe path).
    /// Consecutive calls that could not be served immediately.
    consecutive_throttled: AtomicU32,
    /// Longest single wait observed, nanoseconds.
    max_wait_ns: AtomicU64,
    /// Total time spent waiting across all calls, nanoseconds.
    total_wait_ns: AtomicU64,

    // Counters for the metrics snapshot.
    total_consumed_bytes: AtomicU64,
    total_requests: AtomicU64,
    total_waits: AtomicU64,
    total_denials: AtomicU64,
    total_retargets: AtomicU64,
    total_cancellations: AtomicU64,
}

impl TokenBucket {
    /// Creates a bucket with the given rate and burst window.
    ///
    /// Capacity is `rate_bytes_per_sec × burst_seconds` and the bucket
    /// starts full.
    ///
    /// # Errors
    ///
    /// [`ShaperError::InvalidConfig`] if either parameter is zero,
    /// negative, NaN, or infinite.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shaper::TokenBucket;
    ///
    /// // 64 KiB/s, may burst two seconds worth after idling.
    /// let bucket = TokenBucket::new(64.0 * 1024.0, 2.0).unwrap();
    /// assert_eq!(bucket.capacity(), 128.0 * 1024.0);
    /// ```
    pub fn new(rate_bytes_per_sec: f64, burst_seconds: f64) -> Result<Self> {
        if !rate_bytes_per_sec.is_finite() || rate_bytes_per_sec <= 0.0 {
            return Err(ShaperError::InvalidConfig(
                "rate_bytes_per_sec must be positive and finite",
            ));
        }
        if !burst_seconds.is_finite() || burst_seconds <= 0.0 {
            return Err(ShaperError::InvalidConfig(
                "burst_seconds must be positive and finite",
            ));
        }

        let capacity = rate_bytes_per_sec * burst_seconds;
        Ok(Self {
            state: Mutex::new(BucketState {
                rate: rate_bytes_per_sec,
                capacity,
                tokens: capacity,
                last_refill_ns: current_time_ns(),
            }),
            last_access_ms: AtomicU64::new(current_time_ms()),
            consecutive_throttled: AtomicU32::new(0),
            max_wait_ns: AtomicU64::new(0),
            total_wait_ns: AtomicU64::new(0),
            total_consumed_bytes: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
            total_waits: AtomicU64::new(0),
            total_denials: AtomicU64::new(0),
            total_retargets: AtomicU64::new(0),
            total_cancellations: AtomicU64::new(0),
        })
    }

    /// Creates a bucket from a validated [`BucketConfig`].
    ///
    /// # Errors
    ///
    /// [`ShaperError::InvalidConfig`] if the configuration fails
    /// [`BucketConfig::validate`].
    pub fn from_config(config: &BucketConfig) -> Result<Self> {
        config.validate()?;
        Self::new(config.rate_bytes_per_sec(), config.burst_seconds)
    }

    /// Blocks until `amount_bytes` tokens are available, then debits
    /// them. All-or-nothing: partial progress is never committed.
    ///
    /// An amount of `0.0` returns immediately without touching the
    /// bucket. An amount above [`capacity`](Self::capacity) is legal
    /// and is granted whenever the bucket is completely full, draining
    /// it to zero (worst case one full refill cycle of latency).
    ///
    /// The calling thread sleeps between attempts; the internal lock is
    /// released before every sleep, so other senders proceed normally.
    ///
    /// # Errors
    ///
    /// [`ShaperError::InvalidArgument`] if `amount_bytes` is negative,
    /// NaN, or infinite. Nothing is debited on error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shaper::TokenBucket;
    ///
    /// let bucket = TokenBucket::new(1_000_000.0, 1.0).unwrap();
    /// bucket.consume(1500.0).unwrap();
    /// ```
    pub fn consume(&self, amount_bytes: f64) -> Result<()> {
        self.consume_inner(amount_bytes, None)
    }

    /// Like [`consume`](Self::consume), but gives up once `deadline`
    /// passes.
    ///
    /// The deadline is checked between wait intervals and each sleep is
    /// capped at the remaining time, so cancellation lands promptly. A
    /// request that can be served without waiting succeeds even if the
    /// deadline already passed.
    ///
    /// # Errors
    ///
    /// [`ShaperError::Cancelled`] if the deadline elapses while tokens
    /// are still insufficient. No tokens are debited and the bucket
    /// keeps refilling normally. [`ShaperError::InvalidArgument`] as
    /// for `consume`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shaper::TokenBucket;
    /// use std::time::{Duration, Instant};
    ///
    /// let bucket = TokenBucket::new(1_000_000.0, 1.0).unwrap();
    /// let deadline = Instant::now() + Duration::from_millis(50);
    /// bucket.consume_deadline(512.0, deadline).unwrap();
    /// ```
    pub fn consume_deadline(&self, amount_bytes: f64, deadline: Instant) -> Result<()> {
        self.consume_inner(amount_bytes, Some(deadline))
    }

    /// Non-blocking probe: debits `amount_bytes` if the request could
    /// be served without waiting, otherwise leaves the bucket alone.
    ///
    /// Grants exactly when [`consume`](Self::consume) would have
    /// returned without sleeping, including the full-bucket grant for
    /// oversized amounts.
    ///
    /// # Errors
    ///
    /// [`ShaperError::InvalidArgument`] for negative, NaN, or infinite
    /// amounts.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shaper::TokenBucket;
    ///
    /// let bucket = TokenBucket::new(1000.0, 1.0).unwrap();
    /// assert!(bucket.try_consume(800.0).unwrap());
    /// assert!(!bucket.try_consume(800.0).unwrap()); // only ~200 left
    /// ```
    #[inline]
    pub fn try_consume(&self, amount_bytes: f64) -> Result<bool> {
        if !amount_bytes.is_finite() || amount_bytes < 0.0 {
            return Err(ShaperError::InvalidArgument(
                "amount_bytes must be a non-negative finite number",
            ));
        }
        if amount_bytes == 0.0 {
            return Ok(true);
        }

        self.touch();
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let granted = {
            let mut state = self.state.lock();
            state.refill(current_time_ns());
            let needed = amount_bytes.min(state.capacity);
            if state.tokens >= needed {
                state.tokens = (state.tokens - amount_bytes).max(0.0);
                true
            } else {
                false
            }
        };

        if granted {
            self.total_consumed_bytes
                .fetch_add(amount_bytes as u64, Ordering::Relaxed);
            self.consecutive_throttled.store(0, Ordering::Relaxed);
        } else {
            self.total_denials.fetch_add(1, Ordering::Relaxed);
            self.consecutive_throttled.fetch_add(1, Ordering::Relaxed);
        }
        Ok(granted)
    }

    /// Atomically replaces rate and capacity, resetting the bucket to
    /// full.
    ///
    /// Tokens earned under the old rate have no meaning under the new
    /// one, and carrying them over could leave `tokens > capacity` when
    /// capacity shrinks, so the bucket restarts full at the new size.
    /// Waiting consumers pick up the new parameters on their next
    /// attempt.
    ///
    /// # Errors
    ///
    /// [`ShaperError::InvalidConfig`] if either parameter is zero,
    /// negative, NaN, or infinite. The bucket is unchanged on error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shaper::TokenBucket;
    ///
    /// let bucket = TokenBucket::new(1000.0, 1.0).unwrap();
    /// bucket.consume(900.0).unwrap();
    /// bucket.retarget(2000.0, 2000.0).unwrap();
    /// assert_eq!(bucket.available(), 2000.0);
    /// ```
    pub fn retarget(&self, new_rate: f64, new_capacity: f64) -> Result<()> {
        if !new_rate.is_finite() || new_rate <= 0.0 {
            return Err(ShaperError::InvalidConfig(
                "new_rate must be positive and finite",
            ));
        }
        if !new_capacity.is_finite() || new_capacity <= 0.0 {
            return Err(ShaperError::InvalidConfig(
                "new_capacity must be positive and finite",
            ));
        }

        {
            let mut state = self.state.lock();
            state.rate = new_rate;
            state.capacity = new_capacity;
            state.tokens = new_capacity;
            state.last_refill_ns = current_time_ns();
        }
        self.total_retargets.fetch_add(1, Ordering::Relaxed);
        debug!(new_rate, new_capacity, "bucket retargeted");
        Ok(())
    }

    /// Currently available tokens, after crediting elapsed time.
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        state.refill(current_time_ns());
        state.tokens
    }

    /// The bucket's capacity in bytes.
    pub fn capacity(&self) -> f64 {
        self.state.lock().capacity
    }

    /// The bucket's replenishment rate in bytes per second.
    pub fn rate(&self) -> f64 {
        self.state.lock().rate
    }

    /// Estimates how long [`consume`](Self::consume) of `amount_bytes`
    /// would wait right now.
    ///
    /// This is the same computation the consume loop uses for its next
    /// sleep, so it is an estimate of the *first* wait interval, exact
    /// when no other sender debits the bucket in between. Zero for
    /// invalid or immediately satisfiable amounts.
    pub fn wait_hint(&self, amount_bytes: f64) -> Duration {
        if !amount_bytes.is_finite() || amount_bytes <= 0.0 {
            return Duration::ZERO;
        }
        let mut state = self.state.lock();
        state.refill(current_time_ns());
        let needed = amount_bytes.min(state.capacity);
        if state.tokens >= needed {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((needed - state.tokens) / state.rate)
        }
    }

    /// Refills the bucket to capacity and zeroes all counters.
    pub fn reset(&self) {
        {
            let mut state = self.state.lock();
            state.tokens = state.capacity;
            state.last_refill_ns = current_time_ns();
        }
        self.consecutive_throttled.store(0, Ordering::Relaxed);
        self.max_wait_ns.store(0, Ordering::Relaxed);
        self.total_wait_ns.store(0, Ordering::Relaxed);
        self.total_consumed_bytes.store(0, Ordering::Relaxed);
        self.total_requests.store(0, Ordering::Relaxed);
        self.total_waits.store(0, Ordering::Relaxed);
        self.total_denials.store(0, Ordering::Relaxed);
        self.total_retargets.store(0, Ordering::Relaxed);
        self.total_cancellations.store(0, Ordering::Relaxed);
    }

    /// Whether the bucket has gone unused for at least `idle_for`.
    ///
    /// Access times have ~100ms granularity; used by the per-peer
    /// manager to pick eviction candidates.
    pub fn is_idle(&self, idle_for: Duration) -> bool {
        let now_ms = current_time_ms();
        let last = self.last_access_ms.load(Ordering::Relaxed);
        now_ms.saturating_sub(last) >= idle_for.as_millis() as u64
    }

    /// Last-access timestamp in epoch milliseconds, for eviction
    /// ordering.
    pub(crate) fn last_access_ms(&self) -> u64 {
        self.last_access_ms.load(Ordering::Relaxed)
    }

    /// Takes a consistent snapshot of the bucket's counters and state.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shaper::TokenBucket;
    ///
    /// let bucket = TokenBucket::new(1000.0, 1.0).unwrap();
    /// bucket.consume(250.0).unwrap();
    ///
    /// let m = bucket.metrics();
    /// assert_eq!(m.total_consumed_bytes, 250);
    /// assert_eq!(m.total_requests, 1);
    /// ```
    pub fn metrics(&self) -> BucketMetrics {
        let (current_tokens, capacity, rate) = {
            let mut state = self.state.lock();
            state.refill(current_time_ns());
            (state.tokens, state.capacity, state.rate)
        };

        BucketMetrics {
            total_consumed_bytes: self.total_consumed_bytes.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_waits: self.total_waits.load(Ordering::Relaxed),
            total_denials: self.total_denials.load(Ordering::Relaxed),
            total_retargets: self.total_retargets.load(Ordering::Relaxed),
            total_cancellations: self.total_cancellations.load(Ordering::Relaxed),
            current_tokens,
            capacity,
            rate_bytes_per_sec: rate,
            consecutive_throttled: self.consecutive_throttled.load(Ordering::Relaxed),
            max_wait_ns: self.max_wait_ns.load(Ordering::Relaxed),
            total_wait_ns: self.total_wait_ns.load(Ordering::Relaxed),
        }
    }

    /// The shared blocking loop behind `consume` and `consume_deadline`.
    fn consume_inner(&self, amount_bytes: f64, deadline: Option<Instant>) -> Result<()> {
        if !amount_bytes.is_finite() || amount_bytes < 0.0 {
            return Err(ShaperError::InvalidArgument(
                "amount_bytes must be a non-negative finite number",
            ));
        }
        if amount_bytes == 0.0 {
            return Ok(());
        }

        self.touch();
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let started = Instant::now();
        let mut waited = false;
        loop {
            let (wait, oversized) = {
                let mut state = self.state.lock();
                state.refill(current_time_ns());
                // Oversized requests are satisfiable only at a full
                // bucket, which then drains to zero.
                let needed = amount_bytes.min(state.capacity);
                if state.tokens >= needed {
                    state.tokens = (state.tokens - amount_bytes).max(0.0);
                    drop(state);
                    self.record_grant(amount_bytes, waited, started);
                    return Ok(());
                }
                (
                    Duration::from_secs_f64((needed - state.tokens) / state.rate),
                    amount_bytes > state.capacity,
                )
            };
            // Lock released; everything below may sleep.

            if !waited {
                waited = true;
                self.total_waits.fetch_add(1, Ordering::Relaxed);
                self.consecutive_throttled.fetch_add(1, Ordering::Relaxed);
                if oversized {
                    debug!(
                        amount_bytes,
                        "request exceeds bucket capacity, waiting for a full bucket"
                    );
                }
            }

            match deadline {
                Some(by) => {
                    let now = Instant::now();
                    if now >= by {
                        self.total_cancellations.fetch_add(1, Ordering::Relaxed);
                        return Err(ShaperError::Cancelled);
                    }
                    thread::sleep(wait.min(by - now));
                }
                None => thread::sleep(wait),
            }
        }
    }

    /// Books a successful debit into the counters.
    fn record_grant(&self, amount_bytes: f64, waited: bool, started: Instant) {
        self.total_consumed_bytes
            .fetch_add(amount_bytes as u64, Ordering::Relaxed);
        if waited {
            let wait_ns = started.elapsed().as_nanos() as u64;
            self.total_wait_ns.fetch_add(wait_ns, Ordering::Relaxed);
            self.max_wait_ns.fetch_max(wait_ns, Ordering::Relaxed);
        } else {
            self.consecutive_throttled.store(0, Ordering::Relaxed);
        }
    }

    /// Refreshes the last-access timestamp at coarse granularity.
    #[inline]
    fn touch(&self) {
        let now_ms = current_time_ms();
        let last = self.last_access_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) >= LAST_ACCESS_UPDATE_INTERVAL_MS {
            self.last_access_ms.store(now_ms, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TokenBucket")
            .field("rate_bytes_per_sec", &state.rate)
            .field("capacity", &state.capacity)
            .field("tokens", &state.tokens)
            .field(
                "total_consumed_bytes",
                &self.total_consumed_bytes.load(Ordering::Relaxed),
            )
            .field(
                "total_requests",
                &self.total_requests.load(Ordering::Relaxed),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_starts_full() {
        let bucket = TokenBucket::new(1000.0, 1.0).unwrap();
        assert_eq!(bucket.capacity(), 1000.0);
        assert_eq!(bucket.rate(), 1000.0);
        assert!(bucket.available() >= 999.9);
    }

    #[test]
    fn test_invalid_construction() {
        assert!(TokenBucket::new(0.0, 1.0).is_err());
        assert!(TokenBucket::new(-100.0, 1.0).is_err());
        assert!(TokenBucket::new(f64::NAN, 1.0).is_err());
        assert!(TokenBucket::new(f64::INFINITY, 1.0).is_err());
        assert!(TokenBucket::new(1000.0, 0.0).is_err());
        assert!(TokenBucket::new(1000.0, -1.0).is_err());
        assert!(TokenBucket::new(1000.0, f64::NAN).is_err());

        match TokenBucket::new(0.0, 1.0) {
            Err(ShaperError::InvalidConfig(msg)) => {
                assert!(msg.contains("rate_bytes_per_sec"))
            }
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn test_consume_zero_is_noop() {
        let bucket = TokenBucket::new(1000.0, 1.0).unwrap();
        bucket.consume(0.0).unwrap();

        let m = bucket.metrics();
        assert_eq!(m.total_requests, 0);
        assert_eq!(m.total_consumed_bytes, 0);
        assert!(bucket.available() >= 999.9);
    }

    #[test]
    fn test_negative_amount_fails_fast() {
        let bucket = TokenBucket::new(1000.0, 1.0).unwrap();

        assert!(matches!(
            bucket.consume(-1.0),
            Err(ShaperError::InvalidArgument(_))
        ));
        assert!(matches!(
            bucket.consume(f64::NAN),
            Err(ShaperError::InvalidArgument(_))
        ));
        assert!(matches!(
            bucket.try_consume(-1.0),
            Err(ShaperError::InvalidArgument(_))
        ));

        // Nothing was debited or counted.
        assert_eq!(bucket.metrics().total_requests, 0);
        assert!(bucket.available() >= 999.9);
    }

    #[test]
    fn test_consume_debits() {
        let bucket = TokenBucket::new(1000.0, 1.0).unwrap();
        bucket.consume(400.0).unwrap();

        let available = bucket.available();
        assert!(
            (599.0..=601.0).contains(&available),
            "expected ~600 tokens, got {available}"
        );
    }

    #[test]
    fn test_tokens_capped_at_capacity() {
        // 10 KB/s with a 50ms burst window: capacity 500 bytes.
        let bucket = TokenBucket::new(10_000.0, 0.05).unwrap();
        bucket.consume(300.0).unwrap();

        // Sleep several times the burst window; refill must cap.
        thread::sleep(Duration::from_millis(150));
        let available = bucket.available();
        assert!(
            available <= 500.0 + f64::EPSILON,
            "tokens exceeded capacity: {available}"
        );
        assert!(available >= 499.0, "expected a full bucket, got {available}");
    }

    #[test]
    fn test_blocking_consume_waits_for_refill() {
        // 2 KB/s, 250ms burst: capacity 500 bytes.
        let bucket = TokenBucket::new(2000.0, 0.25).unwrap();
        bucket.consume(500.0).unwrap();

        // 250 more bytes need 125ms of refill.
        let start = Instant::now();
        bucket.consume(250.0).unwrap();
        let elapsed = start.elapsed();

        assert!(
            elapsed >= Duration::from_millis(100),
            "returned too early: {elapsed:?}"
        );
        assert!(
            elapsed < Duration::from_millis(400),
            "waited too long: {elapsed:?}"
        );

        let m = bucket.metrics();
        assert_eq!(m.total_waits, 1);
        assert!(m.max_wait_ns >= 100_000_000);
    }

    #[test]
    fn test_try_consume() {
        let bucket = TokenBucket::new(1000.0, 1.0).unwrap();

        assert!(bucket.try_consume(600.0).unwrap());
        assert!(!bucket.try_consume(600.0).unwrap());
        assert!(bucket.try_consume(0.0).unwrap());

        let m = bucket.metrics();
        assert_eq!(m.total_denials, 1);
        assert_eq!(m.total_consumed_bytes, 600);

        let available = bucket.available();
        assert!(
            (399.0..=401.0).contains(&available),
            "expected ~400 tokens, got {available}"
        );
    }

    #[test]
    fn test_oversized_request_waits_for_full_bucket() {
        // 1 KB/s, 200ms burst: capacity 200 bytes.
        let bucket = TokenBucket::new(1000.0, 0.2).unwrap();
        bucket.consume(200.0).unwrap();

        // 350 > capacity: granted once the bucket is full again
        // (~200ms), draining it to zero.
        let start = Instant::now();
        bucket.consume(350.0).unwrap();
        let elapsed = start.elapsed();

        assert!(
            elapsed >= Duration::from_millis(150),
            "oversized grant came too early: {elapsed:?}"
        );
        assert!(bucket.available() < 100.0);
    }

    #[test]
    fn test_oversized_try_consume_drains_full_bucket() {
        let bucket = TokenBucket::new(1000.0, 0.2).unwrap();

        // Full bucket: the oversized probe succeeds and empties it.
        assert!(bucket.try_consume(350.0).unwrap());
        assert!(bucket.available() < 50.0);

        // Not full anymore: the same probe is denied.
        assert!(!bucket.try_consume(350.0).unwrap());
    }

    #[test]
    fn test_deadline_cancellation() {
        // 1 KB/s, 100ms burst: capacity 100 bytes.
        let bucket = TokenBucket::new(1000.0, 0.1).unwrap();
        bucket.consume(100.0).unwrap();

        // 100 bytes need 100ms of refill but the deadline is 40ms out.
        let start = Instant::now();
        let deadline = start + Duration::from_millis(40);
        let result = bucket.consume_deadline(100.0, deadline);
        let elapsed = start.elapsed();

        assert!(matches!(result, Err(ShaperError::Cancelled)));
        assert!(
            elapsed >= Duration::from_millis(35),
            "cancelled too early: {elapsed:?}"
        );
        assert!(
            elapsed < Duration::from_millis(200),
            "cancelled too late: {elapsed:?}"
        );

        // The cancelled call debited nothing.
        let m = bucket.metrics();
        assert_eq!(m.total_consumed_bytes, 100);
        assert_eq!(m.total_cancellations, 1);
    }

    #[test]
    fn test_deadline_in_past_still_grants_immediate() {
        let bucket = TokenBucket::new(1000.0, 1.0).unwrap();
        let deadline = Instant::now() - Duration::from_secs(1);

        // No wait needed, so the stale deadline never fires.
        bucket.consume_deadline(500.0, deadline).unwrap();
        assert_eq!(bucket.metrics().total_cancellations, 0);
    }

    #[test]
    fn test_retarget_resets_to_full() {
        let bucket = TokenBucket::new(1000.0, 1.0).unwrap();
        bucket.consume(800.0).unwrap();

        bucket.retarget(500.0, 750.0).unwrap();
        assert_eq!(bucket.rate(), 500.0);
        assert_eq!(bucket.capacity(), 750.0);
        assert!(bucket.available() >= 749.9);

        // Idempotent: the same retarget resets to full again.
        bucket.consume(300.0).unwrap();
        bucket.retarget(500.0, 750.0).unwrap();
        assert!(bucket.available() >= 749.9);
        assert_eq!(bucket.metrics().total_retargets, 2);
    }

    #[test]
    fn test_retarget_validation() {
        let bucket = TokenBucket::new(1000.0, 1.0).unwrap();

        assert!(bucket.retarget(0.0, 1000.0).is_err());
        assert!(bucket.retarget(1000.0, 0.0).is_err());
        assert!(bucket.retarget(f64::NAN, 1000.0).is_err());
        assert!(bucket.retarget(1000.0, f64::NEG_INFINITY).is_err());

        // Failed retargets leave the bucket untouched.
        assert_eq!(bucket.rate(), 1000.0);
        assert_eq!(bucket.capacity(), 1000.0);
        assert_eq!(bucket.metrics().total_retargets, 0);
    }

    #[test]
    fn test_wait_hint() {
        let bucket = TokenBucket::new(1000.0, 1.0).unwrap();
        assert_eq!(bucket.wait_hint(100.0), Duration::ZERO);

        bucket.consume(1000.0).unwrap();
        let hint = bucket.wait_hint(500.0);
        assert!(
            hint >= Duration::from_millis(400) && hint <= Duration::from_millis(600),
            "expected ~500ms hint, got {hint:?}"
        );

        assert_eq!(bucket.wait_hint(0.0), Duration::ZERO);
        assert_eq!(bucket.wait_hint(f64::NAN), Duration::ZERO);
    }

    #[test]
    fn test_reset() {
        let bucket = TokenBucket::new(1000.0, 1.0).unwrap();
        bucket.consume(700.0).unwrap();
        assert!(!bucket.try_consume(700.0).unwrap());

        bucket.reset();
        let m = bucket.metrics();
        assert_eq!(m.total_requests, 0);
        assert_eq!(m.total_denials, 0);
        assert_eq!(m.total_consumed_bytes, 0);
        assert!(bucket.available() >= 999.9);
    }

    #[test]
    fn test_is_idle() {
        let bucket = TokenBucket::new(1000.0, 1.0).unwrap();
        bucket.consume(1.0).unwrap();

        assert!(!bucket.is_idle(Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(120));
        assert!(bucket.is_idle(Duration::from_millis(50)));
    }

    #[test]
    fn test_concurrent_consume_aggregates() {
        // 50 KB/s, 100ms burst: capacity 5000 bytes. Four threads push
        // 10000 bytes total, so ~5000 must come from refill (~100ms).
        let bucket = Arc::new(TokenBucket::new(50_000.0, 0.1).unwrap());
        let start = Instant::now();

        let mut handles = vec![];
        for _ in 0..4 {
            let bucket = Arc::clone(&bucket);
            handles.push(thread::spawn(move || {
                for _ in 0..5 {
                    bucket.consume(500.0).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(70),
            "10000 bytes drained faster than the rate allows: {elapsed:?}"
        );
        assert_eq!(bucket.metrics().total_consumed_bytes, 10_000);
    }

    #[test]
    fn test_metrics_snapshot_consistency() {
        let bucket = TokenBucket::new(100_000.0, 1.0).unwrap();
        bucket.consume(1000.0).unwrap();
        bucket.try_consume(2000.0).unwrap();
        let _ = bucket.try_consume(f64::INFINITY);

        let m = bucket.metrics();
        assert_eq!(m.total_requests, 2);
        assert_eq!(m.total_consumed_bytes, 3000);
        assert_eq!(m.total_waits, 0);
        assert_eq!(m.capacity, 100_000.0);
        assert_eq!(m.rate_bytes_per_sec, 100_000.0);
        assert!(m.current_tokens <= m.capacity);
    }

    #[test]
    fn test_from_config() {
        let config = BucketConfig::kbps(1.0).with_burst_seconds(2.0);
        let bucket = TokenBucket::from_config(&config).unwrap();
        assert_eq!(bucket.rate(), 1024.0);
        assert_eq!(bucket.capacity(), 2048.0);

        let bad = BucketConfig::kbps(-1.0);
        assert!(TokenBucket::from_config(&bad).is_err());
    }
}
