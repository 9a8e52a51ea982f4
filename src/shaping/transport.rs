//! # Rate-Limited Transport
//!
//! The outermost layer: wraps a datagram socket so that every send
//! first passes through the token bucket, then hits the wire.
//!
//! ```text
//!     send(buf, dst)
//!        │
//!        ▼ (adaptive only)
//!     estimator.record(len) ──► recompute ──► retarget bucket
//!        │
//!        ▼
//!     bucket.consume(len)   ◄── blocks here under overload
//!        │
//!        ▼
//!     socket.send_to(buf, dst)
//! ```
//!
//! Backpressure is the blocking itself: nothing is queued inside the
//! transport, so memory stays flat no matter how hard callers push.
//!
//! In adaptive mode the transport starts *cold*: no bucket exists until
//! the estimator's first successful recompute proposes a target, and
//! until then sends go out unthrottled. The first data-bearing send
//! both seeds the measurement and materializes the bucket.

use super::{
    config::{AdaptiveConfig, BucketConfig},
    core::TokenBucket,
    error::Result,
    estimator::ThroughputEstimator,
    metrics::BucketMetrics,
};
use parking_lot::Mutex;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::debug;

/// Burst window for buckets the estimator materializes or retargets:
/// capacity equals one second of the target rate.
const ADAPTIVE_BURST_SECONDS: f64 = 1.0;

/// Minimal sending surface the shaper needs from a datagram socket.
///
/// Implemented for [`std::net::UdpSocket`]; test doubles and other
/// datagram-ish carriers implement it the same way.
pub trait DatagramSocket {
    /// Sends `buf` to `addr`, returning the number of bytes written.
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;

    /// Releases the socket. The default is a no-op: for most sockets
    /// dropping is release enough.
    fn close(&self) -> io::Result<()> {
        Ok(())
    }
}

impl DatagramSocket for UdpSocket {
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, addr)
    }
}

/// A datagram socket wrapped in bandwidth shaping.
///
/// Two modes share one type:
///
/// - **Fixed**: [`fixed_rate`](Self::fixed_rate) shapes to a configured
///   rate from the first send.
/// - **Adaptive**: [`adaptive`](Self::adaptive) measures offered
///   throughput and shapes to a fraction of it, retargeting as the
///   measurement moves.
///
/// The transport owns its socket exclusively; [`close`](Self::close)
/// consumes the transport, so send-after-close cannot compile.
///
/// ## Example
///
/// ```rust
/// use shaper::{BucketConfig, RateLimitedTransport};
/// use std::net::UdpSocket;
///
/// let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
/// let peer = socket.local_addr().unwrap();
///
/// let transport =
///     RateLimitedTransport::fixed_rate(socket, BucketConfig::kbps(256.0)).unwrap();
/// transport.send(b"hello", peer).unwrap();
/// transport.close().unwrap();
/// ```
pub struct RateLimitedTransport<S: DatagramSocket> {
    socket: S,
    /// Empty while an adaptive transport is cold; set exactly once.
    bucket: OnceLock<TokenBucket>,
    /// Present in adaptive mode only.
    estimator: Option<Mutex<ThroughputEstimator>>,
    total_sends: AtomicU64,
    unshaped_sends: AtomicU64,
}

impl<S: DatagramSocket> RateLimitedTransport<S> {
    /// Wraps `socket` with a fixed-rate shaper.
    ///
    /// Shaping is active immediately: the bucket exists from
    /// construction, full, sized by the config's burst window.
    ///
    /// # Errors
    ///
    /// [`ShaperError::InvalidConfig`](super::ShaperError::InvalidConfig)
    /// if the configuration fails validation.
    pub fn fixed_rate(socket: S, config: BucketConfig) -> Result<Self> {
        let bucket = OnceLock::new();
        let _ = bucket.set(TokenBucket::from_config(&config)?);
        Ok(Self {
            socket,
            bucket,
            estimator: None,
            total_sends: AtomicU64::new(0),
            unshaped_sends: AtomicU64::new(0),
        })
    }

    /// Wraps `socket` with an adaptive shaper.
    ///
    /// Starts cold: sends go out unthrottled until the estimator's
    /// first successful recompute, after which the bucket tracks
    /// `limit_ratio` of the measured throughput.
    ///
    /// # Errors
    ///
    /// [`ShaperError::InvalidConfig`](super::ShaperError::InvalidConfig)
    /// if the configuration fails validation.
    pub fn adaptive(socket: S, config: AdaptiveConfig) -> Result<Self> {
        Ok(Self {
            socket,
            bucket: OnceLock::new(),
            estimator: Some(Mutex::new(ThroughputEstimator::from_config(&config)?)),
            total_sends: AtomicU64::new(0),
            unshaped_sends: AtomicU64::new(0),
        })
    }

    /// Sends `buf` to `dst`, blocking first until the bucket allows it.
    ///
    /// Worst-case delay is one full refill cycle (`capacity / rate`
    /// seconds). Socket errors come back unchanged inside
    /// [`ShaperError::Io`](super::ShaperError::Io); tokens consumed for
    /// a send that then fails at the socket are not refunded.
    pub fn send(&self, buf: &[u8], dst: SocketAddr) -> Result<usize> {
        self.send_inner(buf, dst, None)
    }

    /// Like [`send`](Self::send), but gives up waiting at `deadline`.
    ///
    /// # Errors
    ///
    /// [`ShaperError::Cancelled`](super::ShaperError::Cancelled) if the
    /// deadline elapses before the bucket grants the bytes; the
    /// datagram is not transmitted and no tokens are debited.
    pub fn send_deadline(&self, buf: &[u8], dst: SocketAddr, deadline: Instant) -> Result<usize> {
        self.send_inner(buf, dst, Some(deadline))
    }

    fn send_inner(&self, buf: &[u8], dst: SocketAddr, deadline: Option<Instant>) -> Result<usize> {
        self.total_sends.fetch_add(1, Ordering::Relaxed);
        let amount = buf.len() as f64;

        if let Some(estimator) = &self.estimator {
            // Offered load is recorded before any throttling below.
            let decision = {
                let mut est = estimator.lock();
                est.record(amount);
                est.recompute()
            };
            if let Some(rate) = decision {
                self.apply_target(rate)?;
            }
        }

        match self.bucket.get() {
            Some(bucket) => match deadline {
                Some(by) => bucket.consume_deadline(amount, by)?,
                None => bucket.consume(amount)?,
            },
            None => {
                // Cold start: unthrottled until the estimator warms.
                self.unshaped_sends.fetch_add(1, Ordering::Relaxed);
            }
        }

        Ok(self.socket.send_to(buf, dst)?)
    }

    /// Applies a freshly proposed target rate to the bucket, creating
    /// it on the first proposal.
    fn apply_target(&self, rate: f64) -> Result<()> {
        if let Some(bucket) = self.bucket.get() {
            return bucket.retarget(rate, rate * ADAPTIVE_BURST_SECONDS);
        }

        let bucket = TokenBucket::new(rate, ADAPTIVE_BURST_SECONDS)?;
        match self.bucket.set(bucket) {
            Ok(()) => {
                debug!(rate, "estimator warm, shaping enabled");
                Ok(())
            }
            // A concurrent sender won the warm-up race; retarget what
            // it installed.
            Err(_) => match self.bucket.get() {
                Some(existing) => existing.retarget(rate, rate * ADAPTIVE_BURST_SECONDS),
                None => Ok(()),
            },
        }
    }

    /// Closes the underlying socket and consumes the transport.
    ///
    /// Nothing is drained or flushed: this layer delays sends, it never
    /// queues them. The socket's own close result comes back unchanged.
    pub fn close(self) -> Result<()> {
        self.socket.close()?;
        Ok(())
    }

    /// Whether sends currently pass through a bucket. Always `true`
    /// for fixed-rate transports; `true` after warm-up for adaptive
    /// ones.
    pub fn is_shaping(&self) -> bool {
        self.bucket.get().is_some()
    }

    /// The rate currently being enforced, bytes per second. `None`
    /// while an adaptive transport is still cold.
    pub fn target_rate(&self) -> Option<f64> {
        self.bucket.get().map(TokenBucket::rate)
    }

    /// Throughput measured over the estimator's window, bytes per
    /// second. `None` for fixed-rate transports.
    pub fn measured_rate(&self) -> Option<f64> {
        self.estimator.as_ref().map(|e| e.lock().measured_rate())
    }

    /// Snapshot of the bucket's counters. `None` while cold.
    pub fn metrics(&self) -> Option<BucketMetrics> {
        self.bucket.get().map(TokenBucket::metrics)
    }

    /// The shaping bucket itself, for wait hints and direct probes.
    /// `None` while an adaptive transport is cold.
    pub fn bucket(&self) -> Option<&TokenBucket> {
        self.bucket.get()
    }

    /// Total sends attempted through this transport.
    pub fn sends(&self) -> u64 {
        self.total_sends.load(Ordering::Relaxed)
    }

    /// Sends that bypassed shaping during the adaptive cold start.
    pub fn unshaped_sends(&self) -> u64 {
        self.unshaped_sends.load(Ordering::Relaxed)
    }

    /// Borrow of the wrapped socket.
    pub fn inner(&self) -> &S {
        &self.socket
    }

    /// Unwraps the transport, returning the socket without closing it.
    pub fn into_inner(self) -> S {
        self.socket
    }
}

impl<S: DatagramSocket> std::fmt::Debug for RateLimitedTransport<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedTransport")
            .field("mode", if self.estimator.is_some() { &"adaptive" } else { &"fixed" })
            .field("is_shaping", &self.is_shaping())
            .field("target_rate", &self.target_rate())
            .field("total_sends", &self.total_sends.load(Ordering::Relaxed))
            .field(
                "unshaped_sends",
                &self.unshaped_sends.load(Ordering::Relaxed),
            )
            .finish()
    }
}
