//! # Shaper - Adaptive Bandwidth Shaping for Rust
//!
//! A blocking bandwidth shaper for datagram traffic. Wrap a socket and
//! every send is paced to a byte rate, either one you configure or one
//! learned from the traffic itself. Think of it as a regulator valve on
//! your uplink: packets still flow, just never faster than the pipe you
//! give them.
//!
//! ## What is Traffic Shaping?
//!
//! Shaping is like metering cars onto a highway. Instead of dropping
//! packets that arrive too fast, the sender itself is slowed down until
//! the link has room, so bursts smooth out and background transfers stop
//! trampling interactive traffic.
//!
//! ## The Token Bucket Algorithm
//!
//! The core of the library is a token bucket denominated in bytes:
//!
//! ```text
//!     Token Bucket Visualization (1024 B/s, 1s burst):
//!
//!     Time 0:      [▓▓▓▓▓▓▓▓▓▓] 1024 bytes available
//!     send(600):   [▓▓▓▓░░░░░░] ✅ instant (424 left)
//!     send(600):   [░░░░░░░░░░] ⏳ sleeps ~172ms, then sends
//!     Time +1s:    [▓▓▓▓▓▓▓▓▓▓] refilled to capacity
//! ```
//!
//! - **Tokens** = Bytes the sender may transmit right now
//! - **Capacity** = Burst budget (rate × burst window)
//! - **Refill** = Tokens return continuously at the configured rate
//!
//! Oversized packets (larger than the whole burst budget) wait for a
//! full bucket and drain it completely, so they are paced too rather
//! than rejected.
//!
//! ## Features
//!
//! - 🚰 **Blocking Backpressure** - Senders sleep instead of queueing or
//!   dropping; nothing is buffered inside the shaper
//! - 📈 **Adaptive Mode** - Measures recent throughput and retargets the
//!   bucket to a fraction of it, with hysteresis so the rate stays calm
//! - 🎯 **Fixed Mode** - Classic configured-rate shaping when you know
//!   the budget up front
//! - 🌐 **Per-Peer Budgets** - One bucket per destination with bounded
//!   memory and automatic cleanup
//! - 📊 **Real-time Metrics** - Wait times, throttle rates, and health
//!   status for every bucket
//! - 🛡️ **Thread-Safe** - Buckets and transports are safe to share
//!   across threads
//!
//! ## Quick Start
//!
//! ### Fixed-Rate Shaping
//!
//! ```rust
//! use shaper::ShaperBuilder;
//! use std::net::UdpSocket;
//!
//! let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
//! let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
//! let dst = receiver.local_addr().unwrap();
//!
//! // Cap this socket at 256 KiB/s with a one-second burst budget.
//! let transport = ShaperBuilder::new()
//!     .rate_kbps(256.0)
//!     .wrap(socket);
//!
//! transport.send(b"hello", dst).unwrap();
//! ```
//!
//! ### Adaptive Shaping
//!
//! ```rust
//! use shaper::ShaperBuilder;
//! use std::net::UdpSocket;
//!
//! let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
//!
//! // Shape to half of whatever the link is currently carrying.
//! let transport = ShaperBuilder::new()
//!     .limit_ratio(0.5)
//!     .window_seconds(1.0)
//!     .wrap(socket);
//!
//! // The first sends pass unshaped while the estimator warms up;
//! // once a rate is measured the bucket takes over.
//! assert!(!transport.is_shaping());
//! ```
//!
//! ### Per-Peer Shaping
//!
//! ```rust
//! use shaper::{BucketConfig, PeerBucketManager};
//! use std::net::SocketAddr;
//!
//! // Every destination gets its own 128 KiB/s budget.
//! let manager = PeerBucketManager::new(BucketConfig::kbps(128.0)).unwrap();
//! let peer: SocketAddr = "203.0.113.7:4500".parse().unwrap();
//!
//! // Blocks until this peer's bucket covers the payload.
//! manager.consume(peer, 1024.0).unwrap();
//! ```
//!
//! ## Architecture Overview
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │   Your Application      │
//!                    └──────────┬──────────────┘
//!                               │ send(buf, dst)
//!                    ┌──────────▼──────────────┐
//!                    │  RateLimitedTransport   │
//!                    ├─────────────────────────┤
//!                    │  • record offered load  │
//!                    │  • recompute target     │
//!                    │  • consume budget       │
//!                    └──────────┬──────────────┘
//!                               │
//!                ┌──────────────┴───────────────┐
//!                │                              │
//!     ┌──────────▼──────────┐       ┌──────────▼───────────┐
//!     │   TokenBucket       │       │ ThroughputEstimator  │
//!     ├─────────────────────┤       ├──────────────────────┤
//!     │ • bytes as tokens   │       │ • sliding window     │
//!     │ • continuous refill │       │ • measured rate      │
//!     │ • blocking consume  │       │ • 10% hysteresis     │
//!     └─────────────────────┘       └──────────────────────┘
//! ```
//!
//! ## Common Use Cases
//!
//! 1. **Background Sync** - Keep bulk transfers from saturating a
//!    shared uplink
//! 2. **Telemetry Export** - Pace metric and log shipping to a fixed
//!    budget
//! 3. **P2P and Relay Nodes** - Give each peer a fair share of egress
//! 4. **Game Servers** - Stop one slow client from eating the pipe
//! 5. **Congestion-Friendly Probes** - Adaptively stay below the path's
//!    observed capacity
//!
//! ## Thread Safety
//!
//! All types are thread-safe and can be shared across threads:
//! - `TokenBucket` - Safe to share via `Arc<TokenBucket>`
//! - `RateLimitedTransport` - Safe to share when the wrapped socket is
//! - `PeerBucketManager` - Safe to share via `Arc<PeerBucketManager>`
//!
//! Note that a blocked `consume` holds no lock while it sleeps, so
//! other threads keep draining and refilling the same bucket freely.
//!
//! ## Examples
//!
//! See the `demos/` directory for complete walkthroughs:
//! - `basic.rs` - Fixed-rate shaping over a loopback socket
//! - `adaptive.rs` - Estimator warm-up and retargeting
//! - `per_peer.rs` - Per-destination budgets with cleanup

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    missing_debug_implementations
)]
#![forbid(unsafe_code)]

// Internal module
mod shaping;

// Public re-exports
pub use shaping::{
    current_time_ms, current_time_ns, current_time_us, AdaptiveConfig, BucketConfig,
    BucketMetrics, DatagramSocket, HealthStatus, PeerBucketManager, PeerManagerStats,
    RateLimitedTransport, Result, ShaperError, ThroughputEstimator, TokenBucket, BYTES_PER_KB,
    RETARGET_HYSTERESIS,
};

/// A token bucket wrapped in `Arc` for convenient thread-safe sharing.
///
/// # Example
/// ```rust
/// use shaper::{SharedBucket, TokenBucket};
/// use std::sync::Arc;
///
/// let bucket = TokenBucket::new(64.0 * 1024.0, 1.0).unwrap();
/// let shared: SharedBucket = Arc::new(bucket);
///
/// let worker = shared.clone();
/// std::thread::spawn(move || {
///     worker.consume(512.0).unwrap();
/// });
/// ```
pub type SharedBucket = std::sync::Arc<TokenBucket>;

/// A peer bucket manager wrapped in `Arc` for convenient sharing.
///
/// Useful when the manager is consulted from many sender threads, or
/// when handing a clone to its background cleanup thread.
pub type SharedPeerManager = std::sync::Arc<PeerBucketManager>;

/// Version information for the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum supported Rust version.
///
/// This crate requires at least Rust 1.70.0 due to:
/// - `OnceLock` stabilization
/// - Edition 2021 features
pub const MSRV: &str = "1.70.0";

/// Prelude module for convenient imports.
///
/// Import everything you need with a single line:
/// ```rust
/// use shaper::prelude::*;
/// ```
pub mod prelude {
    //! Common imports for typical shaping use cases.
    //!
    //! # Example
    //! ```rust
    //! use shaper::prelude::*;
    //!
    //! let bucket = TokenBucket::new(64.0 * 1024.0, 1.0).unwrap();
    //! let config = BucketConfig::kbps(128.0);
    //! let status = HealthStatus::Healthy;
    //! ```

    pub use crate::{
        AdaptiveConfig, BucketConfig, BucketMetrics, DatagramSocket, HealthStatus,
        PeerBucketManager, PeerManagerStats, RateLimitedTransport, ShaperBuilder, ShaperError,
        SharedBucket, SharedPeerManager, ThroughputEstimator, TokenBucket,
    };
}

/// Builder for wrapping sockets in a shaped transport.
///
/// The builder is the recommended entry point: it picks fixed or
/// adaptive mode from the knobs you set and validates the combination
/// before any socket traffic flows.
///
/// # Example
///
/// ```rust
/// use shaper::ShaperBuilder;
/// use std::net::UdpSocket;
///
/// let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
///
/// // Fixed 512 KiB/s with a two-second burst budget.
/// let transport = ShaperBuilder::new()
///     .rate_kbps(512.0)
///     .burst_seconds(2.0)
///     .wrap(socket);
///
/// assert!(transport.is_shaping());
///
/// // Or use try_wrap() for error handling.
/// let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
/// let result = ShaperBuilder::new()
///     .rate_kbps(0.0) // Invalid!
///     .try_wrap(socket);
///
/// assert!(result.is_err());
/// ```
#[derive(Debug, Clone)]
pub struct ShaperBuilder {
    rate_kbps: Option<f64>,
    burst_seconds: f64,
    limit_ratio: Option<f64>,
    window_seconds: f64,
}

impl ShaperBuilder {
    /// Creates a builder with no mode selected yet.
    ///
    /// Wrapping without setting a rate or ratio shapes at the default
    /// fixed rate of 256 KiB/s.
    pub fn new() -> Self {
        Self {
            rate_kbps: None,
            burst_seconds: 1.0,
            limit_ratio: None,
            window_seconds: 1.0,
        }
    }

    /// Selects fixed mode at `kbps` kilobytes per second.
    ///
    /// Mutually exclusive with [`limit_ratio`](Self::limit_ratio).
    pub fn rate_kbps(mut self, kbps: f64) -> Self {
        self.rate_kbps = Some(kbps);
        self
    }

    /// Selects fixed mode at `mbps` megabytes per second.
    pub fn rate_mbps(mut self, mbps: f64) -> Self {
        self.rate_kbps = Some(mbps * 1024.0);
        self
    }

    /// Sets the burst window for fixed mode: the bucket holds
    /// `rate × burst_seconds` bytes. Ignored in adaptive mode, which
    /// always uses a one-second burst.
    pub fn burst_seconds(mut self, seconds: f64) -> Self {
        self.burst_seconds = seconds;
        self
    }

    /// Selects adaptive mode: the target rate tracks
    /// `measured throughput × ratio`.
    ///
    /// Mutually exclusive with [`rate_kbps`](Self::rate_kbps).
    pub fn limit_ratio(mut self, ratio: f64) -> Self {
        self.limit_ratio = Some(ratio);
        self
    }

    /// Sets the measurement window for adaptive mode.
    pub fn window_seconds(mut self, seconds: f64) -> Self {
        self.window_seconds = seconds;
        self
    }

    /// Wraps `socket` in a shaped transport.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid: a non-positive rate,
    /// ratio, or window, or both a rate and a ratio set. Use
    /// [`try_wrap`](Self::try_wrap) to handle errors instead.
    pub fn wrap<S: DatagramSocket>(self, socket: S) -> RateLimitedTransport<S> {
        match self.try_wrap(socket) {
            Ok(transport) => transport,
            Err(err) => panic!("invalid shaper configuration: {}", err),
        }
    }

    /// Wraps `socket` in a shaped transport, returning an error if the
    /// configuration is invalid.
    ///
    /// # Errors
    ///
    /// [`ShaperError::InvalidConfig`] when a knob fails validation or
    /// when both a fixed rate and an adaptive ratio were set.
    pub fn try_wrap<S: DatagramSocket>(self, socket: S) -> Result<RateLimitedTransport<S>> {
        match (self.rate_kbps, self.limit_ratio) {
            (Some(_), Some(_)) => Err(ShaperError::InvalidConfig(
                "rate_kbps and limit_ratio are mutually exclusive",
            )),
            (Some(kbps), None) => {
                let config = BucketConfig::new(kbps, self.burst_seconds);
                RateLimitedTransport::fixed_rate(socket, config)
            }
            (None, Some(ratio)) => {
                let config = AdaptiveConfig::new(ratio, self.window_seconds);
                RateLimitedTransport::adaptive(socket, config)
            }
            (None, None) => RateLimitedTransport::fixed_rate(
                socket,
                BucketConfig::default().with_burst_seconds(self.burst_seconds),
            ),
        }
    }
}

impl Default for ShaperBuilder {
    fn default() -> Self {
        Self::new()
    }
}
