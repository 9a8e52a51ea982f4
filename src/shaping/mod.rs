//! # Shaping Module
//!
//! Internal implementation of the bandwidth shaping functionality,
//! organized into submodules by responsibility.
//!
//! ## Module Structure
//!
//! ```text
//!     shaping/
//!     ├── mod.rs          (You are here - Module organization)
//!     ├── config.rs       (Rate and adaptive-mode settings)
//!     ├── core.rs         (Blocking token bucket)
//!     ├── estimator.rs    (Sliding-window throughput estimation)
//!     ├── transport.rs    (Shaped datagram sending)
//!     ├── manager.rs      (Per-peer bucket management)
//!     ├── metrics.rs      (Monitoring and health analysis)
//!     ├── error.rs        (Error taxonomy)
//!     └── utils.rs        (Monotonic time helpers)
//! ```
//!
//! ## Architecture Flow
//!
//! ```text
//!     send(buf, dst)
//!          │
//!          ▼
//!     ┌───────────┐
//!     │ Transport │ ◄── Records offered load, forwards to socket
//!     └─────┬─────┘
//!           │
//!           ▼
//!     ┌───────────┐
//!     │ Estimator │ ◄── Measures throughput, proposes targets
//!     └─────┬─────┘
//!           │
//!           ▼
//!     ┌───────────┐
//!     │   Core    │ ◄── Token bucket, blocks until budget allows
//!     └─────┬─────┘
//!           │
//!           ▼
//!     ┌───────────┐
//!     │  Config   │ ◄── Rates, bursts, validation
//!     └───────────┘
//! ```
//!
//! ## Component Responsibilities
//!
//! - **config**: Translates kilobytes-per-second settings into bucket
//!   parameters and validates them
//! - **core**: Implements the blocking token bucket that paces senders
//! - **estimator**: Watches recent send sizes and derives a target rate
//! - **transport**: Wraps a datagram socket so every send is shaped
//! - **manager**: Hands out one bucket per peer with bounded memory
//! - **metrics**: Tracks counters and computes health views
//! - **error**: The crate-wide error enum and `Result` alias
//! - **utils**: Monotonic clock readings used by every component

mod config;
mod core;
mod error;
mod estimator;
mod manager;
mod metrics;
mod transport;
mod utils;

/// Configuration types for fixed-rate and adaptive shaping
pub use config::{AdaptiveConfig, BucketConfig, BYTES_PER_KB};

/// Blocking token bucket that enforces a byte rate
pub use self::core::TokenBucket;

/// Error taxonomy shared across the crate
pub use error::{Result, ShaperError};

/// Sliding-window throughput estimation for adaptive mode
pub use estimator::{ThroughputEstimator, RETARGET_HYSTERESIS};

/// Per-peer bucket management with bounded memory
pub use manager::{PeerBucketManager, PeerManagerStats};

/// Metrics and health monitoring for observability
pub use metrics::{BucketMetrics, HealthStatus};

/// Shaped datagram transport and the socket abstraction it wraps
pub use transport::{DatagramSocket, RateLimitedTransport};

/// Monotonic time helpers
pub use utils::{current_time_ms, current_time_ns, current_time_us};
