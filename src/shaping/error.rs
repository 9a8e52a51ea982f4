//! Error types for the shaping layer.
//!
//! Everything fallible in this crate funnels into [`ShaperError`].
//! Configuration problems are caught at construction time, argument
//! problems fail fast at the call site, and socket errors pass through
//! unmodified so callers can keep matching on [`std::io::ErrorKind`].

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ShaperError>;

/// All failure modes of the shaping layer.
#[derive(Debug, Error)]
pub enum ShaperError {
    /// A constructor or [`retarget`](crate::TokenBucket::retarget) was
    /// handed a parameter that can never describe a working limiter
    /// (non-positive or non-finite rate, burst, ratio, or window).
    ///
    /// The contained message names the offending parameter.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// A per-call argument was out of range, e.g. a negative or
    /// non-finite byte amount. Nothing was consumed.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The caller-supplied deadline elapsed while waiting for tokens.
    ///
    /// No tokens were debited; the bucket is left exactly as the next
    /// caller should find it.
    #[error("deadline elapsed while waiting for tokens")]
    Cancelled,

    /// The per-peer table is full and cleanup could not make room.
    #[error("peer table at capacity")]
    AtCapacity,

    /// The underlying socket failed. Forwarded unchanged.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ShaperError {
    /// Returns `true` for errors the caller can retry after backing off
    /// (cancellations and full peer tables), `false` for programming or
    /// configuration mistakes and socket failures.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ShaperError::Cancelled | ShaperError::AtCapacity)
    }
}
