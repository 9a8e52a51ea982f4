//! # Per-Peer Bucket Manager
//!
//! A bounded table of independent token buckets keyed by destination
//! address, for callers that shape egress per peer: a relay fanning out
//! to many clients, a sync daemon capping each mirror, a game server
//! keeping one slow link from eating the uplink.
//!
//! ## Architecture
//!
//! ```text
//!     Outbound Traffic:
//!     203.0.113.7:4500 ──┐
//!     203.0.113.9:4500 ──┤
//!     198.51.100.2:9000 ─┼──► Peer Manager ──► Individual Buckets
//!     198.51.100.3:9000 ─┤         │
//!     192.0.2.15:6881 ───┘         ▼
//!                           ┌───────────────┐
//!                           │   DashMap     │
//!                           │  ┌─────────┐  │
//!                           │  │addr → TB│  │  TB = TokenBucket
//!                           │  │addr → TB│  │
//!                           │  │addr → TB│  │
//!                           │  └─────────┘  │
//!                           └───────────────┘
//! ```
//!
//! Every bucket shapes a single peer's stream; the manager is pure
//! bookkeeping and never coordinates traffic between peers. Memory
//! stays bounded: at most 10 000 peers are tracked, idle buckets are
//! evicted on a schedule, and an emergency pass frees room when the
//! table nears capacity.

use super::config::BucketConfig;
use super::core::TokenBucket;
use super::error::{Result, ShaperError};
use super::utils::current_time_ms;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum number of peers tracked simultaneously.
///
/// Bounds memory when destinations churn, e.g. a relay fed attacker-
/// controlled addresses.
const MAX_TRACKED_PEERS: usize = 10_000;

/// Occupancy at which inserts start triggering cleanup (90% of max).
const CLEANUP_THRESHOLD: usize = (MAX_TRACKED_PEERS * 90) / 100;

/// Occupancy cleanup aims for (70% of max), leaving headroom before
/// the next pass is needed.
const CLEANUP_TARGET: usize = (MAX_TRACKED_PEERS * 70) / 100;

/// Divisor applied to the idle duration during emergency cleanup.
const EMERGENCY_CLEANUP_IDLE_FACTOR: u64 = 2;

/// Floor for the emergency idle threshold (milliseconds): peers active
/// within the last second are never evicted.
const EMERGENCY_CLEANUP_MIN_IDLE_MS: u64 = 1000;

/// Manager for per-peer bandwidth shaping.
///
/// Hands out one [`TokenBucket`] per destination address, all built
/// from the same [`BucketConfig`], and reclaims buckets for peers that
/// go quiet.
///
/// ## Usage
///
/// ```rust
/// use shaper::{BucketConfig, PeerBucketManager};
/// use std::net::SocketAddr;
///
/// let manager = PeerBucketManager::new(BucketConfig::kbps(128.0)).unwrap();
/// let peer: SocketAddr = "203.0.113.7:4500".parse().unwrap();
///
/// // Blocks until this peer's budget covers the payload.
/// manager.consume(peer, 1024.0).unwrap();
/// ```
///
/// ## With background cleanup
///
/// ```rust
/// use shaper::{BucketConfig, PeerBucketManager};
/// use std::sync::Arc;
///
/// let manager = Arc::new(
///     PeerBucketManager::with_cleanup_settings(
///         BucketConfig::kbps(128.0),
///         60_000,  // sweep every minute
///         300_000, // evict peers idle for 5 minutes
///     )
///     .unwrap(),
/// );
/// let (handle, stop) = manager.clone().start_stoppable_cleanup_thread();
/// # stop.send(()).unwrap();
/// # handle.join().unwrap();
/// ```
#[derive(Clone)]
pub struct PeerBucketManager {
    /// Peer to bucket mapping; sharded for concurrent access.
    buckets: Arc<DashMap<SocketAddr, Arc<TokenBucket>, ahash::RandomState>>,

    /// Current bucket count, for capacity checks without iterating.
    active_count: Arc<AtomicUsize>,

    /// Template for newly created buckets. Validated at construction.
    config: BucketConfig,

    /// Interval between routine cleanup passes (milliseconds).
    cleanup_interval_ms: u64,

    /// Idle time after which a peer's bucket is reclaimable
    /// (milliseconds).
    idle_duration_ms: u64,

    /// Lifetime count of buckets created.
    total_created: Arc<AtomicU64>,

    /// Lifetime count of buckets reclaimed.
    total_cleaned: Arc<AtomicU64>,

    /// Guards against overlapping emergency cleanups.
    cleanup_in_progress: Arc<AtomicBool>,
}

impl PeerBucketManager {
    /// Creates a manager with default cleanup settings: a sweep every
    /// 60 seconds, eviction after 5 minutes idle.
    ///
    /// # Errors
    ///
    /// [`ShaperError::InvalidConfig`] if `config` fails validation; no
    /// bucket creation can fail afterwards.
    pub fn new(config: BucketConfig) -> Result<Self> {
        config.validate()?;

        // Shard to the core count; more shards cut contention at a
        // small memory cost. DashMap requires at least two shards, so
        // clamp the floor on single-core hosts.
        let num_shards = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(8)
            .next_power_of_two()
            .clamp(2, 64);

        let initial_capacity = (MAX_TRACKED_PEERS / num_shards).max(128);

        Ok(Self {
            buckets: Arc::new(DashMap::with_capacity_and_hasher_and_shard_amount(
                initial_capacity,
                ahash::RandomState::new(),
                num_shards,
            )),
            active_count: Arc::new(AtomicUsize::new(0)),
            config,
            cleanup_interval_ms: 60_000,
            idle_duration_ms: 300_000,
            total_created: Arc::new(AtomicU64::new(0)),
            total_cleaned: Arc::new(AtomicU64::new(0)),
            cleanup_in_progress: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Creates a manager with explicit cleanup cadence and idle
    /// threshold.
    ///
    /// # Errors
    ///
    /// [`ShaperError::InvalidConfig`] if `config` fails validation.
    pub fn with_cleanup_settings(
        config: BucketConfig,
        cleanup_interval_ms: u64,
        idle_duration_ms: u64,
    ) -> Result<Self> {
        let mut manager = Self::new(config)?;
        manager.cleanup_interval_ms = cleanup_interval_ms;
        manager.idle_duration_ms = idle_duration_ms;
        Ok(manager)
    }

    /// Gets or creates the bucket for `peer`.
    ///
    /// Fast path returns the existing bucket without allocation. The
    /// slow path checks capacity, runs emergency cleanup when the table
    /// is nearly full, and inserts through the entry API so concurrent
    /// callers for the same peer end up sharing one bucket.
    ///
    /// Returns `None` only when the table is at capacity and cleanup
    /// could not make room.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shaper::{BucketConfig, PeerBucketManager};
    /// use std::net::SocketAddr;
    ///
    /// let manager = PeerBucketManager::new(BucketConfig::kbps(64.0)).unwrap();
    /// let peer: SocketAddr = "203.0.113.7:4500".parse().unwrap();
    ///
    /// if let Some(bucket) = manager.get_bucket(peer) {
    ///     assert!(bucket.try_consume(512.0).unwrap());
    /// }
    /// ```
    #[inline]
    pub fn get_bucket(&self, peer: SocketAddr) -> Option<Arc<TokenBucket>> {
        if let Some(bucket) = self.buckets.get(&peer) {
            return Some(bucket.clone());
        }

        let current = self.active_count.load(Ordering::Acquire);

        if current >= MAX_TRACKED_PEERS {
            warn!("peer table at capacity, rejecting {}", peer);
            return None;
        }

        if current >= CLEANUP_THRESHOLD {
            self.emergency_cleanup();

            if self.active_count.load(Ordering::Acquire) >= MAX_TRACKED_PEERS {
                warn!("peer table still at capacity after cleanup, rejecting {}", peer);
                return None;
            }
        }

        match self.buckets.entry(peer) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                // Another thread created it while we were checking.
                Some(occupied.get().clone())
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let prev = self.active_count.fetch_add(1, Ordering::AcqRel);

                if prev >= MAX_TRACKED_PEERS {
                    // Lost a capacity race; roll the reservation back.
                    self.active_count.fetch_sub(1, Ordering::AcqRel);
                    warn!("peer table capacity race, rejecting {}", peer);
                    return None;
                }

                // The config was validated at construction, so this
                // cannot fail; ok()? keeps the path unwrap-free anyway.
                let bucket = Arc::new(TokenBucket::from_config(&self.config).ok()?);
                vacant.insert(bucket.clone());

                self.total_created.fetch_add(1, Ordering::Relaxed);
                debug!("created bucket for peer {} (total: {})", peer, prev + 1);

                Some(bucket)
            }
        }
    }

    /// Blocks until `peer`'s bucket grants `amount_bytes`, creating the
    /// bucket on first use.
    ///
    /// # Errors
    ///
    /// [`ShaperError::AtCapacity`] when the peer table is full and
    /// cleanup could not make room;
    /// [`ShaperError::InvalidArgument`] for negative or non-finite
    /// amounts.
    pub fn consume(&self, peer: SocketAddr, amount_bytes: f64) -> Result<()> {
        match self.get_bucket(peer) {
            Some(bucket) => bucket.consume(amount_bytes),
            None => Err(ShaperError::AtCapacity),
        }
    }

    /// Non-blocking probe against `peer`'s bucket, creating it on first
    /// use. `Ok(false)` both for an insufficient budget and for a full
    /// peer table.
    ///
    /// # Errors
    ///
    /// [`ShaperError::InvalidArgument`] for negative or non-finite
    /// amounts.
    #[inline]
    pub fn try_consume(&self, peer: SocketAddr, amount_bytes: f64) -> Result<bool> {
        match self.get_bucket(peer) {
            Some(bucket) => bucket.try_consume(amount_bytes),
            None => Ok(false),
        }
    }

    /// Evicts the most idle peers until occupancy drops back to the
    /// cleanup target. Runs at most once at a time.
    fn emergency_cleanup(&self) {
        if self
            .cleanup_in_progress
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        // Reset the flag however this function exits.
        let _guard = CleanupGuard {
            flag: &self.cleanup_in_progress,
        };

        let before = self.active_count.load(Ordering::Acquire);
        if before <= CLEANUP_TARGET {
            return;
        }

        info!("starting emergency cleanup ({} peers tracked)", before);

        let to_remove_count = before.saturating_sub(CLEANUP_TARGET);
        let mut removed = 0u64;

        let idle_threshold = if cfg!(test) {
            0
        } else {
            (self.idle_duration_ms / EMERGENCY_CLEANUP_IDLE_FACTOR)
                .max(EMERGENCY_CLEANUP_MIN_IDLE_MS)
        };

        let now = current_time_ms();

        let mut candidates: Vec<(u64, SocketAddr)> =
            Vec::with_capacity(to_remove_count.min(1000));

        for entry in self.buckets.iter() {
            let idle_time = now.saturating_sub(entry.value().last_access_ms());

            if idle_time >= idle_threshold {
                candidates.push((idle_time, *entry.key()));

                if candidates.len() >= to_remove_count {
                    break;
                }
            }
        }

        // Mainly for tests, where nothing has had time to go idle.
        if cfg!(test) && candidates.len() < to_remove_count {
            for entry in self.buckets.iter() {
                if candidates.iter().any(|(_, peer)| peer == entry.key()) {
                    continue;
                }

                let idle_time = now.saturating_sub(entry.value().last_access_ms());
                candidates.push((idle_time, *entry.key()));

                if candidates.len() >= to_remove_count {
                    break;
                }
            }
        }

        // Most idle first.
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, peer) in candidates.iter().take(to_remove_count) {
            if self.buckets.remove(peer).is_some() {
                self.active_count.fetch_sub(1, Ordering::AcqRel);
                removed += 1;
            }
        }

        if removed > 0 {
            self.total_cleaned.fetch_add(removed, Ordering::Relaxed);
            info!(
                "emergency cleanup evicted {} buckets (target was {})",
                removed, to_remove_count
            );
        }

        let after = self.active_count.load(Ordering::Acquire);
        if after > CLEANUP_TARGET && removed < to_remove_count as u64 {
            warn!(
                "emergency cleanup incomplete: evicted {}/{}, {} peers remain",
                removed, to_remove_count, after
            );
        }
    }

    /// Routine cleanup pass: evicts buckets idle longer than the
    /// configured duration (half of it when the table is nearly full),
    /// then shrinks the map if it is badly oversized.
    pub fn cleanup(&self) {
        if self.cleanup_in_progress.load(Ordering::Acquire) {
            return;
        }

        let before = self.active_count.load(Ordering::Acquire);

        let threshold_ms = if before > CLEANUP_THRESHOLD {
            self.idle_duration_ms / 2
        } else {
            self.idle_duration_ms
        };
        let idle_for = Duration::from_millis(threshold_ms);

        let mut removed = 0u64;

        self.buckets.retain(|peer, bucket| {
            if !bucket.is_idle(idle_for) {
                true
            } else {
                debug!("evicting idle bucket for peer {}", peer);
                removed += 1;
                self.active_count.fetch_sub(1, Ordering::AcqRel);
                false
            }
        });

        if removed > 0 {
            self.total_cleaned.fetch_add(removed, Ordering::Relaxed);
            debug!("cleanup evicted {} idle buckets", removed);
        }

        self.shrink_to_fit();
    }

    /// Shrinks the map when capacity far exceeds occupancy.
    pub fn shrink_to_fit(&self) {
        let current_size = self.active_count.load(Ordering::Acquire);
        let capacity = self.buckets.capacity();

        if capacity > current_size * 4 && capacity > 1024 {
            self.buckets.shrink_to_fit();
            debug!("shrunk peer table capacity from {} to ~{}", capacity, current_size);
        }
    }

    /// Number of peers currently tracked.
    #[inline]
    pub fn active_peers(&self) -> usize {
        self.active_count.load(Ordering::Acquire)
    }

    /// Snapshot of table occupancy and lifetime churn.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shaper::{BucketConfig, PeerBucketManager};
    ///
    /// let manager = PeerBucketManager::new(BucketConfig::default()).unwrap();
    /// let stats = manager.stats();
    /// println!("{}", stats.summary());
    /// ```
    pub fn stats(&self) -> PeerManagerStats {
        PeerManagerStats {
            active_peers: self.active_peers(),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_cleaned: self.total_cleaned.load(Ordering::Relaxed),
            capacity_used: self.active_peers() as f64 / MAX_TRACKED_PEERS as f64,
            max_capacity: MAX_TRACKED_PEERS,
        }
    }

    /// Spawns a background thread that sweeps idle buckets forever.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shaper::{BucketConfig, PeerBucketManager};
    /// use std::sync::Arc;
    ///
    /// let manager = Arc::new(PeerBucketManager::new(BucketConfig::default()).unwrap());
    /// let handle = manager.clone().start_cleanup_thread();
    /// // Runs until the process exits.
    /// # drop(handle);
    /// ```
    pub fn start_cleanup_thread(self: Arc<Self>) -> thread::JoinHandle<()> {
        let manager = self.clone();

        thread::Builder::new()
            .name("shaper-cleanup".to_string())
            .spawn(move || {
                info!(
                    "started cleanup thread (interval: {}ms, idle threshold: {}ms)",
                    manager.cleanup_interval_ms, manager.idle_duration_ms
                );

                loop {
                    thread::sleep(Duration::from_millis(manager.cleanup_interval_ms));
                    manager.cleanup();

                    let active = manager.active_peers();
                    if active > CLEANUP_THRESHOLD {
                        warn!(
                            "high peer usage: {} buckets ({}% of capacity)",
                            active,
                            (active * 100) / MAX_TRACKED_PEERS
                        );
                    }
                }
            })
            .expect("failed to spawn cleanup thread")
    }

    /// Like [`start_cleanup_thread`](Self::start_cleanup_thread), but
    /// the returned sender stops the thread: send `()` (or drop the
    /// sender) and join the handle.
    pub fn start_stoppable_cleanup_thread(
        self: Arc<Self>,
    ) -> (thread::JoinHandle<()>, mpsc::Sender<()>) {
        let (stop_tx, stop_rx) = mpsc::channel();
        let manager = self.clone();

        let handle = thread::Builder::new()
            .name("shaper-cleanup".to_string())
            .spawn(move || {
                info!(
                    "started stoppable cleanup thread (interval: {}ms)",
                    manager.cleanup_interval_ms
                );

                loop {
                    match stop_rx.recv_timeout(Duration::from_millis(manager.cleanup_interval_ms))
                    {
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                            info!("cleanup thread stopping");
                            break;
                        }
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            manager.cleanup();

                            let active = manager.active_peers();
                            if active > CLEANUP_THRESHOLD {
                                warn!(
                                    "high peer usage: {} buckets ({}% of capacity)",
                                    active,
                                    (active * 100) / MAX_TRACKED_PEERS
                                );
                            }
                        }
                    }
                }
            })
            .expect("failed to spawn cleanup thread");

        (handle, stop_tx)
    }

    /// Drops every bucket, returning the manager to empty.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shaper::{BucketConfig, PeerBucketManager};
    ///
    /// let manager = PeerBucketManager::new(BucketConfig::default()).unwrap();
    /// manager.clear();
    /// assert_eq!(manager.active_peers(), 0);
    /// ```
    pub fn clear(&self) {
        let count = self.buckets.len();
        self.buckets.clear();
        self.active_count.store(0, Ordering::Release);
        self.total_cleaned.fetch_add(count as u64, Ordering::Relaxed);
        info!("cleared all {} peer buckets", count);
    }
}

impl std::fmt::Debug for PeerBucketManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerBucketManager")
            .field("active_peers", &self.active_peers())
            .field("cleanup_interval_ms", &self.cleanup_interval_ms)
            .field("idle_duration_ms", &self.idle_duration_ms)
            .finish()
    }
}

/// Resets the cleanup-in-progress flag however the cleanup exits.
struct CleanupGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> Drop for CleanupGuard<'a> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Occupancy and churn statistics for [`PeerBucketManager`].
#[derive(Debug, Clone)]
pub struct PeerManagerStats {
    /// Number of currently tracked peers.
    pub active_peers: usize,

    /// Buckets created since startup.
    pub total_created: u64,

    /// Buckets reclaimed since startup.
    pub total_cleaned: u64,

    /// Fraction of maximum capacity in use (0.0 to 1.0).
    pub capacity_used: f64,

    /// Maximum number of peers the table will track.
    pub max_capacity: usize,
}

impl PeerManagerStats {
    /// Human-readable multi-line summary.
    pub fn summary(&self) -> String {
        format!(
            "Peer Bucket Manager Stats:\n\
             ├─ Capacity:\n\
             │  ├─ Active Peers: {}/{}\n\
             │  ├─ Capacity Used: {:.2}%\n\
             │  └─ Available Slots: {}\n\
             └─ Lifetime:\n\
                ├─ Total Created: {}\n\
                ├─ Total Cleaned: {}\n\
                └─ Net Active: {}",
            self.active_peers,
            self.max_capacity,
            self.capacity_used * 100.0,
            self.max_capacity - self.active_peers,
            self.total_created,
            self.total_cleaned,
            self.total_created.saturating_sub(self.total_cleaned)
        )
    }

    /// `true` when more than 80% of capacity is in use.
    pub fn is_near_capacity(&self) -> bool {
        self.capacity_used > 0.8
    }

    /// Fraction of created buckets that have been reclaimed. Close to
    /// 1.0 means churn is being kept in check.
    pub fn cleanup_ratio(&self) -> f64 {
        if self.total_created == 0 {
            0.0
        } else {
            self.total_cleaned as f64 / self.total_created as f64
        }
    }
}

impl std::fmt::Display for PeerManagerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.summary())
    }
}
