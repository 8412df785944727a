//! Request coalescing for pipeline work.
//!
//! When many requests arrive for the same cache key simultaneously
//! (common when a CDN cold-starts against a popular image), only one
//! caller runs the fetch-and-transform pipeline. The rest wait for that
//! leader to finish and then read the cache.
//!
//! ```text
//! Request A ─┐
//!            │                       ┌──► leader: runs pipeline
//! Request B ─┼──► CoalescingGate ────┤
//!            │                       └──► followers: wait, then
//! Request C ─┘                            re-check the cache
//! ```
//!
//! The gate hands the leader a [`LeaderGuard`]; dropping it releases the
//! followers. Release rides on `Drop` so followers are woken whether the
//! leader finished, failed, or panicked. Followers learn nothing about
//! the leader's outcome from the wakeup itself: the cache is the only
//! source of truth, and a follower that wakes to an incomplete cache
//! re-enters the gate as a fresh caller.
//!
//! Uses `DashMap` for lock-free concurrent registration and atomic
//! counters for statistics.

use crate::key::CacheKey;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Tracks in-flight pipeline work per cache key.
pub struct CoalescingGate {
    /// In-flight work: cache key -> release channel for waiters.
    in_flight: Arc<DashMap<CacheKey, broadcast::Sender<()>>>,
    total_entries: AtomicU64,
    coalesced_entries: AtomicU64,
    leader_entries: AtomicU64,
}

/// Statistics for monitoring coalescing effectiveness.
#[derive(Debug, Default, Clone)]
pub struct GateStats {
    /// Total gate entries.
    pub total_entries: u64,
    /// Entries that waited on an existing leader.
    pub coalesced_entries: u64,
    /// Entries that became the leader for their key.
    pub leader_entries: u64,
}

impl GateStats {
    /// Returns the coalescing ratio (0.0 to 1.0).
    pub fn coalescing_ratio(&self) -> f64 {
        if self.total_entries == 0 {
            0.0
        } else {
            self.coalesced_entries as f64 / self.total_entries as f64
        }
    }
}

/// Outcome of entering the gate for a key.
pub enum GateEntry {
    /// This caller owns the pipeline for the key. Drop the guard when the
    /// cache holds whatever this attempt is going to produce.
    Leader(LeaderGuard),
    /// Another caller is already running the pipeline. Wait on the handle,
    /// then re-check the cache.
    Follower(WaitHandle),
}

impl GateEntry {
    /// Whether this entry won leadership for its key.
    pub fn is_leader(&self) -> bool {
        matches!(self, GateEntry::Leader(_))
    }
}

/// Exclusive claim on pipeline work for one key.
///
/// Dropping the guard removes the in-flight entry and releases every
/// follower, regardless of how the leader's attempt ended.
pub struct LeaderGuard {
    key: CacheKey,
    in_flight: Arc<DashMap<CacheKey, broadcast::Sender<()>>>,
    release_tx: broadcast::Sender<()>,
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        // Remove before sending so a woken follower that re-enters finds
        // the key vacant and can claim leadership itself.
        self.in_flight.remove(&self.key);
        let _ = self.release_tx.send(());
    }
}

/// A follower's ticket to wait for the current leader.
pub struct WaitHandle {
    rx: broadcast::Receiver<()>,
}

impl WaitHandle {
    /// Waits until the leader for this key is gone.
    ///
    /// Both the release broadcast and a closed channel mean the same
    /// thing: nobody holds the key any more. The caller must re-check the
    /// cache either way; the wakeup carries no verdict.
    pub async fn released(mut self) {
        let _ = self.rx.recv().await;
    }
}

impl CoalescingGate {
    /// Creates a new gate with no in-flight work.
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
            total_entries: AtomicU64::new(0),
            coalesced_entries: AtomicU64::new(0),
            leader_entries: AtomicU64::new(0),
        }
    }

    /// Enters the gate for a key.
    ///
    /// The first caller for a key becomes [`GateEntry::Leader`]; callers
    /// arriving while the leader's guard is alive become
    /// [`GateEntry::Follower`]. The entry API makes the check-and-claim
    /// atomic, so exactly one concurrent caller wins.
    pub fn enter(&self, key: &CacheKey) -> GateEntry {
        self.total_entries.fetch_add(1, Ordering::Relaxed);

        match self.in_flight.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                let rx = entry.get().subscribe();
                self.coalesced_entries.fetch_add(1, Ordering::Relaxed);
                debug!(
                    key = %key,
                    coalesced = self.coalesced_entries.load(Ordering::Relaxed),
                    "coalescing onto in-flight pipeline work"
                );
                GateEntry::Follower(WaitHandle { rx })
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                // Capacity 1: a single release message is ever sent.
                let (tx, _rx) = broadcast::channel(1);
                entry.insert(tx.clone());
                self.leader_entries.fetch_add(1, Ordering::Relaxed);
                debug!(
                    key = %key,
                    in_flight = self.in_flight.len(),
                    "claimed pipeline leadership"
                );
                GateEntry::Leader(LeaderGuard {
                    key: key.clone(),
                    in_flight: Arc::clone(&self.in_flight),
                    release_tx: tx,
                })
            }
        }
    }

    /// Returns a snapshot of the current statistics.
    pub fn stats(&self) -> GateStats {
        GateStats {
            total_entries: self.total_entries.load(Ordering::Relaxed),
            coalesced_entries: self.coalesced_entries.load(Ordering::Relaxed),
            leader_entries: self.leader_entries.load(Ordering::Relaxed),
        }
    }

    /// Returns the number of keys with in-flight work.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Logs current statistics.
    pub fn log_stats(&self) {
        let stats = self.stats();
        info!(
            total_entries = stats.total_entries,
            coalesced = stats.coalesced_entries,
            leaders = stats.leader_entries,
            in_flight = self.in_flight_count(),
            coalescing_ratio = format!("{:.1}%", stats.coalescing_ratio() * 100.0),
            "request coalescing statistics"
        );
    }
}

impl Default for CoalescingGate {
    fn default() -> Self {
        Self::new()
    }
}
