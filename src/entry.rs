//! Cache Entry Record
//!
//! This module provides the [`CacheEntry`] structure shared by both engine
//! implementations. An entry binds a value to its lifecycle bookkeeping:
//! write time, expiration deadline, access tracking, refresh tracking, and
//! weight.
//!
//! # Design
//!
//! - **Immutable core**: `value`, `weight`, and `write_time` never change
//!   after construction. A logical replacement of a key's value is a remove
//!   plus a fresh entry, never in-place mutation, so readers always observe
//!   a consistent snapshot of one entry.
//! - **Atomic trackers**: `access_time`, `access_count`,
//!   `last_refresh_time`, and `expiration_time` are atomics so the read
//!   path can update them without any lock. Slight staleness between them
//!   is acceptable by contract.
//! - **Expiration**: the deadline is absolute; [`NEVER`](crate::time::NEVER)
//!   marks entries that do not expire. A per-entry custom expiry hook may
//!   move the deadline after a read, which is why it is atomic.
//!
//! # Invariants
//!
//! - `expiration_time >= write_time`
//! - `access_time >= write_time` at every observation
//! - `weight >= 1`
//!
//! # Memory Layout
//!
//! Per-entry overhead on 64-bit targets: one `u64` each for weight and
//! write time plus four `AtomicU64` trackers, 48 bytes on top of the value.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::time::{deadline, NEVER};

/// One cached binding: a value plus its lifecycle bookkeeping.
///
/// Entries are shared behind `Arc` between the index, in-flight readers,
/// and background tasks; all mutable state is atomic.
///
/// # Examples
///
/// ```
/// use loadcache::entry::CacheEntry;
/// use loadcache::time::NEVER;
///
/// // An entry written at t=100ns with a 50ns TTL and weight 1.
/// let entry = CacheEntry::new("value", 50, 1, 100);
/// assert!(!entry.is_expired(120));
/// assert!(entry.is_expired(150));
///
/// // TTL of NEVER means the entry does not expire.
/// let eternal = CacheEntry::new("value", NEVER, 1, 100);
/// assert!(!eternal.is_expired(u64::MAX - 1));
/// ```
pub struct CacheEntry<V> {
    /// The cached value. Never null by construction.
    value: V,

    /// Eviction weight assigned at insertion, at least 1.
    weight: u64,

    /// Monotonic nanosecond timestamp of the write that created this entry.
    write_time: u64,

    /// Absolute expiration deadline; `NEVER` when the entry does not expire.
    /// Atomic because a custom expiry hook may extend it after a read.
    expiration_time: AtomicU64,

    /// Timestamp of the most recent read or write of this entry.
    access_time: AtomicU64,

    /// Number of accesses observed, used by LFU selection and statistics.
    access_count: AtomicU64,

    /// Timestamp of the most recent refresh claim; the refresh scheduler
    /// compare-and-swaps this to guarantee one in-flight reload per key.
    last_refresh_time: AtomicU64,
}

impl<V> CacheEntry<V> {
    /// Creates an entry from a value, a TTL in nanoseconds, a weight, and a
    /// snapshot of the current time.
    ///
    /// A TTL of [`NEVER`](crate::time::NEVER) yields an entry that never
    /// expires. A weight of 0 is promoted to 1 to preserve the weight
    /// invariant.
    pub fn new(value: V, ttl_nanos: u64, weight: u64, now: u64) -> Self {
        CacheEntry {
            value,
            weight: weight.max(1),
            write_time: now,
            expiration_time: AtomicU64::new(deadline(now, ttl_nanos)),
            access_time: AtomicU64::new(now),
            access_count: AtomicU64::new(0),
            last_refresh_time: AtomicU64::new(now),
        }
    }

    /// Returns a reference to the cached value.
    #[inline]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Returns the entry's eviction weight.
    #[inline]
    pub fn weight(&self) -> u64 {
        self.weight
    }

    /// Returns the timestamp of the write that created this entry.
    #[inline]
    pub fn write_time(&self) -> u64 {
        self.write_time
    }

    /// Returns the current absolute expiration deadline.
    #[inline]
    pub fn expiration_time(&self) -> u64 {
        self.expiration_time.load(Ordering::Acquire)
    }

    /// Moves the expiration deadline, clamping so it never precedes the
    /// write time.
    #[inline]
    pub fn set_expiration_time(&self, deadline: u64) {
        self.expiration_time
            .store(deadline.max(self.write_time), Ordering::Release);
    }

    /// Returns the timestamp of the most recent access.
    #[inline]
    pub fn access_time(&self) -> u64 {
        self.access_time.load(Ordering::Relaxed)
    }

    /// Returns the number of accesses recorded for this entry.
    #[inline]
    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// Records a read: bumps the access counter and advances the access
    /// timestamp. Eventual consistency is sufficient here, so plain relaxed
    /// stores are used.
    #[inline]
    pub fn mark_access(&self, now: u64) {
        self.access_time.fetch_max(now, Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the timestamp of the most recent refresh claim.
    #[inline]
    pub fn last_refresh_time(&self) -> u64 {
        self.last_refresh_time.load(Ordering::Acquire)
    }

    /// Claims this entry for a refresh by compare-and-swapping the refresh
    /// timestamp from `observed` to `now`. Returns `true` when the claim
    /// won; a `false` return means another refresh already claimed the
    /// entry and the caller must drop its task.
    #[inline]
    pub fn try_claim_refresh(&self, observed: u64, now: u64) -> bool {
        self.last_refresh_time
            .compare_exchange(observed, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns `true` when `now` has reached the expiration deadline.
    #[inline]
    pub fn is_expired(&self, now: u64) -> bool {
        let deadline = self.expiration_time();
        deadline != NEVER && now >= deadline
    }

    /// Returns `true` when the entry is old enough to be considered for
    /// size or weight eviction. TTL expiration is never gated by this age.
    #[inline]
    pub fn is_eligible_for_eviction(&self, now: u64, min_age_nanos: u64) -> bool {
        now.saturating_sub(self.write_time) >= min_age_nanos
    }

    /// Nanoseconds since the last access, for idle statistics.
    #[inline]
    pub fn idle_nanos(&self, now: u64) -> u64 {
        now.saturating_sub(self.access_time())
    }
}

impl<V: fmt::Debug> fmt::Debug for CacheEntry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("value", &self.value)
            .field("weight", &self.weight)
            .field("write_time", &self.write_time)
            .field("expiration_time", &self.expiration_time())
            .field("access_time", &self.access_time())
            .field("access_count", &self.access_count())
            .finish()
    }
}
