//! Cache Metrics
//!
//! Atomic counters recorded on the hot paths plus read-only derived views.
//! When `record_stats` is off the recorders are no-ops and every counter
//! stays at zero.
//!
//! Consumers take a [`MetricsSnapshot`] and either read the derived
//! accessors or export the whole set through
//! [`to_btreemap`](MetricsSnapshot::to_btreemap), which keeps keys in
//! deterministic alphabetical order so external registries and test
//! output stay reproducible.
//!
//! Two further views are computed from the live index rather than from
//! counters: the idle-entry count and the expiry distribution, both
//! surfaced on the cache facade. [`CostModel`] is the byte-cost hook: a
//! deliberately simple linear estimate from caller-supplied constants.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use std::collections::BTreeMap;

use crate::time::NEVER;

/// Default idle threshold for the idle-entry view: five minutes.
pub const DEFAULT_IDLE_THRESHOLD_NANOS: u64 = 5 * 60 * 1_000_000_000;

/// Atomic counter block shared by the engine's hot paths.
#[derive(Default)]
pub(crate) struct CacheMetrics {
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    load_successes: AtomicU64,
    load_failures: AtomicU64,
    total_load_time_nanos: AtomicU64,
    evictions: AtomicU64,
}

impl CacheMetrics {
    pub(crate) fn new(enabled: bool) -> Self {
        CacheMetrics {
            enabled,
            ..CacheMetrics::default()
        }
    }

    #[inline]
    pub(crate) fn record_hit(&self) {
        if self.enabled {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_miss(&self) {
        if self.enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_load_success(&self, load_time_nanos: u64) {
        if self.enabled {
            self.load_successes.fetch_add(1, Ordering::Relaxed);
            self.total_load_time_nanos
                .fetch_add(load_time_nanos, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_load_failure(&self, load_time_nanos: u64) {
        if self.enabled {
            self.load_failures.fetch_add(1, Ordering::Relaxed);
            self.total_load_time_nanos
                .fetch_add(load_time_nanos, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_eviction(&self) {
        if self.enabled {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Captures a consistent-enough point-in-time copy of the counters.
    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            load_success_count: self.load_successes.load(Ordering::Relaxed),
            load_failure_count: self.load_failures.load(Ordering::Relaxed),
            total_load_time_nanos: self.total_load_time_nanos.load(Ordering::Relaxed),
            eviction_count: self.evictions.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for CacheMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.snapshot().fmt(f)
    }
}

/// Read-only view of the counters with derived rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Reads that found a live entry.
    pub hit_count: u64,
    /// Reads that found nothing (or an expired entry).
    pub miss_count: u64,
    /// Loader invocations that produced a value.
    pub load_success_count: u64,
    /// Loader invocations that failed or produced no value.
    pub load_failure_count: u64,
    /// Wall time spent inside loaders, nanoseconds.
    pub total_load_time_nanos: u64,
    /// Entries removed by size, weight, or expiration.
    pub eviction_count: u64,
}

impl MetricsSnapshot {
    /// Total read requests: hits plus misses.
    #[inline]
    pub fn request_count(&self) -> u64 {
        self.hit_count + self.miss_count
    }

    /// Total loader invocations.
    #[inline]
    pub fn load_count(&self) -> u64 {
        self.load_success_count + self.load_failure_count
    }

    /// Fraction of requests served from cache; defined as 1.0 when no
    /// requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let requests = self.request_count();
        if requests == 0 {
            1.0
        } else {
            self.hit_count as f64 / requests as f64
        }
    }

    /// Fraction of requests that missed; complements [`hit_rate`](Self::hit_rate).
    pub fn miss_rate(&self) -> f64 {
        let requests = self.request_count();
        if requests == 0 {
            0.0
        } else {
            self.miss_count as f64 / requests as f64
        }
    }

    /// Mean nanoseconds spent per loader invocation; 0.0 before any load.
    pub fn average_load_penalty_nanos(&self) -> f64 {
        let loads = self.load_count();
        if loads == 0 {
            0.0
        } else {
            self.total_load_time_nanos as f64 / loads as f64
        }
    }

    /// Exports every counter and derived rate with deterministic key
    /// order, for metric registry adapters.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        metrics.insert("average_load_penalty_nanos".to_string(), self.average_load_penalty_nanos());
        metrics.insert("eviction_count".to_string(), self.eviction_count as f64);
        metrics.insert("hit_count".to_string(), self.hit_count as f64);
        metrics.insert("hit_rate".to_string(), self.hit_rate());
        metrics.insert("load_count".to_string(), self.load_count() as f64);
        metrics.insert("load_failure_count".to_string(), self.load_failure_count as f64);
        metrics.insert("load_success_count".to_string(), self.load_success_count as f64);
        metrics.insert("miss_count".to_string(), self.miss_count as f64);
        metrics.insert("miss_rate".to_string(), self.miss_rate());
        metrics.insert("request_count".to_string(), self.request_count() as f64);
        metrics.insert(
            "total_load_time_nanos".to_string(),
            self.total_load_time_nanos as f64,
        );
        metrics
    }
}

/// Histogram of time remaining until expiration across resident entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryDistribution {
    /// Expiring within one minute.
    pub under_1m: u64,
    /// Expiring in one to five minutes.
    pub under_5m: u64,
    /// Expiring in five to fifteen minutes.
    pub under_15m: u64,
    /// Expiring in fifteen minutes to one hour.
    pub under_1h: u64,
    /// Expiring in one to twenty-four hours.
    pub under_24h: u64,
    /// Expiring beyond twenty-four hours.
    pub over_24h: u64,
    /// Not expiring at all.
    pub never: u64,
}

impl ExpiryDistribution {
    const MINUTE: u64 = 60 * 1_000_000_000;

    /// Buckets one entry by its remaining lifetime. `deadline` is the
    /// entry's absolute expiration, `now` the observation instant.
    pub(crate) fn record(&mut self, deadline: u64, now: u64) {
        if deadline == NEVER {
            self.never += 1;
            return;
        }
        let remaining = deadline.saturating_sub(now);
        if remaining < Self::MINUTE {
            self.under_1m += 1;
        } else if remaining < 5 * Self::MINUTE {
            self.under_5m += 1;
        } else if remaining < 15 * Self::MINUTE {
            self.under_15m += 1;
        } else if remaining < 60 * Self::MINUTE {
            self.under_1h += 1;
        } else if remaining < 24 * 60 * Self::MINUTE {
            self.under_24h += 1;
        } else {
            self.over_24h += 1;
        }
    }

    /// Total entries observed.
    pub fn total(&self) -> u64 {
        self.under_1m
            + self.under_5m
            + self.under_15m
            + self.under_1h
            + self.under_24h
            + self.over_24h
            + self.never
    }
}

/// Linear byte-cost estimate from caller-supplied constants.
///
/// The estimate is deliberately crude: `entries * (overhead + key + value)`.
/// It exists as a budgeting hook, not as an accounting of real allocations.
#[derive(Debug, Clone, Copy)]
pub struct CostModel {
    /// Fixed per-entry bookkeeping bytes (index slot, entry record).
    pub entry_overhead_bytes: u64,
    /// Average serialized key size.
    pub avg_key_bytes: u64,
    /// Average serialized value size.
    pub avg_value_bytes: u64,
}

impl Default for CostModel {
    fn default() -> Self {
        CostModel {
            entry_overhead_bytes: 80,
            avg_key_bytes: 32,
            avg_value_bytes: 256,
        }
    }
}

impl CostModel {
    /// Estimated bytes for `entry_count` resident entries.
    pub fn estimate(&self, entry_count: u64) -> u64 {
        entry_count.saturating_mul(
            self.entry_overhead_bytes + self.avg_key_bytes + self.avg_value_bytes,
        )
    }
}
