//! Public Cache Facade
//!
//! [`Cache`] is the one type users hold. It is constructed from a frozen
//! [`CacheConfig`], dispatches every operation to the engine the
//! configured strategy selected, and owns the background housekeeping
//! (expiration sweeper and refresh scheduler) so that dropping or
//! shutting down the cache tears every thread down.
//!
//! # Read/write surface
//!
//! | Operation | Notes |
//! |-----------|-------|
//! | [`get_if_present`](Cache::get_if_present) | plain probe, counts hit or miss |
//! | [`get`](Cache::get) | loading probe, single-flight loader |
//! | [`get_all`](Cache::get_all) | bulk loading probe |
//! | [`get_all_present`](Cache::get_all_present) | bulk plain probe |
//! | [`get_or_compute`](Cache::get_or_compute) | per-call compute function |
//! | [`put`](Cache::put) / [`put_all`](Cache::put_all) | insert or replace |
//! | [`invalidate`](Cache::invalidate) / [`invalidate_many`](Cache::invalidate_many) / [`invalidate_all`](Cache::invalidate_all) | explicit removal |
//! | [`refresh`](Cache::refresh) | asynchronous reload of one key |
//! | [`clean_up`](Cache::clean_up) | synchronous expiration sweep |
//!
//! # Examples
//!
//! ```
//! use loadcache::{Cache, CacheConfig};
//!
//! let cache: Cache<&str, i32> = Cache::new(CacheConfig {
//!     maximum_size: Some(2),
//!     ..CacheConfig::default()
//! })
//! .unwrap();
//!
//! cache.put("a", 1);
//! cache.put("b", 2);
//! assert_eq!(cache.get_if_present(&"a"), Some(1));
//!
//! cache.invalidate(&"a");
//! assert_eq!(cache.get_if_present(&"a"), None);
//! ```

use core::fmt;
use core::hash::Hash;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::{CacheConfig, Strategy};
use crate::engine::{
    fast::FastEngine, loading_get, loading_get_all, refresh_one, refresh_pass, strict::StrictEngine,
    ComputeFn, EngineCore,
};
use crate::error::{BoxError, CacheError};
use crate::metrics::{
    CostModel, ExpiryDistribution, MetricsSnapshot, DEFAULT_IDLE_THRESHOLD_NANOS,
};
use crate::scheduler::Periodic;
use crate::time::duration_nanos;

/// How often the background sweeper scans for expired entries.
const SWEEP_PERIOD: Duration = Duration::from_secs(1);

/// Default period of the refresh pass when no fixed interval narrows it.
const REFRESH_PASS_DEFAULT: Duration = Duration::from_secs(30);

/// A refresh pass runs at half the fixed interval, but never more often
/// than this.
const REFRESH_PASS_MIN: Duration = Duration::from_millis(10);

/// A thread-safe, optionally loading, bounded key-value cache.
///
/// Cheap operations are safe to call from any number of threads; share
/// the cache itself behind an [`Arc`]. Dropping the cache (or calling
/// [`shutdown`](Cache::shutdown)) cancels the background tasks and stops
/// the worker threads.
pub struct Cache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    engine: Arc<dyn EngineCore<K, V>>,
    housekeeping: Mutex<Vec<Periodic>>,
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Builds a cache from a validated configuration record.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidConfiguration`] when the record fails
    /// [`CacheConfig::validate`].
    pub fn new(config: CacheConfig<K, V>) -> Result<Self, CacheError> {
        config.validate()?;
        let sweep_needed = config.expire_after_write.is_some()
            || config.expire_after_access.is_some()
            || config.expiry.is_some();
        let refresh_needed = config.refresh_enabled();
        let refresh_period = refresh_pass_period(config.refresh_after_write);

        let engine: Arc<dyn EngineCore<K, V>> = match config.strategy {
            Strategy::Fast => Arc::new(FastEngine::new(config)),
            Strategy::Strict => Arc::new(StrictEngine::new(config)),
        };

        let mut tasks = Vec::new();
        if sweep_needed {
            let sweeper = Arc::clone(&engine);
            tasks.push(Periodic::spawn("loadcache-sweeper", SWEEP_PERIOD, move || {
                sweeper.clean_up()
            }));
        }
        if refresh_needed {
            let refresher = Arc::clone(&engine);
            tasks.push(Periodic::spawn(
                "loadcache-refresher",
                refresh_period,
                move || refresh_pass(&refresher),
            ));
        }
        Ok(Cache {
            engine,
            housekeeping: Mutex::new(tasks),
        })
    }

    /// Returns the value bound to `key`, or `None`. Counts a hit or a
    /// miss; an expired entry encountered here is removed and reported as
    /// a miss plus an eviction.
    pub fn get_if_present(&self, key: &K) -> Option<V> {
        match self.engine.read(key) {
            Some(value) => Some(value),
            None => {
                self.engine.shared().metrics.record_miss();
                None
            }
        }
    }

    /// Returns the cached value or loads it through the configured
    /// loader with single-flight semantics: at most one loader runs per
    /// key, concurrent callers share its outcome.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Unsupported`] without a configured loader.
    /// - [`CacheError::Loader`] / [`CacheError::LoaderNullValue`] when
    ///   the load fails; nothing is inserted.
    pub fn get(&self, key: &K) -> Result<V, CacheError> {
        loading_get(&self.engine, key)
    }

    /// Returns the cached value or computes it with `f`, which runs under
    /// this key's write arbitration. `f` must not reenter the cache.
    ///
    /// # Errors
    ///
    /// Propagates `f`'s failure as [`CacheError::Loader`]; nothing is
    /// inserted.
    pub fn get_or_compute<F>(&self, key: K, f: F) -> Result<V, CacheError>
    where
        F: FnOnce(&K) -> Result<V, BoxError>,
    {
        let compute: ComputeFn<'_, K, V> = Box::new(|key| f(key).map(Some));
        self.engine.get_or_compute(key, compute)
    }

    /// Returns the subset of `keys` the cache can serve, loading the
    /// missing ones: through the loader's bulk operation when supported,
    /// otherwise as parallel per-key loads whose individual failures are
    /// skipped.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Unsupported`] without a configured loader.
    /// - [`CacheError::Loader`] when the bulk loader itself fails.
    pub fn get_all<I>(&self, keys: I) -> Result<HashMap<K, V>, CacheError>
    where
        I: IntoIterator<Item = K>,
    {
        loading_get_all(&self.engine, keys.into_iter().collect())
    }

    /// Returns the subset of `keys` with live cached values, never
    /// loading. Counts read-path hits and misses.
    pub fn get_all_present<I>(&self, keys: I) -> HashMap<K, V>
    where
        I: IntoIterator<Item = K>,
    {
        let mut found = HashMap::new();
        let mut seen_absent = std::collections::HashSet::new();
        for key in keys {
            if found.contains_key(&key) || seen_absent.contains(&key) {
                continue;
            }
            match self.engine.read(&key) {
                Some(value) => {
                    found.insert(key, value);
                }
                None => {
                    self.engine.shared().metrics.record_miss();
                    seen_absent.insert(key);
                }
            }
        }
        found
    }

    /// Binds `key` to `value`, replacing any previous binding (the old
    /// entry leaves with cause `replaced`) and evicting as the caps
    /// require.
    pub fn put(&self, key: K, value: V) {
        self.engine.put(key, value);
    }

    /// Applies [`put`](Cache::put) to every pair.
    pub fn put_all<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in entries {
            self.engine.put(key, value);
        }
    }

    /// Removes `key`'s binding, firing the explicit removal event.
    pub fn invalidate(&self, key: &K) {
        self.engine.invalidate(key);
    }

    /// Invalidates every key in `keys`.
    pub fn invalidate_many<I>(&self, keys: I)
    where
        I: IntoIterator<Item = K>,
    {
        for key in keys {
            self.engine.invalidate(&key);
        }
    }

    /// Invalidates everything: snapshots the resident keys, then removes
    /// each with cause `explicit`.
    pub fn invalidate_all(&self) {
        let keys: Vec<K> = self
            .engine
            .shared()
            .index
            .iter()
            .map(|item| item.key().clone())
            .collect();
        for key in keys {
            self.engine.invalidate(&key);
        }
    }

    /// Number of resident entries (expired entries not yet swept count).
    pub fn len(&self) -> usize {
        self.engine.shared().index.len()
    }

    /// True when no entries are resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when `key` has a live binding. Touches no counters and no
    /// policy state.
    pub fn contains_key(&self, key: &K) -> bool {
        let shared = self.engine.shared();
        match shared.index.get(key) {
            Some(entry) => !shared.expiration.is_expired(entry.value().as_ref(), shared.now()),
            None => false,
        }
    }

    /// Read-only snapshot of all live bindings, skipping expired entries.
    pub fn as_map(&self) -> HashMap<K, V> {
        self.engine.as_map()
    }

    /// Synchronously sweeps the index for expired entries. The background
    /// sweeper calls this on its own schedule; manual calls are for tests
    /// and quiescent shutdown paths.
    pub fn clean_up(&self) {
        self.engine.clean_up();
    }

    /// Asynchronously reloads `key` through the loader. Returns
    /// immediately; readers keep the old value until the reload lands. At
    /// most one reload per key is in flight. Without a loader (or for an
    /// absent key) this is a logged no-op.
    pub fn refresh(&self, key: &K) {
        refresh_one(&self.engine, key);
    }

    /// Sum of resident entry weights. Eventually consistent with the
    /// index; fast mode may overshoot the cap by the soft tolerance until
    /// the next eviction pass.
    pub fn current_weight(&self) -> u64 {
        self.engine.shared().current_weight()
    }

    /// Point-in-time copy of the hit/miss/load/eviction counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.engine.shared().metrics.snapshot()
    }

    /// Number of entries idle (unread) for at least `threshold`,
    /// defaulting to five minutes.
    pub fn idle_entry_count(&self, threshold: Option<Duration>) -> u64 {
        let shared = self.engine.shared();
        let threshold = threshold
            .map(duration_nanos)
            .unwrap_or(DEFAULT_IDLE_THRESHOLD_NANOS);
        let now = shared.now();
        shared
            .index
            .iter()
            .filter(|item| item.value().idle_nanos(now) >= threshold)
            .count() as u64
    }

    /// Histogram of time remaining until expiration across resident
    /// entries.
    pub fn expiry_distribution(&self) -> ExpiryDistribution {
        let shared = self.engine.shared();
        let now = shared.now();
        let mut dist = ExpiryDistribution::default();
        for item in shared.index.iter() {
            dist.record(item.value().expiration_time(), now);
        }
        dist
    }

    /// Estimated resident byte cost under the given model.
    pub fn estimated_byte_cost(&self, model: &CostModel) -> u64 {
        model.estimate(self.len() as u64)
    }

    /// Cancels the background tasks and stops the worker threads. Safe to
    /// call more than once; also runs on drop.
    pub fn shutdown(&self) {
        let mut tasks = self.housekeeping.lock();
        for mut task in tasks.drain(..) {
            task.shutdown();
        }
        self.engine.shared().shutdown_pool();
    }
}

impl<K, V> Drop for Cache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        let mut tasks = self.housekeeping.lock();
        for mut task in tasks.drain(..) {
            task.shutdown();
        }
        // Joining the pool here, while the caller's thread still owns the
        // cache, keeps workers from ever having to join themselves.
        self.engine.shared().shutdown_pool();
    }
}

impl<K, V> fmt::Debug for Cache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache").field("len", &self.len()).finish()
    }
}

/// Refresh passes run at half the fixed interval (bounded below), so a
/// freshly due entry waits at most half an interval to be noticed; with
/// only a custom policy there is no interval to halve and the default
/// cadence applies.
fn refresh_pass_period(fixed: Option<Duration>) -> Duration {
    match fixed {
        Some(interval) => (interval / 2).clamp(REFRESH_PASS_MIN, REFRESH_PASS_DEFAULT),
        None => REFRESH_PASS_DEFAULT,
    }
}
