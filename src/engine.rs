//! Concurrent Cache Engine
//!
//! The engine is split three ways, mirroring how the two operating modes
//! share most of their machinery:
//!
//! - [`EngineShared`]: state and logic common to both modes. The main
//!   index (a sharded concurrent map of `Arc`'d entries), weight
//!   accounting, metrics, the in-flight load table, the worker pool, the
//!   frequency sketch, and every user contract (loader, listeners,
//!   writer, expiry, weigher, refresh policy) live here.
//! - [`fast::FastEngine`]: lock-free reads and writes, deferred amortized
//!   eviction with sampled victim selection.
//! - [`strict::StrictEngine`]: per-key reader/writer locks (a fixed
//!   sharded array), exact policy-ordered eviction under a policy mutex.
//!
//! Both engines implement the object-safe [`EngineCore`] trait; the
//! public facade holds an `Arc<dyn EngineCore>` chosen at construction,
//! so no hot path ever branches on the strategy.
//!
//! The loading operations (single-flight `get`, bulk `get_all`, the
//! refresh pass) are mode-independent and implemented here as free
//! functions over the trait object.
//!
//! # Entry lifecycle
//!
//! ```text
//!   absent ──put/load──▶ present ──invalidate/replace/expire/evict──▶ absent
//!                           │
//!                           └── reads update atomics only; a value
//!                               replacement is remove + fresh entry
//! ```

use core::hash::{BuildHasher, Hash};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use hashbrown::DefaultHashBuilder;
use log::{debug, warn};
use parking_lot::Mutex;

use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::error::{BoxError, CacheError};
use crate::expiry::{ttl_or_fallback, Expiration, Expiry};
use crate::listener::{
    notify_put, notify_removal, writer_delete, writer_write, CacheWriter, PutCause, PutListener,
    RemovalCause, RemovalListener,
};
use crate::loader::{CacheLoader, FlightRole, InFlightLoads};
use crate::metrics::CacheMetrics;
use crate::refresh::{
    interval_or_fallback, notify_refresh_failure, notify_refresh_success, RefreshPolicy,
};
use crate::scheduler::WorkerPool;
use crate::sketch::FrequencySketch;
use crate::time::{deadline, duration_nanos, Clock, NEVER};
use crate::weigher::{weigh_or_default, Weigher};

pub(crate) mod fast;
pub(crate) mod strict;

/// Minimum age before a strict-mode entry may be evicted for size or
/// weight. The gate orders victims, it does not veto eviction: when a hard
/// cap is violated and nothing is old enough, selection reruns unaged.
pub(crate) const MIN_EVICTION_AGE_STRICT: u64 = 1_000_000_000;

/// Bounded wait for a strict-mode read lock; on timeout the read degrades
/// to a miss.
pub(crate) const READ_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Fast mode runs its eviction pass every this many puts.
pub(crate) const DEFERRED_EVICTION_BATCH: usize = 100;

/// Fast mode also triggers eviction when a cap is overshot by this factor.
pub(crate) const SOFT_OVERSHOOT_NUM: u64 = 105;
/// Denominator of the soft overshoot factor.
pub(crate) const SOFT_OVERSHOOT_DEN: u64 = 100;

/// Sample size for fast-mode victim selection.
pub(crate) const EVICTION_SAMPLE: usize = 20;

/// The concurrent key-to-entry index.
pub(crate) type Index<K, V> = DashMap<K, Arc<CacheEntry<V>>, DefaultHashBuilder>;

/// Fallible per-call compute function used by `get_or_compute`.
pub(crate) type ComputeFn<'a, K, V> = Box<dyn FnOnce(&K) -> Result<Option<V>, BoxError> + 'a>;

/// State and behavior common to both engines.
pub(crate) struct EngineShared<K, V> {
    pub(crate) index: Index<K, V>,
    pub(crate) metrics: CacheMetrics,
    pub(crate) clock: Clock,
    pub(crate) flights: InFlightLoads<K, V>,
    /// Keys with a reload in flight; membership is what bounds refresh to
    /// one reload per key even when reloads outlast the refresh interval.
    refreshing: DashMap<K, ()>,
    pool: Mutex<WorkerPool>,

    pub(crate) max_size: Option<u64>,
    pub(crate) max_weight: Option<u64>,
    pub(crate) expiration: Expiration,
    pub(crate) refresh_interval_fixed: Option<u64>,
    pub(crate) min_eviction_age: u64,

    current_weight: AtomicU64,
    hash_builder: DefaultHashBuilder,
    pub(crate) sketch: Option<FrequencySketch>,

    pub(crate) loader: Option<Arc<dyn CacheLoader<K, V>>>,
    pub(crate) refresh_policy: Option<Arc<dyn RefreshPolicy<K, V>>>,
    removal_listener: Option<Arc<dyn RemovalListener<K, V>>>,
    put_listener: Option<Arc<dyn PutListener<K, V>>>,
    writer: Option<Arc<dyn CacheWriter<K, V>>>,
    expiry: Option<Arc<dyn Expiry<K, V>>>,
    weigher: Option<Arc<dyn Weigher<K, V>>>,
}

impl<K, V> EngineShared<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Consumes the validated configuration record into shared state.
    pub(crate) fn from_config(config: CacheConfig<K, V>, min_eviction_age: u64) -> Self {
        let capacity = config.capacity_hint();
        let sketch = match config.eviction_policy {
            crate::policy::EvictionPolicyKind::WindowTinyLfu => {
                Some(FrequencySketch::with_capacity(capacity))
            }
            _ => None,
        };
        let hash_builder = DefaultHashBuilder::default();
        let workers = num_cpus::get().clamp(2, 8);
        EngineShared {
            index: DashMap::with_capacity_and_hasher(
                config.effective_initial_capacity(),
                hash_builder.clone(),
            ),
            metrics: CacheMetrics::new(config.record_stats),
            clock: Clock::new(),
            flights: InFlightLoads::new(),
            refreshing: DashMap::new(),
            pool: Mutex::new(WorkerPool::new("loadcache-worker", workers)),
            max_size: config.maximum_size,
            max_weight: config.maximum_weight,
            expiration: Expiration {
                after_write: config.expire_after_write.map(duration_nanos),
                after_access: config.expire_after_access.map(duration_nanos),
            },
            refresh_interval_fixed: config.refresh_after_write.map(duration_nanos),
            min_eviction_age,
            current_weight: AtomicU64::new(0),
            hash_builder,
            sketch,
            loader: config.loader,
            refresh_policy: config.refresh_policy,
            removal_listener: config.removal_listener,
            put_listener: config.put_listener,
            writer: config.writer,
            expiry: config.expiry,
            weigher: config.weigher,
        }
    }

    #[inline]
    pub(crate) fn now(&self) -> u64 {
        self.clock.now_nanos()
    }

    #[inline]
    pub(crate) fn key_hash(&self, key: &K) -> u64 {
        self.hash_builder.hash_one(key)
    }

    /// Feeds the frequency sketch when the policy carries one.
    #[inline]
    pub(crate) fn note_access(&self, key: &K) {
        if let Some(sketch) = &self.sketch {
            sketch.increment(self.key_hash(key));
        }
    }

    /// Sketch frequency of a key, zero without a sketch.
    #[inline]
    pub(crate) fn frequency(&self, key: &K) -> u8 {
        self.sketch
            .as_ref()
            .map(|s| s.frequency(self.key_hash(key)))
            .unwrap_or(0)
    }

    #[inline]
    pub(crate) fn current_weight(&self) -> u64 {
        self.current_weight.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn add_weight(&self, weight: u64) {
        self.current_weight.fetch_add(weight, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn sub_weight(&self, weight: u64) {
        let _ = self
            .current_weight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |w| {
                Some(w.saturating_sub(weight))
            });
    }

    /// True while the entry-count cap is exceeded.
    #[inline]
    pub(crate) fn size_violated(&self) -> bool {
        self.max_size
            .is_some_and(|cap| self.index.len() as u64 > cap)
    }

    /// True while the weight cap is exceeded.
    #[inline]
    pub(crate) fn weight_violated(&self) -> bool {
        self.max_weight.is_some_and(|cap| self.current_weight() > cap)
    }

    /// Builds a fresh entry for `value`, pricing it with the weigher and
    /// asking the custom expiry (create or update hook, by whether the key
    /// was resident) for its TTL, defaulting to the fixed write TTL.
    pub(crate) fn build_entry(
        &self,
        key: &K,
        value: V,
        now: u64,
        existing: Option<&CacheEntry<V>>,
    ) -> CacheEntry<V> {
        let weight = weigh_or_default(self.weigher.as_deref(), key, &value);
        let fallback = self.expiration.write_ttl();
        let ttl = match &self.expiry {
            None => fallback,
            Some(expiry) => match existing {
                None => ttl_or_fallback(
                    expiry.expire_after_create(key, &value, now),
                    fallback,
                    "create",
                ),
                Some(old) => ttl_or_fallback(
                    expiry.expire_after_update(key, &value, now, remaining(old, now)),
                    fallback,
                    "update",
                ),
            },
        };
        CacheEntry::new(value, ttl, weight, now)
    }

    /// Lets the custom expiry move the deadline after a read.
    pub(crate) fn apply_read_expiry(&self, key: &K, entry: &CacheEntry<V>, now: u64) {
        if let Some(expiry) = &self.expiry {
            let current = remaining(entry, now);
            let ttl = ttl_or_fallback(
                expiry.expire_after_read(key, entry.value(), now, current),
                current,
                "read",
            );
            if ttl != current {
                entry.set_expiration_time(deadline(now, ttl));
            }
        }
    }

    /// Bookkeeping for an entry that just left the index: weight release,
    /// writer delete, eviction counting, removal event. `Replaced`
    /// removals skip the writer delete, since the writer already saw the
    /// overwriting `write`.
    pub(crate) fn on_entry_removed(&self, key: &K, entry: &CacheEntry<V>, cause: RemovalCause) {
        self.sub_weight(entry.weight());
        if cause != RemovalCause::Replaced {
            writer_delete(self.writer.as_deref(), key, entry.value(), cause);
        }
        if cause.was_evicted() {
            self.metrics.record_eviction();
        }
        notify_removal(self.removal_listener.as_deref(), key, entry.value(), cause);
    }

    /// Bookkeeping for an entry that just entered the index: weight
    /// charge, writer write, put event.
    pub(crate) fn on_entry_inserted(&self, key: &K, entry: &CacheEntry<V>, cause: PutCause) {
        self.add_weight(entry.weight());
        writer_write(self.writer.as_deref(), key, entry.value());
        notify_put(self.put_listener.as_deref(), key, entry.value(), cause);
    }

    /// Marks `key` as having a reload in flight. Returns `false` when one
    /// already is.
    fn try_begin_refresh(&self, key: &K) -> bool {
        match self.refreshing.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(());
                true
            }
        }
    }

    /// Clears `key`'s in-flight reload marker.
    fn end_refresh(&self, key: &K) {
        self.refreshing.remove(key);
    }

    /// Queues a background job on the worker pool.
    pub(crate) fn submit<F: FnOnce() + Send + 'static>(&self, job: F) {
        self.pool.lock().execute(job);
    }

    /// Stops the worker pool; queued jobs drain first.
    pub(crate) fn shutdown_pool(&self) {
        self.pool.lock().shutdown();
    }
}

/// Time remaining before `entry` expires, [`NEVER`] when it does not.
#[inline]
fn remaining<V>(entry: &CacheEntry<V>, now: u64) -> u64 {
    let deadline = entry.expiration_time();
    if deadline == NEVER {
        NEVER
    } else {
        deadline.saturating_sub(now)
    }
}

/// The operation set both engines implement. Object-safe so the facade
/// can hold either engine behind one `Arc<dyn EngineCore>`.
pub(crate) trait EngineCore<K, V>: Send + Sync {
    /// Shared state accessor.
    fn shared(&self) -> &EngineShared<K, V>;

    /// Probes for a live entry. A hit records the hit counter, access
    /// tracking, and policy state; expired-on-read removes the entry and
    /// counts the eviction. Absence records nothing, leaving miss
    /// attribution to the caller.
    fn read(&self, key: &K) -> Option<V>;

    /// Inserts or replaces a binding, firing events and enforcing caps.
    fn put(&self, key: K, value: V);

    /// Returns the cached value or computes, installs, and returns it.
    /// The compute function runs under this key's write arbitration.
    fn get_or_compute(&self, key: K, f: ComputeFn<'_, K, V>) -> Result<V, CacheError>;

    /// Removes a binding, firing the explicit removal event.
    fn invalidate(&self, key: &K);

    /// Sweeps the index for expired entries.
    fn clean_up(&self);

    /// Snapshot of all live bindings, skipping expired ones.
    fn as_map(&self) -> HashMap<K, V>;

    /// Replaces a resident entry with a refreshed value; a key that was
    /// invalidated while the reload ran is left absent.
    fn install_refreshed(&self, key: &K, value: V);
}

// ---------------------------------------------------------------------------
// Mode-independent loading operations over the trait object.
// ---------------------------------------------------------------------------

/// Single-flight loading `get`: the winning thread runs the loader, every
/// concurrent caller for the same key attaches to the in-flight load and
/// shares its outcome. The winner records the miss and the load; satisfied
/// waiters record hits.
pub(crate) fn loading_get<K, V>(
    engine: &Arc<dyn EngineCore<K, V>>,
    key: &K,
) -> Result<V, CacheError>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let shared = engine.shared();
    if let Some(value) = engine.read(key) {
        return Ok(value);
    }
    let Some(loader) = shared.loader.clone() else {
        return Err(CacheError::Unsupported("get"));
    };

    match shared.flights.join_or_begin(key) {
        FlightRole::Follower(flight) => {
            let result = flight.wait();
            if result.is_ok() {
                shared.metrics.record_hit();
            }
            result
        }
        FlightRole::Leader(flight) => {
            // Double-check: a racing load may have installed the value
            // between the probe above and winning the flight.
            if let Some(value) = engine.read(key) {
                shared
                    .flights
                    .complete(key, &flight, Ok(value.clone()));
                return Ok(value);
            }
            shared.metrics.record_miss();

            let start = shared.now();
            let outcome = loader.load(key);
            let elapsed = shared.now().saturating_sub(start);

            let result = match outcome {
                Ok(Some(value)) => {
                    shared.metrics.record_load_success(elapsed);
                    engine.put(key.clone(), value.clone());
                    Ok(value)
                }
                Ok(None) => {
                    shared.metrics.record_load_failure(elapsed);
                    Err(CacheError::LoaderNullValue)
                }
                Err(err) => {
                    shared.metrics.record_load_failure(elapsed);
                    Err(CacheError::loader(err))
                }
            };
            // Install before retiring the flight, so late arrivals find
            // either the value or the still-pending promise.
            shared.flights.complete(key, &flight, result.clone());
            result
        }
    }
}

/// Bulk loading `get_all`: partitions into cached and missing, attempts
/// one bulk load, and otherwise falls back to parallel per-key
/// single-flight loads on the worker pool, skipping per-key failures.
pub(crate) fn loading_get_all<K, V>(
    engine: &Arc<dyn EngineCore<K, V>>,
    keys: Vec<K>,
) -> Result<HashMap<K, V>, CacheError>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let shared = engine.shared();
    let mut found = HashMap::new();
    let mut missing = Vec::new();
    for key in keys {
        if found.contains_key(&key) || missing.contains(&key) {
            continue;
        }
        match engine.read(&key) {
            Some(value) => {
                found.insert(key, value);
            }
            None => missing.push(key),
        }
    }
    if missing.is_empty() {
        return Ok(found);
    }
    let Some(loader) = shared.loader.clone() else {
        return Err(CacheError::Unsupported("get_all"));
    };

    let start = shared.now();
    match loader.load_all(&missing) {
        Ok(Some(loaded)) => {
            shared
                .metrics
                .record_load_success(shared.now().saturating_sub(start));
            for (key, value) in loaded {
                engine.put(key.clone(), value.clone());
                if missing.contains(&key) {
                    found.insert(key, value);
                }
            }
            Ok(found)
        }
        Err(err) => {
            shared
                .metrics
                .record_load_failure(shared.now().saturating_sub(start));
            Err(CacheError::loader(err))
        }
        Ok(None) => {
            // Bulk loading unsupported: parallel per-key loads, errors
            // skipped rather than surfaced.
            let (tx, rx) = crossbeam_channel::unbounded();
            for key in missing {
                let engine = Arc::clone(engine);
                let tx = tx.clone();
                shared.submit(move || {
                    let result = loading_get(&engine, &key);
                    let _ = tx.send((key, result));
                });
            }
            drop(tx);
            for (key, result) in rx.iter() {
                match result {
                    Ok(value) => {
                        found.insert(key, value);
                    }
                    Err(err) => debug!("get_all skipping key after load failure: {err}"),
                }
            }
            Ok(found)
        }
    }
}

/// One pass of the refresh scheduler: walk the index, ask the policy how
/// stale each entry may get, claim due entries by compare-and-swapping
/// their refresh timestamp, and submit one reload task per claimed key.
/// The claim is what bounds the system to one in-flight reload per key.
pub(crate) fn refresh_pass<K, V>(engine: &Arc<dyn EngineCore<K, V>>)
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let shared = engine.shared();
    if shared.loader.is_none() {
        return;
    }
    let now = shared.now();
    let fixed = shared.refresh_interval_fixed.unwrap_or(NEVER);

    let entries: Vec<(K, Arc<CacheEntry<V>>)> = shared
        .index
        .iter()
        .map(|item| (item.key().clone(), Arc::clone(item.value())))
        .collect();

    for (key, entry) in entries {
        let interval = match &shared.refresh_policy {
            Some(policy) => {
                interval_or_fallback(policy.as_ref(), &key, entry.value(), now, fixed)
            }
            None => fixed,
        };
        if interval == NEVER {
            continue;
        }
        let observed = entry.last_refresh_time();
        if now.saturating_sub(observed) < interval {
            continue;
        }
        if !shared.try_begin_refresh(&key) {
            continue;
        }
        if entry.try_claim_refresh(observed, now) {
            submit_reload(engine, key, entry);
        } else {
            shared.end_refresh(&key);
        }
    }
}

/// Caller-requested asynchronous reload of one key. Resident entries are
/// claimed and reloaded; absent keys are ignored.
pub(crate) fn refresh_one<K, V>(engine: &Arc<dyn EngineCore<K, V>>, key: &K)
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let shared = engine.shared();
    if shared.loader.is_none() {
        warn!("refresh requested but no loader is configured");
        return;
    }
    let Some(entry) = shared.index.get(key).map(|item| Arc::clone(item.value())) else {
        debug!("refresh requested for absent key");
        return;
    };
    // Losing either claim means a refresh is already in flight.
    if !shared.try_begin_refresh(key) {
        return;
    }
    let observed = entry.last_refresh_time();
    if entry.try_claim_refresh(observed, shared.now()) {
        submit_reload(engine, key.clone(), entry);
    } else {
        shared.end_refresh(key);
    }
}

/// Queues the actual reload task for a claimed entry. On success the entry
/// is replaced (if still resident); on failure the old entry is retained.
/// Policy callbacks fire inside their error boundary either way.
fn submit_reload<K, V>(engine: &Arc<dyn EngineCore<K, V>>, key: K, old_entry: Arc<CacheEntry<V>>)
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let loader = engine
        .shared()
        .loader
        .clone()
        .expect("reload requires loader");
    let policy = engine.shared().refresh_policy.clone();
    let task_engine = Arc::clone(engine);
    let job = move || {
        let shared = task_engine.shared();
        let start = shared.now();
        let outcome = loader.reload(&key, old_entry.value());
        let elapsed = shared.now().saturating_sub(start);

        match outcome {
            Ok(Some(value)) => {
                shared.metrics.record_load_success(elapsed);
                task_engine.install_refreshed(&key, value.clone());
                if let Some(policy) = &policy {
                    notify_refresh_success(policy.as_ref(), &key, &value);
                }
            }
            other => {
                let error = match other {
                    Ok(_) => CacheError::LoaderNullValue,
                    Err(err) => CacheError::loader(err),
                };
                shared.metrics.record_load_failure(elapsed);
                debug!("refresh reload failed, keeping old entry: {error}");
                if let Some(policy) = &policy {
                    notify_refresh_failure(policy.as_ref(), &key, &error);
                }
            }
        }
        // The marker outlives the install, so a racing pass cannot begin
        // a second reload for this key.
        shared.end_refresh(&key);
    };
    engine.shared().submit(job);
}
