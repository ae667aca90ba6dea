//! Fast Engine
//!
//! The throughput-first operating mode:
//!
//! - **Reads** are wait-free apart from the index's internal sharding: one
//!   concurrent-map probe, relaxed atomic access-time and counter stores,
//!   an inline expiry check.
//! - **Writes** are one concurrent-map insert plus an atomic weight delta.
//! - **Eviction is deferred**: each put bumps a counter and the eviction
//!   loop only runs every [`DEFERRED_EVICTION_BATCH`] puts, or as soon as
//!   a cap is overshot past the soft tolerance (~5%). One thread evicts
//!   at a time; the rest skip past a held try-lock.
//! - **Victim selection is sampled**: no ordering queues are maintained
//!   (queue maintenance on every read would dominate this mode's cost).
//!   Instead a small sample of resident entries is scored by the policy's
//!   criterion (access time, write time, access count, or sketch
//!   frequency) and the worst one is evicted.
//!
//! The price is precision: policy order is approximate and the weight may
//! overshoot its cap by the soft tolerance until the next pass reconciles
//! it.

use core::hash::Hash;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;

use crate::config::CacheConfig;
use crate::engine::{
    ComputeFn, EngineCore, EngineShared, DEFERRED_EVICTION_BATCH, EVICTION_SAMPLE,
    SOFT_OVERSHOOT_DEN, SOFT_OVERSHOOT_NUM,
};
use crate::error::CacheError;
use crate::listener::{PutCause, RemovalCause};
use crate::policy::EvictionPolicyKind;

/// Lock-free engine with deferred, sampled eviction.
pub(crate) struct FastEngine<K, V> {
    shared: EngineShared<K, V>,
    policy_kind: EvictionPolicyKind,
    /// Puts since the last eviction pass.
    pending_puts: AtomicUsize,
    /// Admits one evicting thread at a time; others skip.
    eviction_gate: Mutex<()>,
}

impl<K, V> FastEngine<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(config: CacheConfig<K, V>) -> Self {
        let policy_kind = config.eviction_policy;
        FastEngine {
            shared: EngineShared::from_config(config, 0),
            policy_kind,
            pending_puts: AtomicUsize::new(0),
            eviction_gate: Mutex::new(()),
        }
    }

    /// True when a cap is exceeded past the soft tolerance.
    fn over_soft_cap(&self) -> bool {
        let size_over = self.shared.max_size.is_some_and(|cap| {
            self.shared.index.len() as u64 > cap.saturating_mul(SOFT_OVERSHOOT_NUM) / SOFT_OVERSHOOT_DEN
        });
        let weight_over = self.shared.max_weight.is_some_and(|cap| {
            self.shared.current_weight() > cap.saturating_mul(SOFT_OVERSHOOT_NUM) / SOFT_OVERSHOOT_DEN
        });
        size_over || weight_over
    }

    /// Amortized eviction trigger, run after every put.
    fn maybe_evict(&self, just_inserted: Option<&K>) {
        let pending = self.pending_puts.fetch_add(1, Ordering::Relaxed) + 1;
        if pending >= DEFERRED_EVICTION_BATCH || self.over_soft_cap() {
            self.pending_puts.store(0, Ordering::Relaxed);
            self.run_eviction(just_inserted);
        }
    }

    /// Evicts sampled victims until both caps hold, no candidate remains,
    /// or the bounded attempt budget runs out.
    fn run_eviction(&self, just_inserted: Option<&K>) {
        let Some(_gate) = self.eviction_gate.try_lock() else {
            return;
        };
        let mut attempts = 0usize;
        let max_attempts = self.shared.index.len() + 10;
        while (self.shared.size_violated() || self.shared.weight_violated())
            && attempts < max_attempts
        {
            attempts += 1;
            // The entry whose insertion triggered the pass is preferred
            // out of the sample, and is only fair game at all for the
            // entry-count cap; a weight-only overflow never evicts it, so
            // an entry heavier than the whole cap can stay resident
            // alone.
            let victim = self.sample_victim(just_inserted, false).or_else(|| {
                if self.shared.size_violated() {
                    self.sample_victim(just_inserted, true)
                } else {
                    None
                }
            });
            let Some(victim) = victim else {
                break;
            };
            if let Some((key, removed)) = self.shared.index.remove(&victim) {
                self.shared
                    .on_entry_removed(&key, removed.as_ref(), RemovalCause::Size);
            }
        }
    }

    /// Scores a random sample of resident entries by the policy criterion
    /// and returns the worst, or `None` when nothing qualifies.
    fn sample_victim(&self, excluded: Option<&K>, allow_excluded: bool) -> Option<K> {
        let len = self.shared.index.len();
        if len == 0 {
            return None;
        }
        let now = self.shared.now();
        let skip = if len > EVICTION_SAMPLE {
            rand::thread_rng().gen_range(0..=len - EVICTION_SAMPLE)
        } else {
            0
        };
        let mut best: Option<(K, u128)> = None;
        for item in self.shared.index.iter().skip(skip).take(EVICTION_SAMPLE) {
            let key = item.key();
            let entry = item.value();
            if !allow_excluded && excluded == Some(key) {
                continue;
            }
            if !entry.is_eligible_for_eviction(now, self.shared.min_eviction_age) {
                continue;
            }
            let score = match self.policy_kind {
                EvictionPolicyKind::Lru => u128::from(entry.access_time()),
                EvictionPolicyKind::Fifo => u128::from(entry.write_time()),
                EvictionPolicyKind::Lfu => u128::from(entry.access_count()),
                // Frequency first, recency as the tie-break.
                EvictionPolicyKind::WindowTinyLfu => {
                    (u128::from(self.shared.frequency(key)) << 64)
                        | u128::from(entry.access_time())
                }
            };
            match &best {
                Some((_, lowest)) if score >= *lowest => {}
                _ => best = Some((key.clone(), score)),
            }
        }
        best.map(|(key, _)| key)
    }

    /// Removes `key` if its entry is (still) expired, firing the expired
    /// removal event. The double-check runs under the map's shard lock.
    fn remove_expired(&self, key: &K) {
        let removed = self
            .shared
            .index
            .remove_if(key, |_, entry| {
                self.shared.expiration.is_expired(entry.as_ref(), self.shared.now())
            });
        if let Some((key, entry)) = removed {
            self.shared
                .on_entry_removed(&key, entry.as_ref(), RemovalCause::Expired);
        }
    }
}

impl<K, V> EngineCore<K, V> for FastEngine<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn shared(&self) -> &EngineShared<K, V> {
        &self.shared
    }

    fn read(&self, key: &K) -> Option<V> {
        let entry = {
            let guard = self.shared.index.get(key)?;
            Arc::clone(guard.value())
        };
        let now = self.shared.now();
        if self.shared.expiration.is_expired(entry.as_ref(), now) {
            self.remove_expired(key);
            return None;
        }
        entry.mark_access(now);
        self.shared.apply_read_expiry(key, entry.as_ref(), now);
        self.shared.note_access(key);
        self.shared.metrics.record_hit();
        Some(entry.value().clone())
    }

    fn put(&self, key: K, value: V) {
        let now = self.shared.now();
        let existing = self
            .shared
            .index
            .get(&key)
            .map(|guard| Arc::clone(guard.value()));
        let entry = Arc::new(
            self.shared
                .build_entry(&key, value, now, existing.as_deref()),
        );
        let old = self.shared.index.insert(key.clone(), Arc::clone(&entry));
        let cause = if old.is_some() {
            PutCause::Update
        } else {
            PutCause::Insert
        };
        self.shared.on_entry_inserted(&key, entry.as_ref(), cause);
        if let Some(old) = old {
            self.shared
                .on_entry_removed(&key, old.as_ref(), RemovalCause::Replaced);
        }
        self.shared.note_access(&key);
        self.maybe_evict(Some(&key));
    }

    fn get_or_compute(&self, key: K, f: ComputeFn<'_, K, V>) -> Result<V, CacheError> {
        let mut f = Some(f);
        loop {
            match self.shared.index.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(occupied) => {
                    let entry = Arc::clone(occupied.get());
                    let now = self.shared.now();
                    if self.shared.expiration.is_expired(entry.as_ref(), now) {
                        let (stale_key, old) = occupied.remove_entry();
                        self.shared
                            .on_entry_removed(&stale_key, old.as_ref(), RemovalCause::Expired);
                        continue;
                    }
                    drop(occupied);
                    entry.mark_access(now);
                    self.shared.apply_read_expiry(&key, entry.as_ref(), now);
                    self.shared.note_access(&key);
                    self.shared.metrics.record_hit();
                    return Ok(entry.value().clone());
                }
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    self.shared.metrics.record_miss();
                    let compute = f.take().expect("compute function runs once");
                    // Compute-and-swap: the function runs under this
                    // key's shard arbitration, so it must not reenter
                    // the cache.
                    let start = self.shared.now();
                    let outcome = compute(&key);
                    let elapsed = self.shared.now().saturating_sub(start);
                    return match outcome {
                        Ok(Some(value)) => {
                            self.shared.metrics.record_load_success(elapsed);
                            let now = self.shared.now();
                            let entry =
                                Arc::new(self.shared.build_entry(&key, value.clone(), now, None));
                            let slot = vacant.insert(Arc::clone(&entry));
                            drop(slot);
                            self.shared
                                .on_entry_inserted(&key, entry.as_ref(), PutCause::Insert);
                            self.shared.note_access(&key);
                            self.maybe_evict(Some(&key));
                            Ok(value)
                        }
                        Ok(None) => {
                            self.shared.metrics.record_load_failure(elapsed);
                            Err(CacheError::LoaderNullValue)
                        }
                        Err(err) => {
                            self.shared.metrics.record_load_failure(elapsed);
                            Err(CacheError::loader(err))
                        }
                    };
                }
            }
        }
    }

    fn invalidate(&self, key: &K) {
        if let Some((key, entry)) = self.shared.index.remove(key) {
            self.shared
                .on_entry_removed(&key, entry.as_ref(), RemovalCause::Explicit);
        }
    }

    fn clean_up(&self) {
        let now = self.shared.now();
        let expired: Vec<K> = self
            .shared
            .index
            .iter()
            .filter(|item| self.shared.expiration.is_expired(item.value().as_ref(), now))
            .map(|item| item.key().clone())
            .collect();
        for key in expired {
            self.remove_expired(&key);
        }
    }

    fn as_map(&self) -> HashMap<K, V> {
        let now = self.shared.now();
        self.shared
            .index
            .iter()
            .filter(|item| !self.shared.expiration.is_expired(item.value().as_ref(), now))
            .map(|item| (item.key().clone(), item.value().value().clone()))
            .collect()
    }

    fn install_refreshed(&self, key: &K, value: V) {
        // Invalidated while the reload ran: stay absent.
        let Some(old) = self
            .shared
            .index
            .get(key)
            .map(|guard| Arc::clone(guard.value()))
        else {
            return;
        };
        let now = self.shared.now();
        let entry = Arc::new(self.shared.build_entry(key, value, now, Some(old.as_ref())));
        match self.shared.index.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let replaced = Arc::clone(occupied.get());
                occupied.insert(Arc::clone(&entry));
                drop(occupied);
                self.shared
                    .on_entry_inserted(key, entry.as_ref(), PutCause::Update);
                self.shared
                    .on_entry_removed(key, replaced.as_ref(), RemovalCause::Replaced);
                self.shared.note_access(key);
                self.maybe_evict(Some(key));
            }
            dashmap::mapref::entry::Entry::Vacant(_) => {}
        }
    }
}

impl<K, V> std::fmt::Debug for FastEngine<K, V>
where
    K: Hash + Eq,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEngine")
            .field("len", &self.shared.index.len())
            .field("policy", &self.policy_kind)
            .finish()
    }
}
