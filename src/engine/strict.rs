//! Strict Engine
//!
//! The precision-first operating mode. Each key maps to one lock in a
//! fixed sharded reader/writer lock array (`hash(key) % N`), so the table
//! never grows and invalidation has nothing to reap:
//!
//! - **Reads** take the key's read lock with a bounded wait
//!   ([`READ_LOCK_TIMEOUT`]); a timeout degrades the read to a miss
//!   instead of propagating an error, keeping throughput under
//!   contention. An expired-on-read entry triggers an upgrade to the
//!   write lock with a double-check before removal.
//! - **Writes and evictions** hold the key's write lock.
//! - **Ordering fidelity**: every access updates the policy's queues
//!   under a policy mutex, so the victim the policy proposes is exactly
//!   the one its discipline prescribes. A read observed by any thread
//!   strictly precedes, in policy order, any write completing after it.
//!
//! Entries younger than [`MIN_EVICTION_AGE_STRICT`] are passed over for
//! size and weight eviction while older candidates exist; when a hard cap
//! is violated and nothing is old enough, selection reruns without the
//! age gate rather than leaving the cap broken.
//!
//! Lock ordering discipline: a thread may take the policy mutex while
//! holding a key lock, never the reverse. Victim selection therefore
//! releases the policy mutex before touching the victim's key lock.

use core::hash::Hash;
use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::config::CacheConfig;
use crate::engine::{
    ComputeFn, EngineCore, EngineShared, MIN_EVICTION_AGE_STRICT, READ_LOCK_TIMEOUT,
};
use crate::entry::CacheEntry;
use crate::error::CacheError;
use crate::listener::{PutCause, RemovalCause};
use crate::policy::{new_policy, EvictionPolicy, SelectionContext};

/// Per-key locked engine with exact policy ordering.
pub(crate) struct StrictEngine<K, V> {
    shared: EngineShared<K, V>,
    /// Sharded per-key reader/writer locks; length is a power of two.
    locks: Box<[RwLock<()>]>,
    policy: Mutex<Box<dyn EvictionPolicy<K>>>,
}

/// Answers the policy's selection questions from the live index.
struct StrictContext<'a, K, V> {
    shared: &'a EngineShared<K, V>,
    now: u64,
    /// The key whose insertion triggered this pass, if any.
    excluded: Option<&'a K>,
}

impl<K, V> SelectionContext<K> for StrictContext<'_, K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn is_eligible(&self, key: &K) -> bool {
        // Keys the index no longer holds are eligible so stale policy
        // state drains out through selection.
        self.shared
            .index
            .get(key)
            .map(|entry| entry.is_eligible_for_eviction(self.now, self.shared.min_eviction_age))
            .unwrap_or(true)
    }

    fn is_excluded(&self, key: &K) -> bool {
        self.excluded.is_some_and(|excluded| excluded == key)
    }

    fn access_count(&self, key: &K) -> Option<u64> {
        self.shared.index.get(key).map(|entry| entry.access_count())
    }

    fn for_each_key(&self, f: &mut dyn FnMut(&K)) {
        for item in self.shared.index.iter() {
            f(item.key());
        }
    }
}

impl<K, V> StrictEngine<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(config: CacheConfig<K, V>) -> Self {
        let stripes = config.effective_concurrency_level();
        let policy = new_policy(config.eviction_policy, config.capacity_hint());
        let shared = EngineShared::from_config(config, MIN_EVICTION_AGE_STRICT);
        StrictEngine {
            shared,
            locks: (0..stripes).map(|_| RwLock::new(())).collect(),
            policy: Mutex::new(policy),
        }
    }

    #[inline]
    fn lock_for(&self, key: &K) -> &RwLock<()> {
        let idx = (self.shared.key_hash(key) as usize) & (self.locks.len() - 1);
        &self.locks[idx]
    }

    /// Hit bookkeeping shared by the read paths: access tracking, custom
    /// read expiry, sketch and policy updates, hit count.
    fn touch_hit(&self, key: &K, entry: &CacheEntry<V>, now: u64) -> V {
        entry.mark_access(now);
        self.shared.apply_read_expiry(key, entry, now);
        self.shared.note_access(key);
        self.policy.lock().on_access(key);
        self.shared.metrics.record_hit();
        entry.value().clone()
    }

    /// Removes `key` under its write lock if (still) expired; fires the
    /// expired removal and purges the policy.
    fn remove_expired(&self, key: &K) -> bool {
        let removed = self.shared.index.remove_if(key, |_, entry| {
            self.shared.expiration.is_expired(entry.as_ref(), self.shared.now())
        });
        match removed {
            Some((key, entry)) => {
                self.shared
                    .on_entry_removed(&key, entry.as_ref(), RemovalCause::Expired);
                self.policy.lock().on_remove(&key);
                true
            }
            None => false,
        }
    }

    /// Evicts in policy order until both caps hold, honoring the minimum
    /// eviction age while possible and overriding it when a cap would
    /// otherwise stay broken.
    fn evict_to_caps(&self, just_inserted: Option<&K>) {
        let mut attempts = 0usize;
        let max_attempts = self.shared.index.len() + 10;
        loop {
            let size_violated = self.shared.size_violated();
            if !(size_violated || self.shared.weight_violated()) || attempts >= max_attempts {
                return;
            }
            attempts += 1;

            let victim = {
                let now = self.shared.now();
                let ctx = StrictContext {
                    shared: &self.shared,
                    now,
                    excluded: just_inserted,
                };
                let mut policy = self.policy.lock();
                let mut victim = policy.select_victim(&ctx, true);
                if victim.is_none() {
                    // Hard caps beat the age gate.
                    victim = policy.select_victim(&ctx, false);
                }
                if victim.is_none() && size_violated {
                    // The entry-count cap may evict even the entry whose
                    // insertion triggered the pass (a zero cap admits
                    // nothing); a weight-only overflow never does, so an
                    // entry heavier than the whole cap stays resident
                    // alone.
                    let unrestricted = StrictContext {
                        shared: &self.shared,
                        now,
                        excluded: None,
                    };
                    victim = policy.select_victim(&unrestricted, false);
                }
                victim
            };
            let Some(victim) = victim else { return };

            let _victim_guard = self.lock_for(&victim).write();
            match self.shared.index.remove(&victim) {
                Some((key, entry)) => {
                    self.shared
                        .on_entry_removed(&key, entry.as_ref(), RemovalCause::Size);
                    self.policy.lock().on_remove(&key);
                }
                // Raced with an invalidation; purge the stale policy key.
                None => self.policy.lock().on_remove(&victim),
            }
        }
    }

    /// Installs `entry` for `key` under an already-held write lock,
    /// firing replacement and put events.
    fn install_locked(&self, key: &K, entry: Arc<CacheEntry<V>>, old: Option<Arc<CacheEntry<V>>>) {
        self.shared.index.insert(key.clone(), Arc::clone(&entry));
        let cause = if old.is_some() {
            PutCause::Update
        } else {
            PutCause::Insert
        };
        self.shared.on_entry_inserted(key, entry.as_ref(), cause);
        if let Some(old) = old {
            self.shared
                .on_entry_removed(key, old.as_ref(), RemovalCause::Replaced);
        }
        self.shared.note_access(key);
        self.policy.lock().on_access(key);
    }
}

impl<K, V> EngineCore<K, V> for StrictEngine<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn shared(&self) -> &EngineShared<K, V> {
        &self.shared
    }

    fn read(&self, key: &K) -> Option<V> {
        let lock = self.lock_for(key);
        let Some(read_guard) = lock.try_read_for(READ_LOCK_TIMEOUT) else {
            // Bounded wait expired: degrade to a miss, never an error.
            debug!("read lock wait timed out, degrading to miss");
            return None;
        };
        let entry = {
            let guard = self.shared.index.get(key)?;
            Arc::clone(guard.value())
        };
        let now = self.shared.now();
        if !self.shared.expiration.is_expired(entry.as_ref(), now) {
            return Some(self.touch_hit(key, entry.as_ref(), now));
        }

        // Expired on read: upgrade to the write lock and double-check,
        // since another thread may have replaced the entry meanwhile.
        drop(read_guard);
        let _write_guard = lock.write();
        if self.remove_expired(key) {
            return None;
        }
        let entry = {
            let guard = self.shared.index.get(key)?;
            Arc::clone(guard.value())
        };
        let now = self.shared.now();
        if self.shared.expiration.is_expired(entry.as_ref(), now) {
            return None;
        }
        Some(self.touch_hit(key, entry.as_ref(), now))
    }

    fn put(&self, key: K, value: V) {
        {
            let _guard = self.lock_for(&key).write();
            let now = self.shared.now();
            let old = self
                .shared
                .index
                .get(&key)
                .map(|guard| Arc::clone(guard.value()));
            let entry = Arc::new(self.shared.build_entry(&key, value, now, old.as_deref()));
            self.install_locked(&key, entry, old);
        }
        self.evict_to_caps(Some(&key));
    }

    fn get_or_compute(&self, key: K, f: ComputeFn<'_, K, V>) -> Result<V, CacheError> {
        let result = {
            let _guard = self.lock_for(&key).write();
            let now = self.shared.now();
            if let Some(entry) = self
                .shared
                .index
                .get(&key)
                .map(|guard| Arc::clone(guard.value()))
            {
                if !self.shared.expiration.is_expired(entry.as_ref(), now) {
                    return Ok(self.touch_hit(&key, entry.as_ref(), now));
                }
                self.remove_expired(&key);
            }
            self.shared.metrics.record_miss();

            // The compute function runs under this key's write lock; it
            // must not reenter the cache.
            let start = self.shared.now();
            let outcome = f(&key);
            let elapsed = self.shared.now().saturating_sub(start);
            match outcome {
                Ok(Some(value)) => {
                    self.shared.metrics.record_load_success(elapsed);
                    let now = self.shared.now();
                    let entry = Arc::new(self.shared.build_entry(&key, value.clone(), now, None));
                    self.install_locked(&key, entry, None);
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
            }
        };
        if result.is_ok() {
            self.evict_to_caps(Some(&key));
        }
        result
    }

    fn invalidate(&self, key: &K) {
        let _guard = self.lock_for(key).write();
        if let Some((key, entry)) = self.shared.index.remove(key) {
            self.shared
                .on_entry_removed(&key, entry.as_ref(), RemovalCause::Explicit);
        }
        self.policy.lock().on_remove(key);
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
            let _guard = self.lock_for(&key).write();
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
        {
            let _guard = self.lock_for(key).write();
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
            self.install_locked(key, entry, Some(old));
        }
        self.evict_to_caps(Some(key));
    }
}

impl<K, V> std::fmt::Debug for StrictEngine<K, V>
where
    K: Hash + Eq,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrictEngine")
            .field("len", &self.shared.index.len())
            .field("stripes", &self.locks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Strategy;
    use crate::policy::EvictionPolicyKind;
    use std::time::Duration;

    fn lru_engine(maximum_size: u64) -> StrictEngine<i32, String> {
        StrictEngine::new(CacheConfig {
            maximum_size: Some(maximum_size),
            eviction_policy: EvictionPolicyKind::Lru,
            strategy: Strategy::Strict,
            ..CacheConfig::default()
        })
    }

    #[test]
    fn test_put_read_roundtrip() {
        let e = lru_engine(10);
        e.put(1, "a".into());
        assert_eq!(e.read(&1), Some("a".into()));
        assert_eq!(e.read(&2), None);
    }

    #[test]
    fn test_lru_eviction_follows_access_order() {
        let e = lru_engine(3);
        e.put(1, "a".into());
        e.put(2, "b".into());
        e.put(3, "c".into());
        assert_eq!(e.read(&1), Some("a".into()));
        e.put(4, "d".into());

        // Key 2 is the least recently used and must be the victim even
        // though every entry is younger than the eligibility age.
        assert_eq!(e.shared.index.len(), 3);
        assert!(e.read(&2).is_none());
        assert!(e.read(&1).is_some());
        assert!(e.read(&3).is_some());
        assert!(e.read(&4).is_some());
        assert_eq!(e.shared.metrics.snapshot().eviction_count, 1);
    }

    #[test]
    fn test_size_cap_holds_exactly() {
        let e = lru_engine(5);
        for i in 0..50 {
            e.put(i, format!("v{i}"));
        }
        assert_eq!(e.shared.index.len(), 5);
    }

    #[test]
    fn test_zero_size_cap_evicts_every_put() {
        let e = lru_engine(0);
        e.put(1, "a".into());
        assert_eq!(e.shared.index.len(), 0);
        assert!(e.shared.metrics.snapshot().eviction_count >= 1);
    }

    #[test]
    fn test_expired_on_read_upgrades_and_removes() {
        let e = StrictEngine::new(CacheConfig::<i32, String> {
            expire_after_write: Some(Duration::from_millis(20)),
            strategy: Strategy::Strict,
            ..CacheConfig::default()
        });
        e.put(1, "a".into());
        assert_eq!(e.read(&1), Some("a".into()));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(e.read(&1), None);
        assert_eq!(e.shared.index.len(), 0);
        assert_eq!(e.shared.metrics.snapshot().eviction_count, 1);
    }

    #[test]
    fn test_fifo_ignores_reads() {
        let e = StrictEngine::new(CacheConfig::<i32, String> {
            maximum_size: Some(3),
            eviction_policy: EvictionPolicyKind::Fifo,
            strategy: Strategy::Strict,
            ..CacheConfig::default()
        });
        for i in 1..=3 {
            e.put(i, format!("v{i}"));
        }
        // Reading 1 does not save it under FIFO.
        let _ = e.read(&1);
        e.put(4, "v4".into());
        assert!(e.read(&1).is_none());
        assert!(e.read(&2).is_some());
    }

    #[test]
    fn test_lfu_evicts_coldest() {
        let e = StrictEngine::new(CacheConfig::<i32, String> {
            maximum_size: Some(3),
            eviction_policy: EvictionPolicyKind::Lfu,
            strategy: Strategy::Strict,
            ..CacheConfig::default()
        });
        for i in 1..=3 {
            e.put(i, format!("v{i}"));
        }
        for _ in 0..5 {
            let _ = e.read(&1);
            let _ = e.read(&2);
        }
        e.put(4, "v4".into());
        assert!(e.read(&3).is_none(), "cold key 3 should have been evicted");
        assert!(e.read(&1).is_some());
        assert!(e.read(&2).is_some());
    }

    #[test]
    fn test_get_or_compute_serializes_on_key() {
        let e = Arc::new(lru_engine(10));
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut pool = scoped_threadpool::Pool::new(4);
        pool.scoped(|scope| {
            for _ in 0..4 {
                let e = Arc::clone(&e);
                let calls = Arc::clone(&calls);
                scope.execute(move || {
                    let value = e
                        .get_or_compute(
                            9,
                            Box::new(|_| {
                                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                                std::thread::sleep(Duration::from_millis(20));
                                Ok(Some("slow".to_string()))
                            }),
                        )
                        .unwrap();
                    assert_eq!(value, "slow");
                });
            }
        });
        // The first computation installs the value; the others find it
        // under the same key lock and never run their function.
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stale_policy_keys_drain() {
        let e = lru_engine(2);
        e.put(1, "a".into());
        e.put(2, "b".into());
        e.invalidate(&1);
        // Policy already purged 1; filling past the cap must not loop.
        e.put(3, "c".into());
        e.put(4, "d".into());
        assert_eq!(e.shared.index.len(), 2);
    }
}
