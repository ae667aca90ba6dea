//! Eviction Policies
//!
//! Selection strategies deciding which resident entry leaves the cache when
//! a size or weight cap is exceeded. Four strategies are provided:
//!
//! | Policy | Ordering state | Victim choice |
//! |--------|----------------|---------------|
//! | [`lru`] | one queue, reordered on read | oldest access |
//! | [`fifo`] | one queue, append-only | oldest insertion |
//! | [`lfu`] | none | smallest access counter |
//! | [`tinylfu`] | window / probation / protected queues + frequency sketch | segment heads |
//!
//! # Contract
//!
//! Policies track keys only; the engine owns the entries. Every policy
//! implements [`EvictionPolicy`]:
//!
//! - `on_access(key)`: a read or write touched `key`; update ordering
//!   state (and insert the key if it is new to the policy).
//! - `on_remove(key)`: `key` left the index; purge it.
//! - `select_victim(ctx, honor_age)`: propose a key to evict. With
//!   `honor_age` set, candidates younger than the engine's minimum
//!   eviction age are re-queued at the tail and the next candidate is
//!   tried, bounded by the queue length to avoid livelock; `None` means no
//!   eligible candidate exists. The engine retries with the gate off when
//!   a hard cap is still violated.
//!
//! The [`SelectionContext`] closes the loop back to the engine without
//! giving policies entry references: eligibility checks and access
//! counters are answered from the index at selection time.
//!
//! # Strict mode only
//!
//! These structures serve the strict engine, where ordering fidelity is
//! the point. The fast engine skips them entirely and picks victims by
//! sampling the index, because queue maintenance on every read would
//! dominate its cost.

use core::hash::Hash;

pub mod fifo;
pub mod lfu;
pub mod lru;
pub mod tinylfu;

pub use fifo::FifoPolicy;
pub use lfu::LfuPolicy;
pub use lru::LruPolicy;
pub use tinylfu::TinyLfuPolicy;

/// Which eviction strategy the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicyKind {
    /// Least Recently Used.
    #[default]
    Lru,
    /// First In First Out; reads do not reorder.
    Fifo,
    /// Least Frequently Used, by per-entry access counter.
    Lfu,
    /// Window-TinyLFU: admission window plus frequency-gated main space.
    WindowTinyLfu,
}

/// Engine-side answers a policy needs while selecting a victim.
pub trait SelectionContext<K> {
    /// Whether `key`'s entry has reached the minimum eviction age.
    /// Absent keys report `true` so stale policy state drains out.
    fn is_eligible(&self, key: &K) -> bool;

    /// Whether `key` is barred from this selection pass entirely (the
    /// engine excludes the entry whose insertion triggered the pass, so
    /// a put does not evict itself while alternatives exist).
    fn is_excluded(&self, key: &K) -> bool {
        let _ = key;
        false
    }

    /// The entry's access counter, or `None` when the key is gone.
    fn access_count(&self, key: &K) -> Option<u64>;

    /// Visits every key currently in the index (used by LFU's scan).
    fn for_each_key(&self, f: &mut dyn FnMut(&K));
}

/// Ordering state and victim selection for one eviction strategy.
pub trait EvictionPolicy<K>: Send {
    /// Records that a read or write touched `key`.
    fn on_access(&mut self, key: &K);

    /// Purges `key` from the ordering state.
    fn on_remove(&mut self, key: &K);

    /// Proposes a key to evict, or `None` when no candidate qualifies.
    fn select_victim(&mut self, ctx: &dyn SelectionContext<K>, honor_age: bool) -> Option<K>;

    /// Drops all ordering state.
    fn clear(&mut self);
}

/// Builds the policy implementation for `kind`, sized for `capacity`
/// entries (only W-TinyLFU uses the capacity, for its segment caps).
pub(crate) fn new_policy<K>(
    kind: EvictionPolicyKind,
    capacity: usize,
) -> Box<dyn EvictionPolicy<K>>
where
    K: Hash + Eq + Clone + Send + 'static,
{
    match kind {
        EvictionPolicyKind::Lru => Box::new(LruPolicy::with_capacity(capacity)),
        EvictionPolicyKind::Fifo => Box::new(FifoPolicy::with_capacity(capacity)),
        EvictionPolicyKind::Lfu => Box::new(LfuPolicy::new()),
        EvictionPolicyKind::WindowTinyLfu => Box::new(TinyLfuPolicy::with_capacity(capacity)),
    }
}
