//! Least Recently Used eviction.
//!
//! One ordered queue with the most recently touched key at the back. Reads
//! and writes both move the key to the back; the victim is the front.

use core::hash::Hash;

use crate::policy::{EvictionPolicy, SelectionContext};
use crate::queue::AccessQueue;

/// LRU ordering state: a single recency queue.
#[derive(Debug)]
pub struct LruPolicy<K> {
    queue: AccessQueue<K>,
}

impl<K: Hash + Eq + Clone> LruPolicy<K> {
    /// Creates LRU state sized for `capacity` keys.
    pub fn with_capacity(capacity: usize) -> Self {
        LruPolicy {
            queue: AccessQueue::with_capacity(capacity),
        }
    }
}

impl<K: Hash + Eq + Clone + Send> EvictionPolicy<K> for LruPolicy<K> {
    fn on_access(&mut self, key: &K) {
        if !self.queue.move_to_back(key) {
            self.queue.push_back(key.clone());
        }
    }

    fn on_remove(&mut self, key: &K) {
        self.queue.remove(key);
    }

    fn select_victim(&mut self, ctx: &dyn SelectionContext<K>, honor_age: bool) -> Option<K> {
        select_from_queue(&mut self.queue, ctx, honor_age)
    }

    fn clear(&mut self) {
        self.queue.clear();
    }
}

/// Polls the queue front; excluded and too-young candidates are re-queued
/// at the tail and the next one is tried, bounded by the queue length so a
/// queue full of unusable entries terminates instead of spinning.
pub(crate) fn select_from_queue<K: Hash + Eq + Clone>(
    queue: &mut AccessQueue<K>,
    ctx: &dyn SelectionContext<K>,
    honor_age: bool,
) -> Option<K> {
    let bound = queue.len();
    for _ in 0..bound {
        let candidate = queue.front()?;
        let usable = !ctx.is_excluded(&candidate) && (!honor_age || ctx.is_eligible(&candidate));
        if usable {
            return Some(candidate);
        }
        queue.move_to_back(&candidate);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::testing::MapContext;

    #[test]
    fn test_victim_is_least_recently_used() {
        let mut policy = LruPolicy::with_capacity(4);
        let ctx = MapContext::default();
        for k in [1, 2, 3] {
            policy.on_access(&k);
        }
        policy.on_access(&1);
        assert_eq!(policy.select_victim(&ctx, true), Some(2));
    }

    #[test]
    fn test_selection_does_not_consume_candidate() {
        let mut policy = LruPolicy::with_capacity(4);
        let ctx = MapContext::default();
        policy.on_access(&1);
        policy.on_access(&2);
        // Selecting twice without removal proposes the same victim.
        assert_eq!(policy.select_victim(&ctx, true), Some(1));
        assert_eq!(policy.select_victim(&ctx, true), Some(1));
        policy.on_remove(&1);
        assert_eq!(policy.select_victim(&ctx, true), Some(2));
    }

    #[test]
    fn test_young_candidates_are_requeued() {
        let mut policy = LruPolicy::with_capacity(4);
        let mut ctx = MapContext::default();
        for k in [1, 2, 3] {
            policy.on_access(&k);
        }
        ctx.ineligible.insert(1);
        ctx.ineligible.insert(2);
        assert_eq!(policy.select_victim(&ctx, true), Some(3));
        // The skipped keys rotated to the tail, behind 3.
        policy.on_remove(&3);
        ctx.ineligible.clear();
        assert_eq!(policy.select_victim(&ctx, true), Some(1));
    }

    #[test]
    fn test_no_eligible_candidate_returns_none() {
        let mut policy = LruPolicy::with_capacity(4);
        let mut ctx = MapContext::default();
        policy.on_access(&1);
        ctx.ineligible.insert(1);
        assert_eq!(policy.select_victim(&ctx, true), None);
        // With the age gate off the same key is offered.
        assert_eq!(policy.select_victim(&ctx, false), Some(1));
    }

    #[test]
    fn test_excluded_key_is_never_selected() {
        let mut policy = LruPolicy::with_capacity(4);
        let mut ctx = MapContext::default();
        policy.on_access(&1);
        policy.on_access(&2);
        ctx.excluded.insert(1);
        // Even with the age gate off, exclusion holds.
        assert_eq!(policy.select_victim(&ctx, false), Some(2));
        policy.on_remove(&2);
        assert_eq!(policy.select_victim(&ctx, false), None);
    }

    #[test]
    fn test_empty_queue_has_no_victim() {
        let mut policy: LruPolicy<i32> = LruPolicy::with_capacity(4);
        let ctx = MapContext::default();
        assert_eq!(policy.select_victim(&ctx, true), None);
    }
}
