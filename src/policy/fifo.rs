//! First In First Out eviction.
//!
//! Same queue discipline as LRU except reads never reorder: a key is
//! appended on its first touch and stays in arrival order until removed.
//! Selection still re-queues too-young candidates, which is the one
//! sanctioned reordering.

use core::hash::Hash;

use crate::policy::lru::select_from_queue;
use crate::policy::{EvictionPolicy, SelectionContext};
use crate::queue::AccessQueue;

/// FIFO ordering state: an arrival-order queue.
#[derive(Debug)]
pub struct FifoPolicy<K> {
    queue: AccessQueue<K>,
}

impl<K: Hash + Eq + Clone> FifoPolicy<K> {
    /// Creates FIFO state sized for `capacity` keys.
    pub fn with_capacity(capacity: usize) -> Self {
        FifoPolicy {
            queue: AccessQueue::with_capacity(capacity),
        }
    }
}

impl<K: Hash + Eq + Clone + Send> EvictionPolicy<K> for FifoPolicy<K> {
    fn on_access(&mut self, key: &K) {
        // Appends only when absent; a repeat access leaves order untouched.
        if !self.queue.contains(key) {
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
