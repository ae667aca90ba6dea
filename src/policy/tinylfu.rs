//! Window-TinyLFU eviction.
//!
//! A hybrid of a small recency window and a frequency-gated main space,
//! giving LRU-like behavior for genuinely hot keys while keeping one-shot
//! scans from polluting the cache.
//!
//! # Segments
//!
//! ```text
//!   new key ──▶ [ window ≈1% ] ──access──▶ [ probation ] ──access──▶ [ protected ≈80% of main ]
//!                    │                          │     ▲                        │
//!                    ▼ (head, when over cap)    ▼     └──── demote on overflow ┘
//!                 evicted                    evicted
//! ```
//!
//! New keys enter the window. A second touch promotes window keys to
//! probation and probation keys to protected; protected keys just move to
//! their segment's tail. When protected outgrows its cap its oldest key
//! demotes back to probation, exactly the segmented-LRU discipline.
//!
//! # Victim choice
//!
//! 1. The window head, whenever the window is over its cap (this is what
//!    absorbs scans: a burst of one-shot keys churns through the tiny
//!    window and never touches the main space).
//! 2. Otherwise the probation head.
//! 3. Otherwise the protected head.
//!
//! Each step honors the minimum-age gate by re-queueing and bounded retry.
//!
//! The access-frequency sketch is maintained by the engine on the shared
//! read/write paths; this state machine only manages segment membership.
//!
//! # Degenerate capacities
//!
//! Capacities below 5 leave no meaningful main space (the window minimum
//! of one key plus a protected share that rounds to nearly everything).
//! The policy still functions, it just degrades toward plain LRU.

use core::hash::Hash;

use crate::policy::lru::select_from_queue;
use crate::policy::{EvictionPolicy, SelectionContext};
use crate::queue::AccessQueue;

/// W-TinyLFU segment state.
#[derive(Debug)]
pub struct TinyLfuPolicy<K> {
    window: AccessQueue<K>,
    probation: AccessQueue<K>,
    protected: AccessQueue<K>,
    window_cap: usize,
    protected_cap: usize,
}

impl<K: Hash + Eq + Clone> TinyLfuPolicy<K> {
    /// Creates segment state for a cache of `capacity` entries.
    ///
    /// Window is 1% of capacity (at least one key); protected is 80% of
    /// the remaining main space; probation is whatever is left.
    pub fn with_capacity(capacity: usize) -> Self {
        let window_cap = ((capacity as f64 * 0.01).round() as usize).max(1);
        let main = capacity.saturating_sub(window_cap);
        let protected_cap = (main as f64 * 0.80).round() as usize;
        TinyLfuPolicy {
            window: AccessQueue::with_capacity(window_cap + 1),
            probation: AccessQueue::with_capacity(main / 4 + 1),
            protected: AccessQueue::with_capacity(protected_cap + 1),
            window_cap,
            protected_cap,
        }
    }

    /// Window segment cap.
    #[inline]
    pub fn window_cap(&self) -> usize {
        self.window_cap
    }

    /// Protected segment cap.
    #[inline]
    pub fn protected_cap(&self) -> usize {
        self.protected_cap
    }

    #[cfg(test)]
    fn segment_of(&self, key: &K) -> Option<&'static str> {
        if self.window.contains(key) {
            Some("window")
        } else if self.probation.contains(key) {
            Some("probation")
        } else if self.protected.contains(key) {
            Some("protected")
        } else {
            None
        }
    }
}

impl<K: Hash + Eq + Clone + Send> EvictionPolicy<K> for TinyLfuPolicy<K> {
    fn on_access(&mut self, key: &K) {
        if self.window.contains(key) {
            self.window.remove(key);
            self.probation.push_back(key.clone());
        } else if self.probation.contains(key) {
            self.probation.remove(key);
            self.protected.push_back(key.clone());
            // Protected keeps its cap by demoting its own oldest key.
            if self.protected.len() > self.protected_cap {
                if let Some(demoted) = self.protected.pop_front() {
                    self.probation.push_back(demoted);
                }
            }
        } else if self.protected.contains(key) {
            self.protected.move_to_back(key);
        } else {
            self.window.push_back(key.clone());
        }
    }

    fn on_remove(&mut self, key: &K) {
        if !self.window.remove(key) && !self.probation.remove(key) {
            self.protected.remove(key);
        }
    }

    fn select_victim(&mut self, ctx: &dyn SelectionContext<K>, honor_age: bool) -> Option<K> {
        if self.window.len() > self.window_cap {
            if let Some(victim) = select_from_queue(&mut self.window, ctx, honor_age) {
                return Some(victim);
            }
        }
        if let Some(victim) = select_from_queue(&mut self.probation, ctx, honor_age) {
            return Some(victim);
        }
        if let Some(victim) = select_from_queue(&mut self.protected, ctx, honor_age) {
            return Some(victim);
        }
        // Everything resident sits in an under-cap window; it is still the
        // only place left to evict from.
        select_from_queue(&mut self.window, ctx, honor_age)
    }

    fn clear(&mut self) {
        self.window.clear();
        self.probation.clear();
        self.protected.clear();
    }
}
