#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Code Reference
//!
//! ## Which Configuration Should I Use?
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │ Do you need exact eviction order (tests, small hot caches)?             │
//! │   yes ─▶ strategy: Strict                                               │
//! │   no  ─▶ strategy: Fast (default)                                       │
//! │                                                                         │
//! │ Is your workload scan-heavy (bulk jobs polluting the cache)?            │
//! │   yes ─▶ eviction_policy: WindowTinyLfu                                 │
//! │   no  ─▶ Lru (default), Fifo for pure arrival order,                    │
//! │          Lfu for stable popularity                                      │
//! │                                                                         │
//! │ Do values go stale?                                                     │
//! │   hard staleness bound  ─▶ expire_after_write                           │
//! │   keep-warm-while-used  ─▶ expire_after_access                          │
//! │   serve-stale-reload    ─▶ refresh_after_write + loader                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Operation Quick Reference
//!
//! | Operation | Loader needed | Blocking behavior |
//! |-----------|---------------|-------------------|
//! | `get_if_present` | no | never suspends (fast), bounded lock wait (strict) |
//! | `get` | yes | winner runs the loader, others wait on the flight |
//! | `get_all` | yes | caller blocks until bulk or parallel loads finish |
//! | `get_or_compute` | no | compute runs under the key's write arbitration |
//! | `put` / `invalidate` | no | never suspends (fast), write lock (strict) |
//! | `refresh` | yes | returns immediately, reload runs on the pool |
//!
//! ## Single-Flight Loading
//!
//! ```
//! use loadcache::{BoxError, Cache, CacheConfig, CacheLoader};
//! use std::sync::Arc;
//!
//! struct Doubler;
//! impl CacheLoader<i32, i32> for Doubler {
//!     fn load(&self, key: &i32) -> Result<Option<i32>, BoxError> {
//!         Ok(Some(key * 2))
//!     }
//! }
//!
//! let cache = Cache::new(CacheConfig {
//!     loader: Some(Arc::new(Doubler)),
//!     ..CacheConfig::default()
//! })
//! .unwrap();
//!
//! assert_eq!(cache.get(&21).unwrap(), 42);   // loaded
//! assert_eq!(cache.get(&21).unwrap(), 42);   // served from cache
//! assert_eq!(cache.metrics().load_success_count, 1);
//! ```
//!
//! ## Modules
//!
//! - [`cache`]: the public [`Cache`] facade
//! - [`config`]: the frozen [`CacheConfig`] record and [`Strategy`]
//! - [`entry`]: the per-binding record with its lifecycle bookkeeping
//! - [`policy`]: eviction strategies (LRU, FIFO, LFU, W-TinyLFU)
//! - [`sketch`]: the count-min frequency sketch behind W-TinyLFU
//! - [`expiry`]: fixed TTLs and per-entry custom expiration
//! - [`loader`]: the loader contract and single-flight semantics
//! - [`refresh`]: background refresh policies, fixed and time-windowed
//! - [`listener`]: removal/put events and the write-through contract
//! - [`weigher`]: entry weighing for the weight cap
//! - [`metrics`]: counters, derived views, and the byte-cost hook
//! - [`error`]: the [`CacheError`] type
//! - [`time`]: the monotonic clock entries are stamped with

/// The public cache facade.
pub mod cache;

/// Frozen configuration record and operating-mode selection.
pub mod config;

/// Per-binding entry record: value, timestamps, access counters, weight.
pub mod entry;

/// Error types for cache operations.
pub mod error;

/// Fixed TTL dimensions and the per-entry custom expiry contract.
pub mod expiry;

/// Removal and put events, listener contracts, write-through contract.
pub mod listener;

/// Loader contract and single-flight load coordination.
pub mod loader;

/// Metric counters, snapshot views, and the byte-cost estimator hook.
pub mod metrics;

/// Eviction policies: LRU, FIFO, LFU, and Window-TinyLFU.
pub mod policy;

/// Background refresh policies, including time-windowed schedules.
pub mod refresh;

/// Count-min frequency sketch with periodic aging.
pub mod sketch;

/// Monotonic clock and the never-expires sentinel.
pub mod time;

/// Entry weighing contract for weight-bounded caches.
pub mod weigher;

/// Ordered key queue backing the strict-mode policies.
pub(crate) mod queue;

/// The two engine implementations and their shared machinery.
pub(crate) mod engine;

/// Worker pool and fixed-rate task threads.
pub(crate) mod scheduler;

// Re-export the primary surface at the crate root.
pub use cache::Cache;
pub use config::{CacheConfig, Strategy};
pub use entry::CacheEntry;
pub use error::{BoxError, CacheError, SharedError};
pub use expiry::Expiry;
pub use listener::{CacheWriter, PutCause, PutListener, RemovalCause, RemovalListener};
pub use loader::CacheLoader;
pub use metrics::{CostModel, ExpiryDistribution, MetricsSnapshot};
pub use policy::EvictionPolicyKind;
pub use refresh::{FixedRefresh, RefreshPolicy, RefreshWindow, TimeWindowedRefresh};
pub use weigher::Weigher;
