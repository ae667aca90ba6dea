//! Cache Configuration
//!
//! The frozen record handed to the engine at construction. There is no
//! builder here: an outer construction surface (if any) assembles one of
//! these and the engine validates it once in [`Cache::new`].
//!
//! # Option semantics
//!
//! Capacity and time options are `Option`s:
//!
//! - `None` disables the dimension entirely.
//! - `Some(0)` / `Some(Duration::ZERO)` is the degenerate but legal bound:
//!   a `maximum_size` of zero evicts every put immediately, a zero
//!   `expire_after_write` expires every entry at its write instant.
//!
//! # Validation
//!
//! [`CacheConfig::validate`] rejects records that cannot work:
//!
//! - `maximum_weight` without a `weigher` (nothing could price entries);
//! - refresh (interval or policy) without a `loader` (nothing could
//!   recompute values).
//!
//! Time-window overlap is validated when the
//! [`TimeWindowedRefresh`](crate::refresh::TimeWindowedRefresh) policy is
//! constructed, before it ever reaches this record.
//!
//! # Degenerate capacities
//!
//! W-TinyLFU with `maximum_size` below 5 leaves no meaningful main space
//! and degrades toward plain LRU; it is accepted but pointless.
//!
//! [`Cache::new`]: crate::cache::Cache::new

use core::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CacheError;
use crate::expiry::Expiry;
use crate::listener::{CacheWriter, PutListener, RemovalListener};
use crate::loader::CacheLoader;
use crate::policy::EvictionPolicyKind;
use crate::refresh::RefreshPolicy;
use crate::weigher::Weigher;

/// Engine operating mode: precision of eviction order versus raw
/// throughput.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Lock-free reads and writes, deferred amortized eviction, sampled
    /// victim selection, bounded (~5%) weight overshoot.
    #[default]
    Fast,
    /// Per-key reader/writer locks, immediate eviction in exact policy
    /// order, reads degrade to misses after a bounded lock wait.
    Strict,
}

/// Frozen configuration record for one cache instance.
///
/// All fields are public: populate what you need, take the rest from
/// [`CacheConfig::default`].
pub struct CacheConfig<K, V> {
    /// Sizing hint for the index.
    pub initial_capacity: Option<usize>,
    /// Sizing hint for lock striping in strict mode.
    pub concurrency_level: Option<usize>,
    /// Entry-count cap. `None` disables.
    pub maximum_size: Option<u64>,
    /// Total-weight cap. `None` disables; requires a `weigher`.
    pub maximum_weight: Option<u64>,
    /// Fixed TTL measured from the last write. `None` disables.
    pub expire_after_write: Option<Duration>,
    /// Fixed TTL measured from the last read or write. `None` disables.
    pub expire_after_access: Option<Duration>,
    /// Fixed refresh interval. `None` disables unless `refresh_policy`
    /// is set.
    pub refresh_after_write: Option<Duration>,
    /// When false, the metric counters stay at zero.
    pub record_stats: bool,
    /// Victim selection strategy.
    pub eviction_policy: EvictionPolicyKind,
    /// Operating mode.
    pub strategy: Strategy,
    /// Observer of entries leaving the index.
    pub removal_listener: Option<Arc<dyn RemovalListener<K, V>>>,
    /// Observer of inserts and updates.
    pub put_listener: Option<Arc<dyn PutListener<K, V>>>,
    /// Synchronous write-through hook.
    pub writer: Option<Arc<dyn CacheWriter<K, V>>>,
    /// Per-entry custom expiration hooks.
    pub expiry: Option<Arc<dyn Expiry<K, V>>>,
    /// Per-entry refresh schedule; falls back to `refresh_after_write`.
    pub refresh_policy: Option<Arc<dyn RefreshPolicy<K, V>>>,
    /// Entry pricing for the weight cap.
    pub weigher: Option<Arc<dyn Weigher<K, V>>>,
    /// Value computation for the loading operations (`get`, `get_all`,
    /// `refresh`).
    pub loader: Option<Arc<dyn CacheLoader<K, V>>>,
}

impl<K, V> Default for CacheConfig<K, V> {
    fn default() -> Self {
        CacheConfig {
            initial_capacity: None,
            concurrency_level: None,
            maximum_size: None,
            maximum_weight: None,
            expire_after_write: None,
            expire_after_access: None,
            refresh_after_write: None,
            record_stats: true,
            eviction_policy: EvictionPolicyKind::default(),
            strategy: Strategy::default(),
            removal_listener: None,
            put_listener: None,
            writer: None,
            expiry: None,
            refresh_policy: None,
            weigher: None,
            loader: None,
        }
    }
}

impl<K, V> CacheConfig<K, V> {
    /// Rejects records that cannot produce a working engine.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.maximum_weight.is_some() && self.weigher.is_none() {
            return Err(CacheError::InvalidConfiguration(
                "maximum_weight requires a weigher".into(),
            ));
        }
        if (self.refresh_after_write.is_some() || self.refresh_policy.is_some())
            && self.loader.is_none()
        {
            return Err(CacheError::InvalidConfiguration(
                "refresh requires a loader".into(),
            ));
        }
        Ok(())
    }

    /// Index sizing hint with the implementation default applied.
    pub(crate) fn effective_initial_capacity(&self) -> usize {
        self.initial_capacity.unwrap_or(16)
    }

    /// Lock-stripe count with the implementation default applied, rounded
    /// up to a power of two.
    pub(crate) fn effective_concurrency_level(&self) -> usize {
        self.concurrency_level
            .unwrap_or_else(|| num_cpus::get().saturating_mul(4).clamp(16, 64))
            .max(1)
            .next_power_of_two()
    }

    /// Capacity estimate used to size the frequency sketch and policy
    /// state: the entry cap when configured, else the initial capacity
    /// hint.
    pub(crate) fn capacity_hint(&self) -> usize {
        self.maximum_size
            .map(|n| usize::try_from(n).unwrap_or(usize::MAX))
            .unwrap_or_else(|| self.effective_initial_capacity().max(1_024))
    }

    /// True when any refresh trigger is configured.
    pub(crate) fn refresh_enabled(&self) -> bool {
        self.refresh_after_write.is_some() || self.refresh_policy.is_some()
    }
}

impl<K, V> fmt::Debug for CacheConfig<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("initial_capacity", &self.initial_capacity)
            .field("concurrency_level", &self.concurrency_level)
            .field("maximum_size", &self.maximum_size)
            .field("maximum_weight", &self.maximum_weight)
            .field("expire_after_write", &self.expire_after_write)
            .field("expire_after_access", &self.expire_after_access)
            .field("refresh_after_write", &self.refresh_after_write)
            .field("record_stats", &self.record_stats)
            .field("eviction_policy", &self.eviction_policy)
            .field("strategy", &self.strategy)
            .field("removal_listener", &self.removal_listener.is_some())
            .field("put_listener", &self.put_listener.is_some())
            .field("writer", &self.writer.is_some())
            .field("expiry", &self.expiry.is_some())
            .field("refresh_policy", &self.refresh_policy.is_some())
            .field("weigher", &self.weigher.is_some())
            .field("loader", &self.loader.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;

    #[test]
    fn test_default_is_valid() {
        let config: CacheConfig<i32, i32> = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.strategy, Strategy::Fast);
        assert!(config.record_stats);
    }

    #[test]
    fn test_weight_cap_requires_weigher() {
        let config: CacheConfig<i32, i32> = CacheConfig {
            maximum_weight: Some(1_000),
            ..CacheConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CacheError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_refresh_requires_loader() {
        let config: CacheConfig<i32, i32> = CacheConfig {
            refresh_after_write: Some(Duration::from_secs(1)),
            ..CacheConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CacheError::InvalidConfiguration(_))
        ));

        struct Nop;
        impl CacheLoader<i32, i32> for Nop {
            fn load(&self, _key: &i32) -> Result<Option<i32>, BoxError> {
                Ok(None)
            }
        }
        let config: CacheConfig<i32, i32> = CacheConfig {
            refresh_after_write: Some(Duration::from_secs(1)),
            loader: Some(Arc::new(Nop)),
            ..CacheConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_effective_concurrency_is_power_of_two() {
        let config: CacheConfig<i32, i32> = CacheConfig {
            concurrency_level: Some(17),
            ..CacheConfig::default()
        };
        assert_eq!(config.effective_concurrency_level(), 32);
        let config: CacheConfig<i32, i32> = CacheConfig::default();
        assert!(config.effective_concurrency_level().is_power_of_two());
    }

    #[test]
    fn test_capacity_hint_prefers_maximum_size() {
        let config: CacheConfig<i32, i32> = CacheConfig {
            maximum_size: Some(500),
            ..CacheConfig::default()
        };
        assert_eq!(config.capacity_hint(), 500);
    }
}
