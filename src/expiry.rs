//! Expiration Model
//!
//! Two fixed TTL dimensions plus an optional per-entry hook:
//!
//! - **Expire-after-write**: the entry dies a fixed duration after the
//!   write that created it. Materialized as an absolute deadline on the
//!   entry at creation time.
//! - **Expire-after-access**: the entry dies once it has been idle for a
//!   fixed duration. Checked dynamically against the entry's access
//!   timestamp, since every read pushes the horizon out.
//! - **Custom expiry** ([`Expiry`]): user hooks consulted on create,
//!   update, and read, each returning a fresh time-to-live for the entry.
//!   A failing hook is logged and the engine falls back to the fixed
//!   write TTL (or "never").
//!
//! An entry is expired as soon as any configured dimension fires. Reads
//! observe expiration lazily (expired-on-read is removed and reported as a
//! miss plus an eviction), and a background sweep scans for entries no
//! read will ever touch again.

use log::warn;

use crate::entry::CacheEntry;
use crate::error::BoxError;
use crate::time::NEVER;

/// Per-entry custom expiration hooks.
///
/// Each hook returns the number of nanoseconds until the entry should
/// expire, measured from `now`; [`NEVER`](crate::time::NEVER) disables
/// expiration for the entry. `current_duration` is the time remaining
/// before the entry's present deadline.
///
/// Hook failures never poison the cache: the engine logs them and keeps
/// the fixed-TTL behavior.
pub trait Expiry<K, V>: Send + Sync {
    /// Time-to-live for a newly created entry.
    fn expire_after_create(&self, key: &K, value: &V, now: u64) -> Result<u64, BoxError>;

    /// Time-to-live after a value replacement. Defaults to the create
    /// hook.
    fn expire_after_update(
        &self,
        key: &K,
        value: &V,
        now: u64,
        current_duration: u64,
    ) -> Result<u64, BoxError> {
        let _ = current_duration;
        self.expire_after_create(key, value, now)
    }

    /// Time-to-live after a read. Defaults to leaving the deadline alone.
    fn expire_after_read(
        &self,
        key: &K,
        value: &V,
        now: u64,
        current_duration: u64,
    ) -> Result<u64, BoxError> {
        let _ = (key, value, now);
        Ok(current_duration)
    }
}

/// The fixed TTL dimensions from the configuration record.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Expiration {
    /// Nanoseconds after write, `None` when the dimension is off.
    pub(crate) after_write: Option<u64>,
    /// Nanoseconds after the last access, `None` when the dimension is off.
    pub(crate) after_access: Option<u64>,
}

impl Expiration {
    /// The write-based TTL used when no custom expiry applies:
    /// `expire_after_write` when configured, otherwise never.
    #[inline]
    pub(crate) fn write_ttl(&self) -> u64 {
        self.after_write.unwrap_or(NEVER)
    }

    /// True when any configured dimension has fired for `entry` at `now`.
    /// The entry's own deadline covers the write dimension and custom
    /// expiry; the access dimension is evaluated here because reads keep
    /// moving it.
    pub(crate) fn is_expired<V>(&self, entry: &CacheEntry<V>, now: u64) -> bool {
        if entry.is_expired(now) {
            return true;
        }
        match self.after_access {
            Some(idle) => now.saturating_sub(entry.access_time()) >= idle,
            None => false,
        }
    }
}

/// Invokes a fallible expiry hook, logging and substituting `fallback_ttl`
/// on failure.
pub(crate) fn ttl_or_fallback(result: Result<u64, BoxError>, fallback_ttl: u64, hook: &str) -> u64 {
    match result {
        Ok(ttl) => ttl,
        Err(err) => {
            warn!("custom expiry {hook} hook failed, using fixed TTL: {err}");
            fallback_ttl
        }
    }
}
