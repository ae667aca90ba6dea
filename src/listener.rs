//! Lifecycle Events
//!
//! Every entry that leaves the index fires a removal event tagged with the
//! reason; every successful insert fires a put event. An optional writer
//! contract mirrors mutations synchronously to an external store.
//!
//! Listener and writer failures are logged and swallowed on the mutating
//! thread; one faulty observer must never poison the cache. Invocation is
//! synchronous, so long-running listeners throttle the engine and should
//! be avoided.

use core::fmt;

use log::warn;

use crate::error::BoxError;

/// Why an entry left the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// The caller invalidated the key.
    Explicit,
    /// A put or refresh replaced the value.
    Replaced,
    /// The size or weight cap forced an eviction.
    Size,
    /// A TTL or custom expiry fired.
    Expired,
}

impl RemovalCause {
    /// True for removals the cache decided on its own (capacity or
    /// expiration), as opposed to caller-driven ones.
    #[inline]
    pub fn was_evicted(self) -> bool {
        matches!(self, RemovalCause::Size | RemovalCause::Expired)
    }
}

impl fmt::Display for RemovalCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemovalCause::Explicit => "explicit",
            RemovalCause::Replaced => "replaced",
            RemovalCause::Size => "size",
            RemovalCause::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// Whether a put created a new binding or overwrote one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutCause {
    /// The key was absent.
    Insert,
    /// The key was present; the old entry was replaced.
    Update,
}

impl fmt::Display for PutCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PutCause::Insert => "insert",
            PutCause::Update => "update",
        })
    }
}

/// Observer of entries leaving the index.
pub trait RemovalListener<K, V>: Send + Sync {
    /// Called after `key`'s entry was removed for `cause`.
    fn on_removal(&self, key: &K, value: &V, cause: RemovalCause) -> Result<(), BoxError>;
}

/// Observer of successful inserts and updates.
pub trait PutListener<K, V>: Send + Sync {
    /// Called after `key` was bound to `value`.
    fn on_put(&self, key: &K, value: &V, cause: PutCause) -> Result<(), BoxError>;
}

/// Synchronous write-through contract, invoked on the mutating thread
/// before listeners.
pub trait CacheWriter<K, V>: Send + Sync {
    /// Called on every put with the new binding.
    fn write(&self, key: &K, value: &V) -> Result<(), BoxError>;

    /// Called on every removal with the outgoing binding.
    fn delete(&self, key: &K, value: &V, cause: RemovalCause) -> Result<(), BoxError>;
}

/// Fires the removal listener inside the log-and-swallow boundary.
pub(crate) fn notify_removal<K, V>(
    listener: Option<&dyn RemovalListener<K, V>>,
    key: &K,
    value: &V,
    cause: RemovalCause,
) {
    if let Some(listener) = listener {
        if let Err(err) = listener.on_removal(key, value, cause) {
            warn!("removal listener failed (cause {cause}): {err}");
        }
    }
}

/// Fires the put listener inside the log-and-swallow boundary.
pub(crate) fn notify_put<K, V>(
    listener: Option<&dyn PutListener<K, V>>,
    key: &K,
    value: &V,
    cause: PutCause,
) {
    if let Some(listener) = listener {
        if let Err(err) = listener.on_put(key, value, cause) {
            warn!("put listener failed (cause {cause}): {err}");
        }
    }
}

/// Invokes the writer's `write` hook inside the boundary.
pub(crate) fn writer_write<K, V>(writer: Option<&dyn CacheWriter<K, V>>, key: &K, value: &V) {
    if let Some(writer) = writer {
        if let Err(err) = writer.write(key, value) {
            warn!("cache writer write failed: {err}");
        }
    }
}

/// Invokes the writer's `delete` hook inside the boundary.
pub(crate) fn writer_delete<K, V>(
    writer: Option<&dyn CacheWriter<K, V>>,
    key: &K,
    value: &V,
    cause: RemovalCause,
) {
    if let Some(writer) = writer {
        if let Err(err) = writer.delete(key, value, cause) {
            warn!("cache writer delete failed (cause {cause}): {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);
    impl RemovalListener<i32, i32> for Counting {
        fn on_removal(&self, _k: &i32, _v: &i32, _c: RemovalCause) -> Result<(), BoxError> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    struct Faulty;
    impl RemovalListener<i32, i32> for Faulty {
        fn on_removal(&self, _k: &i32, _v: &i32, _c: RemovalCause) -> Result<(), BoxError> {
            Err("listener bug".into())
        }
    }

    #[test]
    fn test_cause_classification() {
        assert!(RemovalCause::Size.was_evicted());
        assert!(RemovalCause::Expired.was_evicted());
        assert!(!RemovalCause::Explicit.was_evicted());
        assert!(!RemovalCause::Replaced.was_evicted());
    }

    #[test]
    fn test_cause_display() {
        assert_eq!(RemovalCause::Size.to_string(), "size");
        assert_eq!(PutCause::Update.to_string(), "update");
    }

    #[test]
    fn test_notify_invokes_listener() {
        let listener = Counting(AtomicUsize::new(0));
        notify_removal(
            Some(&listener as &dyn RemovalListener<_, _>),
            &1,
            &2,
            RemovalCause::Explicit,
        );
        assert_eq!(listener.0.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_faulty_listener_is_swallowed() {
        // Must not panic or propagate.
        notify_removal(
            Some(&Faulty as &dyn RemovalListener<_, _>),
            &1,
            &2,
            RemovalCause::Size,
        );
    }

    #[test]
    fn test_absent_observers_are_noops() {
        notify_removal::<i32, i32>(None, &1, &2, RemovalCause::Expired);
        notify_put::<i32, i32>(None, &1, &2, PutCause::Insert);
        writer_write::<i32, i32>(None, &1, &2);
        writer_delete::<i32, i32>(None, &1, &2, RemovalCause::Explicit);
    }
}
