//! Error types for cache operations.
//!
//! The cache distinguishes two failure worlds:
//!
//! - **Loader failures** are propagated verbatim to the caller of `get` /
//!   `get_or_compute` and counted as load failures. Because several threads
//!   can be attached to one in-flight load, the underlying error is stored
//!   behind an [`SharedError`] handle that every waiter can clone.
//! - **User-callback failures** (listeners, expiry, refresh policy, writer,
//!   weigher) are caught at the call site, logged, and replaced with a
//!   sensible default. They never surface through this module.
//!
//! Absence of a key is not an error; it is modeled as `Option::None`.

use core::fmt;
use std::error::Error;
use std::sync::Arc;

/// Boxed error type returned by user-supplied callables (loaders, listeners,
/// expiry and refresh hooks, weighers).
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// A cloneable handle to a loader's error.
///
/// Single-flight loading hands the same failure to every caller attached to
/// the in-flight load, so the source error must be shareable. `SharedError`
/// wraps it in an [`Arc`] and forwards `Display` and `source()`.
#[derive(Debug, Clone)]
pub struct SharedError(Arc<dyn Error + Send + Sync + 'static>);

impl SharedError {
    /// Wraps a boxed error into a shareable handle.
    pub fn new(err: BoxError) -> Self {
        SharedError(Arc::from(err))
    }
}

impl fmt::Display for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Error for SharedError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.0.source()
    }
}

/// Errors surfaced by cache operations.
///
/// Cloneable so that every thread attached to a single-flight load observes
/// the same outcome.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The user-supplied loader (or compute function) failed. The original
    /// error is preserved as the source.
    #[error("loader failed: {0}")]
    Loader(#[source] SharedError),

    /// The loader completed but produced no value. Treated as a load
    /// failure; nothing is inserted.
    #[error("loader produced no value")]
    LoaderNullValue,

    /// A loading-only operation was invoked on a cache constructed without
    /// a loader.
    #[error("operation `{0}` requires a configured loader")]
    Unsupported(&'static str),

    /// The configuration record failed validation at construction time.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl CacheError {
    /// Wraps a user callable's error into the loader variant.
    #[inline]
    pub fn loader(err: BoxError) -> Self {
        CacheError::Loader(SharedError::new(err))
    }
}
