//! Background Refresh Policies
//!
//! When refresh is configured, a periodic pass walks the index and asks the
//! refresh policy how stale each entry may get. Entries past their interval
//! are reloaded on the worker pool; readers keep seeing the old value until
//! the reload lands. The scheduler itself lives in the engine; this module
//! defines the policy contracts:
//!
//! - [`FixedRefresh`]: one interval for everything.
//! - [`TimeWindowedRefresh`]: disjoint daily windows in a named time zone,
//!   each with its own interval (say, every 5 minutes during trading
//!   hours, hourly overnight), and a default outside all windows.
//! - Any user type implementing [`RefreshPolicy`].
//!
//! Policy failures fall back to the fixed interval; callback failures are
//! logged and swallowed.

use core::fmt;

use chrono::{NaiveTime, Utc};
use chrono_tz::Tz;
use log::warn;

use crate::error::{BoxError, CacheError};

/// Decides how often each entry is refreshed and observes the outcomes.
pub trait RefreshPolicy<K, V>: Send + Sync {
    /// Nanoseconds an entry may age before the scheduler reloads it.
    /// `now` is the engine's monotonic reading for the pass.
    fn refresh_interval(&self, key: &K, value: &V, now: u64) -> Result<u64, BoxError>;

    /// Called after a reload landed. Failures are logged, never raised.
    fn on_refresh_success(&self, key: &K, new_value: &V) -> Result<(), BoxError> {
        let _ = (key, new_value);
        Ok(())
    }

    /// Called after a reload failed; the old entry stays resident.
    fn on_refresh_failure(&self, key: &K, error: &CacheError) -> Result<(), BoxError> {
        let _ = (key, error);
        Ok(())
    }
}

/// Refresh every entry on one fixed interval.
#[derive(Debug, Clone, Copy)]
pub struct FixedRefresh {
    interval_nanos: u64,
}

impl FixedRefresh {
    /// Creates a fixed-interval policy.
    pub fn new(interval_nanos: u64) -> Self {
        FixedRefresh { interval_nanos }
    }
}

impl<K, V> RefreshPolicy<K, V> for FixedRefresh {
    fn refresh_interval(&self, _key: &K, _value: &V, _now: u64) -> Result<u64, BoxError> {
        Ok(self.interval_nanos)
    }
}

/// One daily window with its own refresh interval.
///
/// `start` is inclusive, `end` exclusive, both naive times of day in the
/// policy's time zone. Windows may not wrap midnight; model a wrapping
/// schedule as two windows.
#[derive(Debug, Clone, Copy)]
pub struct RefreshWindow {
    /// Inclusive start of the window.
    pub start: NaiveTime,
    /// Exclusive end of the window.
    pub end: NaiveTime,
    /// Refresh interval while inside the window, in nanoseconds.
    pub interval_nanos: u64,
}

impl RefreshWindow {
    #[inline]
    fn contains(&self, t: NaiveTime) -> bool {
        self.start <= t && t < self.end
    }
}

/// Interval schedule keyed by time of day in a named time zone.
///
/// # Examples
///
/// ```
/// use chrono::NaiveTime;
/// use chrono_tz::Tz;
/// use loadcache::refresh::{RefreshWindow, TimeWindowedRefresh};
///
/// let policy = TimeWindowedRefresh::new(
///     "America/New_York".parse::<Tz>().unwrap(),
///     vec![RefreshWindow {
///         start: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
///         end: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
///         interval_nanos: 5 * 60 * 1_000_000_000,
///     }],
///     60 * 60 * 1_000_000_000,
/// )
/// .unwrap();
/// # let _ = policy;
/// ```
pub struct TimeWindowedRefresh {
    tz: Tz,
    /// Sorted by start; validated disjoint.
    windows: Vec<RefreshWindow>,
    default_interval_nanos: u64,
}

impl TimeWindowedRefresh {
    /// Builds the policy, validating that every window is well-formed
    /// (`start < end`) and that no two windows overlap.
    pub fn new(
        tz: Tz,
        mut windows: Vec<RefreshWindow>,
        default_interval_nanos: u64,
    ) -> Result<Self, CacheError> {
        for w in &windows {
            if w.start >= w.end {
                return Err(CacheError::InvalidConfiguration(format!(
                    "refresh window start {} is not before end {}",
                    w.start, w.end
                )));
            }
        }
        windows.sort_by_key(|w| w.start);
        for pair in windows.windows(2) {
            if pair[1].start < pair[0].end {
                return Err(CacheError::InvalidConfiguration(format!(
                    "refresh windows overlap: [{}, {}) and [{}, {})",
                    pair[0].start, pair[0].end, pair[1].start, pair[1].end
                )));
            }
        }
        Ok(TimeWindowedRefresh {
            tz,
            windows,
            default_interval_nanos,
        })
    }

    /// Interval in force at the given local time of day.
    fn interval_at(&self, local: NaiveTime) -> u64 {
        self.windows
            .iter()
            .find(|w| w.contains(local))
            .map(|w| w.interval_nanos)
            .unwrap_or(self.default_interval_nanos)
    }
}

impl<K, V> RefreshPolicy<K, V> for TimeWindowedRefresh {
    fn refresh_interval(&self, _key: &K, _value: &V, _now: u64) -> Result<u64, BoxError> {
        let local = Utc::now().with_timezone(&self.tz).time();
        Ok(self.interval_at(local))
    }
}

impl fmt::Debug for TimeWindowedRefresh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeWindowedRefresh")
            .field("tz", &self.tz)
            .field("windows", &self.windows.len())
            .field("default_interval_nanos", &self.default_interval_nanos)
            .finish()
    }
}

/// Applies the policy's interval hook with the fixed-interval fallback.
pub(crate) fn interval_or_fallback<K, V>(
    policy: &dyn RefreshPolicy<K, V>,
    key: &K,
    value: &V,
    now: u64,
    fallback: u64,
) -> u64 {
    match policy.refresh_interval(key, value, now) {
        Ok(interval) => interval,
        Err(err) => {
            warn!("refresh policy failed, using fixed interval: {err}");
            fallback
        }
    }
}

/// Fires the success callback inside the log-and-swallow boundary.
pub(crate) fn notify_refresh_success<K, V>(
    policy: &dyn RefreshPolicy<K, V>,
    key: &K,
    new_value: &V,
) {
    if let Err(err) = policy.on_refresh_success(key, new_value) {
        warn!("refresh success callback failed: {err}");
    }
}

/// Fires the failure callback inside the log-and-swallow boundary.
pub(crate) fn notify_refresh_failure<K, V>(
    policy: &dyn RefreshPolicy<K, V>,
    key: &K,
    error: &CacheError,
) {
    if let Err(err) = policy.on_refresh_failure(key, error) {
        warn!("refresh failure callback failed: {err}");
    }
}
