//! Entry weighing.
//!
//! When a maximum weight is configured, every insertion consults the
//! user's [`Weigher`] to price the entry. Weights are positive; a weigher
//! that fails or returns zero contributes the default weight of one so a
//! faulty callback cannot stall admission.

use log::warn;

use crate::error::BoxError;

/// Assigns a positive integer weight to an entry at insertion time.
pub trait Weigher<K, V>: Send + Sync {
    /// Returns the weight of the binding, at least 1.
    fn weigh(&self, key: &K, value: &V) -> Result<u64, BoxError>;
}

/// Every entry weighs one; used when no weigher is configured.
pub(crate) const DEFAULT_WEIGHT: u64 = 1;

/// Applies the weigher with the log-and-default error boundary.
pub(crate) fn weigh_or_default<K, V>(
    weigher: Option<&dyn Weigher<K, V>>,
    key: &K,
    value: &V,
) -> u64 {
    match weigher {
        None => DEFAULT_WEIGHT,
        Some(w) => match w.weigh(key, value) {
            Ok(0) => {
                warn!("weigher returned 0, substituting weight 1");
                DEFAULT_WEIGHT
            }
            Ok(weight) => weight,
            Err(err) => {
                warn!("weigher failed, substituting weight 1: {err}");
                DEFAULT_WEIGHT
            }
        },
    }
}
