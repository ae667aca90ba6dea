//! Loading and Single-Flight Coordination
//!
//! A loading cache computes missing values through a user-supplied
//! [`CacheLoader`]. The engine guarantees **single-flight** semantics: at
//! most one loader invocation runs per key at any instant. The thread that
//! wins the race executes the loader; every other thread attaches to the
//! in-flight load and blocks until it settles, then shares its outcome.
//!
//! ```text
//!   thread A ── get(k) ── miss ── wins flight ── load(k) ──▶ install + complete
//!   thread B ── get(k) ── miss ── flight found ───────wait──▶ shared value
//!   thread C ── get(k) ── miss ── flight found ───────wait──▶ shared value
//! ```
//!
//! The in-flight table maps keys to promises. A promise is a mutex-guarded
//! slot plus a condvar; waiters sleep on the condvar until the winner
//! stores the result and broadcasts. The table entry is removed after the
//! value has been installed in the index, so late arrivals either hit the
//! index or join a still-pending flight, never both.

use core::fmt;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::error::{BoxError, CacheError};

/// Computes values for missing keys.
///
/// `load` returning `Ok(None)` models a loader that produced no value; the
/// engine reports it as [`CacheError::LoaderNullValue`] and counts a load
/// failure. Errors are propagated verbatim to every caller attached to the
/// load.
pub trait CacheLoader<K, V>: Send + Sync {
    /// Loads the value for `key`.
    fn load(&self, key: &K) -> Result<Option<V>, BoxError>;

    /// Bulk form used by `get_all`. Returning `Ok(None)` means bulk
    /// loading is unsupported and the engine falls back to parallel
    /// per-key loads.
    fn load_all(&self, keys: &[K]) -> Result<Option<HashMap<K, V>>, BoxError>
    where
        K: Sized,
    {
        let _ = keys;
        Ok(None)
    }

    /// Recomputes the value for an already-cached key during refresh.
    /// Defaults to `load`.
    fn reload(&self, key: &K, old_value: &V) -> Result<Option<V>, BoxError> {
        let _ = old_value;
        self.load(key)
    }
}

enum FlightState<V> {
    Pending,
    Done(Result<V, CacheError>),
}

/// One in-flight load: a promise the winner fulfills and waiters block on.
pub(crate) struct Flight<V> {
    state: Mutex<FlightState<V>>,
    settled: Condvar,
}

impl<V: Clone> Flight<V> {
    fn new() -> Self {
        Flight {
            state: Mutex::new(FlightState::Pending),
            settled: Condvar::new(),
        }
    }

    /// Stores the outcome and wakes every waiter.
    fn complete(&self, result: Result<V, CacheError>) {
        let mut state = self.state.lock();
        *state = FlightState::Done(result);
        self.settled.notify_all();
    }

    /// Blocks until the flight settles, then returns a copy of the
    /// outcome.
    pub(crate) fn wait(&self) -> Result<V, CacheError> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                FlightState::Done(result) => return result.clone(),
                FlightState::Pending => self.settled.wait(&mut state),
            }
        }
    }
}

impl<V> fmt::Debug for Flight<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flight").finish()
    }
}

/// Outcome of probing the in-flight table for a key.
pub(crate) enum FlightRole<V> {
    /// This thread won the race and must run the loader, then settle the
    /// flight.
    Leader(Arc<Flight<V>>),
    /// Another thread is loading; wait on its flight.
    Follower(Arc<Flight<V>>),
}

/// The in-flight load table: at most one pending flight per key.
pub(crate) struct InFlightLoads<K, V> {
    flights: DashMap<K, Arc<Flight<V>>>,
}

impl<K: Hash + Eq + Clone, V: Clone> InFlightLoads<K, V> {
    pub(crate) fn new() -> Self {
        InFlightLoads {
            flights: DashMap::new(),
        }
    }

    /// Atomically joins the key's pending flight or begins a new one.
    pub(crate) fn join_or_begin(&self, key: &K) -> FlightRole<V> {
        match self.flights.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                FlightRole::Follower(Arc::clone(existing.get()))
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let flight = Arc::new(Flight::new());
                vacant.insert(Arc::clone(&flight));
                FlightRole::Leader(flight)
            }
        }
    }

    /// Settles the leader's flight and retires it from the table. The
    /// caller installs the value in the index *before* calling this, so a
    /// thread that misses the retired flight finds the value instead.
    pub(crate) fn complete(&self, key: &K, flight: &Flight<V>, result: Result<V, CacheError>) {
        flight.complete(result);
        self.flights.remove(key);
    }

    /// Number of pending flights, for tests and introspection.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.flights.len()
    }
}

impl<K, V> fmt::Debug for InFlightLoads<K, V>
where
    K: Hash + Eq,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlightLoads")
            .field("pending", &self.flights.len())
            .finish()
    }
}
