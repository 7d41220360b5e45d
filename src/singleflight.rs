//! Single-flight coordination: at most one in-flight execution per key.
//!
//! When several callers ask for the same key while a load is running, only
//! the first executes the work; the rest block on the in-flight record and
//! receive the same result. The record is removed together with completion,
//! so a later call with the same key starts fresh.
//!
//! The call map's lock is held only to register and remove records, never
//! while the work itself runs; waiters park on the record's condvar.
//!
//! Not reentrant: calling [`SingleFlight::execute`] with the same key from
//! inside the work closure deadlocks. That is a caller obligation, not
//! something the coordinator guards against.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

struct Call<T> {
    result: Mutex<Option<T>>,
    done: Condvar,
}

/// Deduplicates concurrent executions that share a key.
///
/// `T` must be `Clone` so every waiter can take its own copy of the
/// outcome; in practice `T` is a `Result` with cloneable error types.
///
/// # Example
///
/// ```
/// use meshcache::singleflight::SingleFlight;
///
/// let flight: SingleFlight<u32> = SingleFlight::new();
/// let value = flight.execute("answer", || 42);
/// assert_eq!(value, 42);
/// ```
pub struct SingleFlight<T> {
    calls: Mutex<FxHashMap<String, Arc<Call<T>>>>,
}

impl<T: Clone> SingleFlight<T> {
    /// Creates a coordinator with no in-flight calls.
    pub fn new() -> Self {
        SingleFlight {
            calls: Mutex::new(FxHashMap::default()),
        }
    }

    /// Runs `work` unless a call for `key` is already in flight, in which
    /// case the caller blocks until that call completes and receives the
    /// same result without invoking `work`.
    ///
    /// Exactly one execution happens per key per in-flight window. No
    /// ordering is promised among waiters beyond all observing the same
    /// outcome.
    pub fn execute<F>(&self, key: &str, work: F) -> T
    where
        F: FnOnce() -> T,
    {
        let call = {
            let mut calls = self.calls.lock();
            if let Some(existing) = calls.get(key) {
                let existing = Arc::clone(existing);
                drop(calls);
                let mut result = existing.result.lock();
                loop {
                    if let Some(value) = result.as_ref() {
                        return value.clone();
                    }
                    existing.done.wait(&mut result);
                }
            }
            let call = Arc::new(Call {
                result: Mutex::new(None),
                done: Condvar::new(),
            });
            calls.insert(key.to_owned(), Arc::clone(&call));
            call
        };

        let value = work();

        {
            let mut result = call.result.lock();
            *result = Some(value.clone());
            call.done.notify_all();
        }
        self.calls.lock().remove(key);

        value
    }

    /// Returns the number of calls currently in flight.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.calls.lock().len())
            .finish_non_exhaustive()
    }
}
