//! Process-wide admission bookkeeping.
//!
//! `ConnectionCounter` holds the number of currently admitted connections and
//! the configured maximum. Admission hands out a `Slot`, and the slot is the
//! only way to give the capacity back, so every admitted connection releases
//! exactly once.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Atomic count of admitted connections bounded by a fixed limit.
#[derive(Debug)]
pub struct ConnectionCounter {
    current: AtomicUsize,
    limit: usize,
}

impl ConnectionCounter {
    /// Create a counter with no admitted connections.
    pub fn new(limit: NonZeroUsize) -> Arc<Self> {
        Arc::new(Self {
            current: AtomicUsize::new(0),
            limit: limit.get(),
        })
    }

    /// Try to take one unit of capacity.
    ///
    /// The check and the increment happen in a single compare-and-swap, so
    /// `current` never exceeds `limit`, even transiently. Returns `None`
    /// without touching the count when the counter is saturated.
    pub fn try_admit(self: &Arc<Self>) -> Option<Slot> {
        let limit = self.limit;
        let previous = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then(|| n + 1)
            })
            .ok()?;

        Some(Slot {
            counter: Some(Arc::clone(self)),
            admitted: previous + 1,
        })
    }

    /// Give one unit back, returning the remaining count.
    fn release(&self) -> usize {
        match self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(previous) => previous - 1,
            Err(_) => {
                debug_assert!(false, "connection counter released below zero");
                0
            }
        }
    }

    /// Number of currently admitted connections.
    pub fn current(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    /// Configured maximum.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Whether every slot is taken.
    pub fn is_saturated(&self) -> bool {
        self.current() >= self.limit
    }
}

/// One admitted connection's share of the counter.
///
/// Dropping the slot releases it; `release` does the same and reports the
/// remaining count.
#[derive(Debug)]
pub struct Slot {
    counter: Option<Arc<ConnectionCounter>>,
    admitted: usize,
}

impl Slot {
    /// Count of admitted connections right after this one was admitted.
    pub fn admitted_count(&self) -> usize {
        self.admitted
    }

    /// Release the slot and return the count that remains.
    pub fn release(mut self) -> usize {
        self.counter
            .take()
            .map(|counter| counter.release())
            .unwrap_or(0)
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(counter) = self.counter.take() {
            counter.release();
        }
    }
}
