//! [`LatestSlot`] – a single-owner, latest-value cell.
//!
//! Writers replace the stored value under the slot's lock; readers copy the
//! value out under the same lock and release it before doing anything else.
//! The critical section is always just an assignment or a clone, so a reader
//! never observes a partially written value and never holds the lock across
//! downstream computation.
//!
//! Each replacement bumps a generation counter, which lets a consumer tell
//! "a new value arrived since I last looked" apart from "same value again".

use parking_lot::Mutex;

struct Inner<T> {
    generation: u64,
    value: Option<T>,
}

/// Thread-safe holder for the most recent value of one channel.
pub struct LatestSlot<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestSlot<T> {
    /// An empty slot ("no data yet").
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                generation: 0,
                value: None,
            }),
        }
    }

    /// Replace the stored value and return the new generation.
    ///
    /// The previous value is dropped after the lock is released.
    pub fn store(&self, value: T) -> u64 {
        let (generation, previous) = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            (inner.generation, inner.value.replace(value))
        };
        drop(previous);
        generation
    }

    /// Empty the slot, returning whatever it held.
    pub fn clear(&self) -> Option<T> {
        self.inner.lock().value.take()
    }

    /// Generation of the current value; `0` until the first store.
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// True when nothing has been stored (or the slot was cleared).
    pub fn is_empty(&self) -> bool {
        self.inner.lock().value.is_none()
    }
}

impl<T: Clone> LatestSlot<T> {
    /// A copy of the latest value, or `None` if nothing has arrived yet.
    pub fn latest(&self) -> Option<T> {
        self.inner.lock().value.clone()
    }

    /// The latest value together with its generation.
    pub fn latest_with_generation(&self) -> Option<(u64, T)> {
        let inner = self.inner.lock();
        inner.value.clone().map(|v| (inner.generation, v))
    }

    /// The latest value, only if it is newer than `seen`.
    pub fn newer_than(&self, seen: u64) -> Option<(u64, T)> {
        let inner = self.inner.lock();
        if inner.generation <= seen {
            return None;
        }
        inner.value.clone().map(|v| (inner.generation, v))
    }
}
