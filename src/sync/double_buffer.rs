//! Producer/consumer handoff through a locked back buffer and a dirty flag.
//!
//! ```text
//!   producer thread                      consumer (frame scheduler)
//!   ───────────────                      ──────────────────────────
//!   write(|back| ...)  ──┐            ┌──  swap_into(&mut front)
//!   lock() / drop       ─┤  Mutex     ├──  copy_into(&mut front)
//!                        └─ back ─────┘
//!                           dirty
//! ```
//!
//! The front buffer lives with the consumer, outside the lock. The consumer
//! only takes the mutex for the duration of a single copy, so a producer is
//! never held up by rendering and the consumer never sees a half-written
//! back buffer.

use parking_lot::{Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};

#[derive(Debug)]
struct Back<T> {
    value: T,
    dirty: bool,
    publishes: u64,
    swaps: u64,
}

/// Counters describing how often a buffer was published and consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct BufferStats {
    pub publishes: u64,
    pub swaps: u64,
}

#[derive(Debug)]
pub struct DoubleBuffer<T> {
    back: Mutex<Back<T>>,
}

impl<T: Clone> DoubleBuffer<T> {
    /// Create a buffer whose back side starts clean.
    pub fn new(initial: T) -> Self {
        Self {
            back: Mutex::new(Back {
                value: initial,
                dirty: false,
                publishes: 0,
                swaps: 0,
            }),
        }
    }

    /// Create a buffer whose initial value is already waiting to be consumed.
    pub fn new_dirty(initial: T) -> Self {
        let buffer = Self::new(initial);
        buffer.back.lock().dirty = true;
        buffer
    }

    /// Mutate the back buffer under the lock and mark it dirty.
    pub fn write<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut back = self.back.lock();
        let result = f(&mut back.value);
        back.dirty = true;
        back.publishes += 1;
        result
    }

    /// Hold the back buffer for an in-place write. The buffer is marked dirty
    /// when the returned guard is dropped.
    pub fn lock(&self) -> BackBuffer<'_, T> {
        BackBuffer {
            guard: self.back.lock(),
        }
    }

    /// Copy the back buffer into `front` if it holds unconsumed data.
    /// Returns `true` when a copy happened; the dirty flag is cleared by
    /// exactly that copy.
    pub fn swap_into(&self, front: &mut T) -> bool {
        let mut back = self.back.lock();
        if !back.dirty {
            return false;
        }

        front.clone_from(&back.value);
        back.dirty = false;
        back.swaps += 1;
        true
    }

    /// Copy the back buffer into `front` regardless of the dirty flag.
    pub fn copy_into(&self, front: &mut T) {
        let mut back = self.back.lock();
        front.clone_from(&back.value);
        if back.dirty {
            back.dirty = false;
            back.swaps += 1;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.back.lock().dirty
    }

    pub fn stats(&self) -> BufferStats {
        let back = self.back.lock();
        BufferStats {
            publishes: back.publishes,
            swaps: back.swaps,
        }
    }
}

/// Exclusive access to the producer side of a [`DoubleBuffer`].
pub struct BackBuffer<'a, T> {
    guard: MutexGuard<'a, Back<T>>,
}

impl<T> Deref for BackBuffer<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard.value
    }
}

impl<T> DerefMut for BackBuffer<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard.value
    }
}

impl<T> Drop for BackBuffer<'_, T> {
    fn drop(&mut self) {
        self.guard.dirty = true;
        self.guard.publishes += 1;
    }
}
