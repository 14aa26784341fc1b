//! A counting semaphore bounding concurrent access to `initial_value`
//! permits.
//!
//! State encoding and the wake-responsibility handoff between `down` and
//! `up` are taken directly from the original `Semaphore`; `available_permits`
//! is a library addition for non-blocking introspection (see the crate-level
//! docs).

use crate::atomic::{AtomicU32, Ordering};
use crate::futex;
use std::fmt::{self, Debug};

const WAITERS_PRESENT: u32 = 1 << 31;
const COUNT_MASK: u32 = !WAITERS_PRESENT;

/// The maximum number of permits a `Semaphore` can represent.
pub const MAX_PERMITS: u32 = COUNT_MASK;

/// A counting semaphore.
pub struct Semaphore {
    state: AtomicU32,
}

impl Semaphore {
    /// Creates a semaphore with `initial_value` permits immediately
    /// available.
    ///
    /// # Panics
    /// Panics if `initial_value` exceeds [`MAX_PERMITS`].
    #[inline]
    pub fn new(initial_value: u32) -> Self {
        assert!(
            initial_value <= MAX_PERMITS,
            "Semaphore initial_value exceeds the 31-bit permit count"
        );
        Self {
            state: AtomicU32::new(initial_value),
        }
    }

    /// Acquires one permit, blocking until one is available.
    pub fn down(&self) {
        let mut state2 = self.state.load(Ordering::Relaxed);
        let mut responsible_for_waking = false;

        loop {
            let count = state2 & COUNT_MASK;
            if count > 0 {
                let mut perhaps_wake_bit = state2 & WAITERS_PRESENT;
                let mut going_to_wake = false;
                if responsible_for_waking && perhaps_wake_bit == 0 {
                    if count > 1 {
                        going_to_wake = true;
                    }
                    perhaps_wake_bit = WAITERS_PRESENT;
                }
                let desired = (count - 1) | perhaps_wake_bit;
                match self.state.compare_exchange_weak(
                    state2,
                    desired,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        if going_to_wake {
                            log::trace!("semaphore down propagating wake obligation");
                            futex::wake(&self.state, (count - 1) as i32);
                        }
                        return;
                    }
                    Err(actual) => {
                        state2 = actual;
                        continue;
                    }
                }
            }

            if state2 == 0 {
                match self.state.compare_exchange_weak(
                    state2,
                    WAITERS_PRESENT,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => state2 = WAITERS_PRESENT,
                    Err(actual) => {
                        state2 = actual;
                        continue;
                    }
                }
            }

            responsible_for_waking = true;
            futex::park(&self.state, state2);
            state2 = 1;
        }
    }

    /// Attempts to acquire one permit without blocking.
    #[inline]
    pub fn try_down(&self) -> bool {
        let mut state2 = self.state.load(Ordering::Relaxed);
        loop {
            let count = state2 & COUNT_MASK;
            if count == 0 {
                return false;
            }
            let desired = (count - 1) | (state2 & WAITERS_PRESENT);
            match self.state.compare_exchange(
                state2,
                desired,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => state2 = actual,
            }
        }
    }

    /// Releases one permit.
    ///
    /// In debug builds, this asserts that the permit count does not overflow
    /// the 31-bit count; in release builds an overflow silently wraps into
    /// the waiters-present bit, which is a caller error this crate chooses
    /// not to guard against at runtime cost on the hot path.
    pub fn up(&self) {
        let prev = self.state.load(Ordering::Relaxed);
        debug_assert!(
            prev & COUNT_MASK != COUNT_MASK,
            "Semaphore::up overflowed the 31-bit permit count"
        );
        let state2 = self.state.fetch_add(1, Ordering::Release);
        if state2 & WAITERS_PRESENT == 0 {
            return;
        }
        let state3 = self.state.fetch_and(!WAITERS_PRESENT, Ordering::Relaxed);
        if state3 & WAITERS_PRESENT == 0 {
            return;
        }
        log::trace!("semaphore up waking a waiter");
        futex::wake(&self.state, 1);
    }

    /// A relaxed snapshot of the number of permits currently available, for
    /// non-blocking introspection only; no ordering is promised against
    /// concurrent `up`/`down`.
    #[inline]
    pub fn available_permits(&self) -> u32 {
        self.state.load(Ordering::Relaxed) & COUNT_MASK
    }
}

impl Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("available_permits", &self.available_permits())
            .finish()
    }
}

// SAFETY: all mutable state lives behind the atomic word.
unsafe impl Send for Semaphore {}
// SAFETY: every operation is internally synchronized.
unsafe impl Sync for Semaphore {}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering as StdOrdering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn try_down_drains_to_exhaustion() {
        let sem = Semaphore::new(3);
        assert!(sem.try_down());
        assert!(sem.try_down());
        assert!(sem.try_down());
        assert!(!sem.try_down());
        assert_eq!(sem.available_permits(), 0);
        sem.up();
        assert!(sem.try_down());
    }

    #[test]
    fn bounded_under_contention() {
        let sem = Arc::new(Semaphore::new(5));
        let gauge = Arc::new(AtomicI64::new(0));
        let peak = Arc::new(AtomicI64::new(0));

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let sem = Arc::clone(&sem);
                let gauge = Arc::clone(&gauge);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    for _ in 0..50 {
                        sem.down();
                        let v = gauge.fetch_add(1, StdOrdering::SeqCst) + 1;
                        peak.fetch_max(v, StdOrdering::SeqCst);
                        assert!(v <= 5);
                        std::thread::yield_now();
                        gauge.fetch_sub(1, StdOrdering::SeqCst);
                        sem.up();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(gauge.load(StdOrdering::SeqCst), 0);
        assert!(peak.load(StdOrdering::SeqCst) > 2);
        for _ in 0..5 {
            assert!(sem.try_down());
        }
        assert!(!sem.try_down());
    }
}
