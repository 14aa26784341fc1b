//! A reusable-by-agreement rendezvous point for a fixed number of parties.
//!
//! State encoding and algorithms are taken directly from the original
//! `Barrier`. After an episode completes the state word is `0`; this crate
//! does not automatically re-arm a `Barrier` for a second episode, matching
//! the original.

use crate::atomic::{AtomicU32, Ordering};
use crate::futex;
use std::fmt::{self, Debug};

const WAITERS_PRESENT: u32 = 1 << 31;
const COUNT_MASK: u32 = !WAITERS_PRESENT;

/// A barrier for a fixed number of parties, `N`.
pub struct Barrier {
    state: AtomicU32,
}

impl Barrier {
    /// Creates a barrier for `required` parties.
    ///
    /// # Panics
    /// Panics if `required == 0`, since a zero-party barrier can never be
    /// checked in to nor waited on meaningfully.
    #[inline]
    pub fn new(required: u32) -> Self {
        assert!(required > 0, "Barrier requires at least one party");
        assert!(
            required <= COUNT_MASK,
            "Barrier party count exceeds the 31-bit count"
        );
        Self {
            state: AtomicU32::new(required),
        }
    }

    /// Decrements the number of parties yet to check in, without blocking.
    /// If this call brings the count to zero and there were waiters parked
    /// in [`wait`](Self::wait), wakes them all.
    pub fn check_in(&self) {
        let state2 = self.state.fetch_sub(1, Ordering::Release) - 1;
        if state2 == WAITERS_PRESENT {
            self.state.store(0, Ordering::Relaxed);
            log::trace!("barrier episode complete, waking waiters");
            futex::wake(&self.state, i32::MAX);
        }
    }

    /// Blocks until every party has [`check_in`](Self::check_in)ed (or
    /// performed [`check_in_and_wait`](Self::check_in_and_wait)) for the
    /// current episode.
    pub fn wait(&self) {
        let mut state2 = self.state.load(Ordering::Acquire);
        while state2 & COUNT_MASK != 0 {
            if state2 & WAITERS_PRESENT == 0 {
                match self.state.compare_exchange_weak(
                    state2,
                    state2 | WAITERS_PRESENT,
                    Ordering::Acquire,
                    Ordering::Acquire,
                ) {
                    Ok(_) => state2 |= WAITERS_PRESENT,
                    Err(actual) => {
                        state2 = actual;
                        continue;
                    }
                }
            }
            futex::park(&self.state, state2);
            state2 = self.state.load(Ordering::Acquire);
        }
    }

    /// Non-blocking check of whether the current episode has completed.
    #[inline]
    pub fn try_wait(&self) -> bool {
        self.state.load(Ordering::Acquire) & COUNT_MASK == 0
    }

    /// Checks in and blocks until every other party has too. Equivalent to
    /// [`check_in`](Self::check_in) followed by [`wait`](Self::wait), but
    /// avoids a lost-wakeup race between the two.
    pub fn check_in_and_wait(&self) {
        let mut state2 = self.state.fetch_sub(1, Ordering::AcqRel) - 1;
        if state2 & COUNT_MASK == 0 {
            if state2 == WAITERS_PRESENT {
                self.state.store(0, Ordering::Relaxed);
                log::trace!("barrier episode complete, waking waiters");
                futex::wake(&self.state, i32::MAX);
            }
            return;
        }

        loop {
            if state2 & WAITERS_PRESENT == 0 {
                match self.state.compare_exchange_weak(
                    state2,
                    state2 | WAITERS_PRESENT,
                    Ordering::Acquire,
                    Ordering::Acquire,
                ) {
                    Ok(_) => state2 |= WAITERS_PRESENT,
                    Err(actual) => {
                        state2 = actual;
                        continue;
                    }
                }
            }
            futex::park(&self.state, state2);
            state2 = self.state.load(Ordering::Acquire);
            if state2 & COUNT_MASK == 0 {
                return;
            }
        }
    }

    /// Checks in and returns whether that brought the episode to
    /// completion, without blocking.
    pub fn check_in_and_try_wait(&self) -> bool {
        let state2 = self.state.fetch_sub(1, Ordering::AcqRel) - 1;
        if state2 & COUNT_MASK != 0 {
            return false;
        }
        if state2 == WAITERS_PRESENT {
            self.state.store(0, Ordering::Relaxed);
            log::trace!("barrier episode complete, waking waiters");
            futex::wake(&self.state, i32::MAX);
        }
        true
    }
}

impl Debug for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Barrier")
            .field("remaining", &(self.state.load(Ordering::Relaxed) & COUNT_MASK))
            .finish()
    }
}

// SAFETY: all mutable state lives behind the atomic word.
unsafe impl Send for Barrier {}
// SAFETY: every operation is internally synchronized.
unsafe impl Sync for Barrier {}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    #[should_panic(expected = "at least one party")]
    fn zero_parties_panics() {
        Barrier::new(0);
    }

    #[test]
    fn single_party_check_in_and_wait_returns_immediately() {
        let barrier = Barrier::new(1);
        barrier.check_in_and_wait();
        assert!(barrier.try_wait());
    }

    #[test]
    fn all_parties_observe_each_others_writes() {
        const N: usize = 64;
        let barrier = Arc::new(Barrier::new(N as u32));
        let slots: Arc<Vec<std::sync::atomic::AtomicU8>> =
            Arc::new((0..N).map(|_| std::sync::atomic::AtomicU8::new(0)).collect());

        let handles: Vec<_> = (0..N)
            .map(|i| {
                let barrier = Arc::clone(&barrier);
                let slots = Arc::clone(&slots);
                thread::spawn(move || {
                    slots[i].store(1, std::sync::atomic::Ordering::Relaxed);
                    barrier.check_in_and_wait();
                    slots.iter().all(|s| s.load(std::sync::atomic::Ordering::Relaxed) == 1)
                })
            })
            .collect();

        for h in handles {
            assert!(h.join().unwrap());
        }
    }
}
