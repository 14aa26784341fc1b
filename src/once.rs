//! A one-time action, run exactly once no matter how many threads call
//! [`perform`](Once::perform) concurrently.
//!
//! The four-state machine is taken directly from the original `Once`. Unlike
//! the original, a panicking action does not leave the `Once` permanently
//! poisoned or re-armed: the unwind is caught, the word is still committed
//! to `DONE`, stragglers are woken exactly as on success, and the unwind is
//! then resumed in the initiating thread only — a concurrent `perform` never
//! observes the panic and never re-runs anyone's action.

use crate::atomic::{AtomicU32, Ordering};
use crate::futex;
use std::fmt::{self, Debug};
use std::panic::{self, UnwindSafe};

const INITIAL: u32 = 0;
const DONE: u32 = 1;
const PERFORMING_NO_WAITERS: u32 = 2;
const PERFORMING_WITH_WAITERS: u32 = 3;

/// A synchronization primitive for one-time initialization.
pub struct Once {
    state: AtomicU32,
}

impl Once {
    /// Creates a new, not-yet-performed `Once`.
    #[inline]
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(INITIAL),
        }
    }

    /// Returns whether the action has already completed.
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.state.load(Ordering::Acquire) == DONE
    }

    /// Runs `action` exactly once across every call to `perform` on this
    /// `Once`, blocking concurrent callers until it completes. If `action`
    /// panics, the `Once` is still committed to `DONE` and the panic is
    /// resumed in the calling thread; it is not retried by a later caller.
    pub fn perform<F>(&self, action: F)
    where
        F: FnOnce() + UnwindSafe,
    {
        let mut state2 = INITIAL;
        let exchanged = self
            .state
            .compare_exchange(
                state2,
                PERFORMING_NO_WAITERS,
                Ordering::Acquire,
                Ordering::Acquire,
            )
            .is_ok();

        if exchanged {
            let result = panic::catch_unwind(action);

            let prev = self.state.swap(DONE, Ordering::Release);
            if prev == PERFORMING_WITH_WAITERS {
                log::trace!("once completed, waking stragglers");
                futex::wake(&self.state, i32::MAX);
            }

            if let Err(payload) = result {
                panic::resume_unwind(payload);
            }
            return;
        }

        loop {
            match state2 {
                DONE => return,
                PERFORMING_NO_WAITERS => {
                    match self.state.compare_exchange_weak(
                        state2,
                        PERFORMING_WITH_WAITERS,
                        Ordering::Acquire,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => state2 = PERFORMING_WITH_WAITERS,
                        Err(actual) => {
                            state2 = actual;
                            continue;
                        }
                    }
                    futex::park(&self.state, PERFORMING_WITH_WAITERS);
                    state2 = self.state.load(Ordering::Acquire);
                }
                PERFORMING_WITH_WAITERS => {
                    futex::park(&self.state, PERFORMING_WITH_WAITERS);
                    state2 = self.state.load(Ordering::Acquire);
                }
                _ => unreachable!("Once state word out of range"),
            }
        }
    }
}

impl Default for Once {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: all mutable state lives behind the atomic word.
unsafe impl Send for Once {}
// SAFETY: every operation is internally synchronized.
unsafe impl Sync for Once {}

impl Debug for Once {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Once")
            .field("completed", &self.is_completed())
            .finish()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32 as StdAtomicU32;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn runs_exactly_once_under_contention() {
        let once = Arc::new(Once::new());
        let runs = Arc::new(StdAtomicU32::new(0));
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let once = Arc::clone(&once);
                let runs = Arc::clone(&runs);
                thread::spawn(move || {
                    once.perform(|| {
                        runs.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    });
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(runs.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(once.is_completed());
    }

    #[test]
    fn second_action_never_runs_after_first_completes() {
        let once = Once::new();
        once.perform(|| {});
        once.perform(|| panic!("must never run"));
    }

    #[test]
    fn panic_in_action_is_propagated_and_completes_the_once() {
        let once = Once::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            once.perform(|| panic!("boom"));
        }));
        assert!(result.is_err());
        assert!(once.is_completed());
    }
}
