//! A one-shot, level-triggered notification.
//!
//! Once [`notify`](Event::notify) has been called, every past, present and
//! future [`wait`](Event::wait) or [`try_wait`](Event::try_wait) observes the
//! set state; there is no way to reset an `Event` back to unset. State
//! machine and algorithms are taken directly from the original `Event`.

use crate::atomic::{AtomicU32, Ordering};
use crate::futex;
use std::fmt::{self, Debug};

const UNSET_NO_WAITERS: u32 = 0;
const UNSET_WITH_WAITERS: u32 = 1;
const SET: u32 = 2;

/// A single-fire notification any number of threads may wait on.
pub struct Event {
    state: AtomicU32,
}

impl Event {
    /// Creates a new, unset event.
    #[inline]
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(UNSET_NO_WAITERS),
        }
    }

    /// Sets the event and wakes every waiter. Idempotent: notifying an
    /// already-set event is a no-op past the first call.
    pub fn notify(&self) {
        let prev = self.state.swap(SET, Ordering::Release);
        if prev == UNSET_WITH_WAITERS {
            log::trace!("event notify waking parked waiters");
            futex::wake(&self.state, i32::MAX);
        }
    }

    /// Blocks until [`notify`](Self::notify) has been called.
    pub fn wait(&self) {
        let mut state2 = match self.state.compare_exchange(
            UNSET_NO_WAITERS,
            UNSET_WITH_WAITERS,
            Ordering::Acquire,
            Ordering::Acquire,
        ) {
            Ok(_) => UNSET_WITH_WAITERS,
            Err(actual) => actual,
        };

        while state2 != SET {
            futex::park(&self.state, UNSET_WITH_WAITERS);
            state2 = self.state.load(Ordering::Acquire);
        }
    }

    /// Non-blocking check of whether the event has been set.
    #[inline]
    pub fn try_wait(&self) -> bool {
        self.state.load(Ordering::Acquire) == SET
    }
}

impl Default for Event {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: all mutable state lives behind the atomic word.
unsafe impl Send for Event {}
// SAFETY: every operation is internally synchronized.
unsafe impl Sync for Event {}

impl Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("set", &self.try_wait())
            .finish()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn try_wait_reflects_notify() {
        let event = Event::new();
        assert!(!event.try_wait());
        event.notify();
        assert!(event.try_wait());
    }

    #[test]
    fn wait_after_notify_returns_immediately() {
        let event = Event::new();
        event.notify();
        event.wait();
    }

    #[test]
    fn waiter_observes_notify_from_another_thread() {
        let event = Arc::new(Event::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let event2 = Arc::clone(&event);
        let log2 = Arc::clone(&log);
        let reader = thread::spawn(move || {
            event2.wait();
            log2.lock().unwrap().push(1);
        });

        thread::sleep(Duration::from_millis(20));
        log.lock().unwrap().push(0);
        event.notify();

        reader.join().unwrap();
        assert_eq!(*log.lock().unwrap(), vec![0, 1]);
    }
}
