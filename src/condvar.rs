//! A futex-backed condition variable associated with whichever
//! [`Mutex`](crate::mutex::Mutex) it is first waited on with.
//!
//! The bit-packed state word (two pending-notification bits plus a
//! generation counter) and the notify algorithms are taken directly from the
//! original `CondVar`; letting the binding to a concrete `RawMutex` resolve
//! dynamically on first `wait`, with a panic on a second distinct mutex,
//! mirrors a pattern used elsewhere for runtime-checked single-mutex
//! binding via an `AtomicPtr<RawMutex>`, in place of the original's
//! constructor-supplied `Mutex&` reference.

use crate::atomic::{AtomicPtr, AtomicU32, Ordering};
use crate::futex;
use crate::mutex::{MutexGuard, RawMutex};
use std::fmt::{self, Debug};
use std::ptr;

const NEED_TO_WAKE_ONE: u32 = 0b01;
const NEED_TO_WAKE_ALL: u32 = 0b10;
const INCREMENT: u32 = 0b100;

/// A condition variable usable with exactly one [`Mutex`](crate::mutex::Mutex)
/// for its lifetime (the first one it is waited on with).
pub struct CondVar {
    state: AtomicU32,
    bound: AtomicPtr<RawMutex>,
}

impl CondVar {
    /// Creates a new condition variable, bound to no mutex yet.
    #[inline]
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(0),
            bound: AtomicPtr::new(ptr::null_mut()),
        }
    }

    fn bind<'a, T>(&self, guard: &MutexGuard<'a, T>) -> &'a RawMutex {
        let raw = guard.raw();
        let this = raw as *const RawMutex as *mut RawMutex;
        match self.bound.compare_exchange(
            ptr::null_mut(),
            this,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => {}
            Err(prev) => assert_eq!(
                prev, this,
                "a CondVar may only ever be waited on with a single Mutex"
            ),
        }
        raw
    }

    /// Atomically unlocks `guard`'s mutex and blocks until notified, then
    /// reacquires the mutex before returning. Spurious wakeups are possible;
    /// prefer [`wait_while`](Self::wait_while) when a predicate must hold.
    pub fn wait<T>(&self, guard: &mut MutexGuard<'_, T>) {
        let raw = self.bind(guard);
        let snapshot = self.state.fetch_or(NEED_TO_WAKE_ONE | NEED_TO_WAKE_ALL, Ordering::Relaxed)
            | NEED_TO_WAKE_ONE
            | NEED_TO_WAKE_ALL;
        // SAFETY: `guard` proves this thread holds `raw`; we park immediately
        // after releasing it and relock unconditionally below, preserving
        // the guard's "lock held while alive" contract by the time `wait`
        // returns.
        unsafe { raw.unlock() };
        futex::park(&self.state, snapshot);
        // Requeue-based notify_all never lets this thread run the ordinary
        // acquisition protocol, so it must publish LOCKED_CONTENDED itself.
        raw.lock_pessimistic();
    }

    /// Loops `wait` while `predicate` returns `true`.
    pub fn wait_while<T>(
        &self,
        guard: &mut MutexGuard<'_, T>,
        mut predicate: impl FnMut(&mut T) -> bool,
    ) {
        while predicate(&mut *guard) {
            self.wait(guard);
        }
    }

    /// Wakes one waiter, if any. Returns whether one was actually woken.
    pub fn notify_one(&self) -> bool {
        let state2 = self.state.fetch_add(INCREMENT, Ordering::Relaxed) + INCREMENT;
        if state2 & NEED_TO_WAKE_ONE == 0 {
            return false;
        }
        let _ = self.state.compare_exchange(
            state2,
            state2 & !NEED_TO_WAKE_ONE,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
        let woken = futex::wake(&self.state, 1);
        if woken > 0 {
            log::trace!("condvar notify_one woke a waiter");
            self.state.fetch_or(NEED_TO_WAKE_ONE, Ordering::Relaxed);
        }
        woken > 0
    }

    /// Wakes every waiter, if any, by requeueing them onto the bound mutex's
    /// wait queue. Returns whether any waiter existed to be requeued.
    pub fn notify_all(&self) -> bool {
        let state2 = self.state.fetch_add(INCREMENT, Ordering::Relaxed) + INCREMENT;
        if state2 & NEED_TO_WAKE_ALL == 0 {
            return false;
        }
        self.state
            .fetch_and(!(NEED_TO_WAKE_ALL | NEED_TO_WAKE_ONE), Ordering::Relaxed);
        let bound = self.bound.load(Ordering::Relaxed);
        debug_assert!(
            !bound.is_null(),
            "NEED_TO_WAKE_ALL set without ever binding a Mutex"
        );
        // SAFETY: `bound` was published by `bind` from a `&RawMutex` with at
        // least this `CondVar`'s lifetime, and primitives are never moved
        // after first use, so the pointee is still live.
        let mutex_word = unsafe { &*bound }.word();
        log::trace!("condvar notify_all requeueing waiters onto bound mutex");
        futex::requeue(&self.state, 1, mutex_word, i32::MAX);
        true
    }
}

impl Default for CondVar {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: all mutable state lives behind atomics.
unsafe impl Send for CondVar {}
// SAFETY: all operations are internally synchronized through the state word.
unsafe impl Sync for CondVar {}

impl Debug for CondVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CondVar").finish_non_exhaustive()
    }
}
