//! A pure userspace exclusive lock that never asks the kernel to park.
//!
//! Grounded on the boolean compare-and-swap loop of the original `Spinlock`,
//! with the bounded spin-then-yield backoff inspired by a `SpinWait` helper
//! used elsewhere for lock backoff: a handful of `spin_loop` hints before
//! the first failed attempt, then a scheduler yield on every attempt after
//! that. Unlike every other primitive in this crate,
//! `Spinlock` never calls into [`crate::futex`] — a contended spinlock yields
//! the CPU and retries, it never kernel-parks.

use crate::atomic::{AtomicBool, Ordering};

const YIELD_AFTER: u32 = 8;

/// A spinning mutual-exclusion lock over no payload of its own; callers pair
/// it with their own externally synchronized state, matching the original's
/// bare `lock`/`unlock` surface (the RAII `MutexGuard` treatment in
/// [`crate::mutex`] is deliberately not repeated here — a spinlock is meant
/// for very short critical sections where the guard's extra indirection
/// would be the more expensive part).
#[derive(Debug, Default)]
pub struct Spinlock {
    locked: AtomicBool,
}

impl Spinlock {
    /// Creates a new, unlocked spinlock.
    #[inline]
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Spins until the lock is acquired.
    pub fn lock(&self) {
        let mut spins: u32 = 0;
        while self.locked.swap(true, Ordering::Acquire) {
            if spins >= YIELD_AFTER {
                std::thread::yield_now();
            } else {
                spins += 1;
                std::hint::spin_loop();
            }
        }
    }

    /// Attempts to acquire the lock without spinning. Returns whether it
    /// succeeded.
    #[inline]
    #[must_use]
    pub fn try_lock(&self) -> bool {
        !self.locked.swap(true, Ordering::Acquire)
    }

    /// Releases the lock.
    ///
    /// # Safety-relevant precondition
    /// The caller must currently hold the lock; unlocking an unlocked
    /// spinlock is a logic error (not memory-unsafe, since the state is a
    /// plain bool, but it silently grants a second "holder" the lock).
    #[inline]
    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}
