//! A futex-backed mutual exclusion lock with an owned payload and RAII
//! unlocking.
//!
//! The three-state protocol (`UNLOCKED` / `LOCKED_QUIET` / `LOCKED_CONTENDED`)
//! and the pessimistic-relock rule for [`CondVar`](crate::condvar::CondVar)
//! interop come from the original `Mutex`; the public `Mutex<T>` /
//! `MutexGuard<'_, T>` split that owns its data through an `UnsafeCell`
//! rather than handing callers a bare lock, with the guard's `Drop` doing
//! the unlocking, follows the shape of every guarded Rust mutex in this
//! ecosystem.

use crate::atomic::{AtomicU32, Ordering};
use crate::futex;
use std::cell::UnsafeCell;
use std::fmt::{self, Debug};
use std::ops::{Deref, DerefMut};

const UNLOCKED: u32 = 0;
const LOCKED_QUIET: u32 = 1;
const LOCKED_CONTENDED: u32 = 2;

/// The raw, payload-less lock protocol. Kept crate-private: [`Mutex<T>`]
/// layers a guarded, payload-owning API over it, and [`crate::condvar`]
/// reaches into it directly for the pessimistic relock that requeue-based
/// wakeups require.
pub(crate) struct RawMutex {
    state: AtomicU32,
}

impl RawMutex {
    #[inline]
    pub(crate) const fn new() -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
        }
    }

    #[inline]
    pub(crate) fn try_lock(&self) -> bool {
        self.state
            .compare_exchange(UNLOCKED, LOCKED_QUIET, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    pub(crate) fn lock(&self) {
        if self.try_lock() {
            return;
        }
        self.lock_slow();
    }

    /// Skips the fast path and the `LOCKED_QUIET` optimistic state entirely;
    /// used only by `CondVar::wait`'s post-requeue relock, where a thread
    /// woken by a requeue must publish `LOCKED_CONTENDED` itself to keep the
    /// wake-propagation chain alive for any sleepers requeued alongside it.
    #[inline]
    pub(crate) fn lock_pessimistic(&self) {
        self.lock_slow();
    }

    fn lock_slow(&self) {
        loop {
            let prev = self.state.swap(LOCKED_CONTENDED, Ordering::Acquire);
            if prev == UNLOCKED {
                return;
            }
            log::trace!("mutex contended, parking");
            futex::park(&self.state, LOCKED_CONTENDED);
        }
    }

    /// # Safety-relevant precondition
    /// The caller must currently hold the lock.
    #[inline]
    pub(crate) unsafe fn unlock(&self) {
        let prev = self.state.swap(UNLOCKED, Ordering::Release);
        if prev == UNLOCKED {
            unreachable!("unlocking an already-unlocked Mutex");
        }
        if prev == LOCKED_CONTENDED {
            futex::wake(&self.state, 1);
        }
    }

    #[inline]
    pub(crate) fn word(&self) -> &AtomicU32 {
        &self.state
    }

    #[inline]
    pub(crate) fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) != UNLOCKED
    }
}

/// A mutual exclusion primitive protecting a `T`.
///
/// Blocks the calling thread (via [`crate::futex`]) rather than spinning.
/// Access to the protected data is only possible through the RAII guard
/// returned by [`lock`](Self::lock) / [`try_lock`](Self::try_lock); the
/// guard's `Drop` releases the lock.
pub struct Mutex<T: ?Sized> {
    raw: RawMutex,
    data: UnsafeCell<T>,
}

impl<T> Mutex<T> {
    /// Creates a new mutex in an unlocked state.
    #[inline]
    pub const fn new(val: T) -> Self {
        Self {
            raw: RawMutex::new(),
            data: UnsafeCell::new(val),
        }
    }

    /// Consumes the mutex, returning the underlying data.
    #[inline]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Blocks until the lock is acquired, then returns a guard.
    ///
    /// Locking a mutex already held by the calling thread is left
    /// unspecified by the underlying protocol: it will not return (it may
    /// deadlock).
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.raw.lock();
        MutexGuard { mutex: self }
    }

    /// Attempts to acquire the lock without blocking.
    #[inline]
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if self.raw.try_lock() {
            Some(MutexGuard { mutex: self })
        } else {
            None
        }
    }

    /// Returns a mutable reference to the underlying data without locking,
    /// since a unique borrow of the `Mutex` already proves exclusivity.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

// SAFETY: `RawMutex` serializes all access to `data`; sending a `Mutex<T>`
// across threads only requires `T: Send`, as with any other mutex.
unsafe impl<T: Send + ?Sized> Send for Mutex<T> {}
// SAFETY: shared access to `Mutex<T>` only permits acquiring the lock, which
// requires `T: Send` to hand the data to another thread through the guard.
unsafe impl<T: Send + ?Sized> Sync for Mutex<T> {}

impl<T: Debug + ?Sized> Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Mutex");
        match self.try_lock() {
            Some(guard) => d.field("data", &&*guard),
            None => d.field("data", &format_args!("<locked>")),
        };
        d.finish()
    }
}

impl<T: Default> Default for Mutex<T> {
    #[inline]
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> From<T> for Mutex<T> {
    #[inline]
    fn from(val: T) -> Self {
        Self::new(val)
    }
}

/// An RAII guard releasing its [`Mutex`]'s lock when dropped.
///
/// Produced by [`Mutex::lock`] / [`Mutex::try_lock`]; dereferences to `T`.
#[must_use = "if unused the Mutex immediately unlocks"]
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
}

impl<'a, T: ?Sized> MutexGuard<'a, T> {
    /// Gives [`crate::condvar::CondVar`] access to the raw lock underneath
    /// this guard, so it can unlock and pessimistically relock it around a
    /// park without fabricating a second guard.
    pub(crate) fn raw(&self) -> &'a RawMutex {
        &self.mutex.raw
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: holding the guard proves the lock is held by this thread.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the guard proves the lock is held by this thread.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: Debug + ?Sized> Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&**self, f)
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: the guard's existence proves this thread holds the lock.
        unsafe { self.mutex.raw.unlock() }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn try_lock_contends_with_held_lock() {
        let m = Mutex::new(0);
        let guard = m.lock();
        assert!(m.try_lock().is_none());
        drop(guard);
        assert!(m.try_lock().is_some());
    }

    #[test]
    fn guard_derefs_to_data() {
        let m = Mutex::new(5);
        {
            let mut g = m.lock();
            *g += 1;
        }
        assert_eq!(*m.lock(), 6);
    }

    #[test]
    fn contended_counter_is_exact() {
        let m = Arc::new(Mutex::new(0u64));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let m = Arc::clone(&m);
                thread::spawn(move || {
                    for _ in 0..2000 {
                        *m.lock() += 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*m.lock(), 32_000);
    }
}
