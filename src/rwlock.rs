//! A writer-preferring reader-writer lock with an owned payload.
//!
//! The state encoding (reader count in the low 30 bits, `write_held` in bit
//! 30, `waiters_present` in bit 31) and every algorithm are taken directly
//! from the original `RWLock`, including its use of bitset-partitioned futex
//! wait queues so readers and writers parked on the same word only wake
//! their own cohort. The public `RwLock<T>` / `RwLockReadGuard` /
//! `RwLockWriteGuard` split, and upgrade/downgrade consuming one guard to
//! produce the other so the type system enforces lock-holder-only use, match
//! the RAII-guarded reader-writer locks found throughout this ecosystem.

use crate::atomic::{AtomicU32, Ordering};
use crate::futex;
use std::cell::UnsafeCell;
use std::fmt::{self, Debug};
use std::ops::{Deref, DerefMut};

const WAITERS_PRESENT: u32 = 1 << 31;
const WRITE_HELD: u32 = 1 << 30;
const READER_COUNT_MASK: u32 = !(WAITERS_PRESENT | WRITE_HELD);

const READER_MASK: u32 = 1;
const WRITER_MASK: u32 = 2;

struct RawRwLock {
    state: AtomicU32,
}

impl RawRwLock {
    #[inline]
    const fn new() -> Self {
        Self {
            state: AtomicU32::new(0),
        }
    }

    fn lock_read(&self) {
        let mut state2 = self.state.load(Ordering::Relaxed);
        loop {
            if state2 & (WRITE_HELD | WAITERS_PRESENT) == 0 {
                let desired = state2 + 1;
                match self.state.compare_exchange(
                    state2,
                    desired,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return,
                    Err(actual) => {
                        state2 = actual;
                        continue;
                    }
                }
            }
            if state2 & WAITERS_PRESENT == 0 {
                debug_assert_eq!(state2, WRITE_HELD);
                let desired = WRITE_HELD | WAITERS_PRESENT;
                match self.state.compare_exchange_weak(
                    state2,
                    desired,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => state2 = desired,
                    Err(actual) => {
                        state2 = actual;
                        continue;
                    }
                }
            }
            futex::park_bitset(&self.state, state2, READER_MASK);
            state2 = 0;
        }
    }

    fn try_lock_read(&self) -> bool {
        let state2 = self.state.load(Ordering::Relaxed);
        if state2 & (WRITE_HELD | WAITERS_PRESENT) != 0 {
            return false;
        }
        let desired = state2 + 1;
        self.state
            .compare_exchange(state2, desired, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn lock_write(&self) {
        let mut state2 = match self.state.compare_exchange(
            0,
            WRITE_HELD,
            Ordering::Acquire,
            Ordering::Relaxed,
        ) {
            Ok(_) => return,
            Err(actual) => actual,
        };

        loop {
            if state2 & !WAITERS_PRESENT == 0 {
                debug_assert_eq!(state2 & READER_COUNT_MASK, 0);
                let desired = WRITE_HELD | WAITERS_PRESENT;
                match self.state.compare_exchange(
                    state2,
                    desired,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return,
                    Err(actual) => {
                        state2 = actual;
                        continue;
                    }
                }
            }
            if state2 & WAITERS_PRESENT == 0 {
                let desired = state2 | WAITERS_PRESENT;
                match self.state.compare_exchange(
                    state2,
                    desired,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => state2 = desired,
                    Err(actual) => {
                        state2 = actual;
                        continue;
                    }
                }
            }
            futex::park_bitset(&self.state, state2, WRITER_MASK);
            state2 = 0;
        }
    }

    fn try_lock_write(&self) -> bool {
        self.state
            .compare_exchange(0, WRITE_HELD, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Caller must already hold a read lock and be the sole reader.
    fn try_upgrade(&self) -> bool {
        let mut state2 = match self.state.compare_exchange(
            1,
            WRITE_HELD,
            Ordering::Acquire,
            Ordering::Relaxed,
        ) {
            Ok(_) => return true,
            Err(actual) => actual,
        };
        debug_assert!(state2 & WRITE_HELD == 0, "caller did not hold a read lock");
        if state2 == (1 | WAITERS_PRESENT) {
            state2 = self
                .state
                .swap(WRITE_HELD | WAITERS_PRESENT, Ordering::Acquire);
            debug_assert_eq!(state2, 1 | WAITERS_PRESENT);
            return true;
        }
        false
    }

    /// Caller must hold the write lock.
    fn downgrade(&self) {
        let state2 = self.state.swap(1, Ordering::Release);
        debug_assert!(state2 & WRITE_HELD != 0, "caller did not hold a write lock");
        if state2 & WAITERS_PRESENT != 0 {
            log::trace!("rwlock downgrade waking parked readers");
            futex::wake_bitset(&self.state, i32::MAX, READER_MASK);
        }
    }

    /// # Safety-relevant precondition
    /// The caller must currently hold a read lock.
    unsafe fn unlock_read(&self) {
        let state2 = self.state.fetch_sub(1, Ordering::Release);
        debug_assert!(state2 & WRITE_HELD == 0, "unlock_read on a write-held lock");
        let count = state2 & !WAITERS_PRESENT;
        debug_assert_ne!(count, 0, "unlock_read with no read lock held");
        if count == 1 && state2 & WAITERS_PRESENT != 0 {
            let expected = WAITERS_PRESENT;
            let _ = self
                .state
                .compare_exchange_weak(expected, 0, Ordering::Relaxed, Ordering::Relaxed);
            log::trace!("rwlock unlock_read waking one writer");
            futex::wake_bitset(&self.state, 1, WRITER_MASK);
        }
    }

    /// # Safety-relevant precondition
    /// The caller must currently hold the write lock.
    unsafe fn unlock_write(&self) {
        let state2 = self.state.swap(0, Ordering::Release);
        debug_assert!(state2 & WRITE_HELD != 0, "unlock_write without a write lock");
        debug_assert_eq!(state2 & READER_COUNT_MASK, 0);
        if state2 & WAITERS_PRESENT != 0 {
            log::trace!("rwlock unlock_write waking readers and a writer");
            futex::wake_bitset(&self.state, i32::MAX, READER_MASK);
            futex::wake_bitset(&self.state, 1, WRITER_MASK);
        }
    }
}

/// A reader-writer lock protecting a `T`.
pub struct RwLock<T: ?Sized> {
    raw: RawRwLock,
    data: UnsafeCell<T>,
}

impl<T> RwLock<T> {
    /// Creates a new, unlocked `RwLock`.
    #[inline]
    pub const fn new(val: T) -> Self {
        Self {
            raw: RawRwLock::new(),
            data: UnsafeCell::new(val),
        }
    }

    /// Consumes the lock, returning the underlying data.
    #[inline]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> RwLock<T> {
    /// Blocks until a shared read lock is acquired. New readers are refused
    /// while a writer is waiting, so a stream of readers cannot starve it.
    #[inline]
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.raw.lock_read();
        RwLockReadGuard { lock: self }
    }

    /// Attempts to acquire a shared read lock without blocking.
    #[inline]
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, T>> {
        if self.raw.try_lock_read() {
            Some(RwLockReadGuard { lock: self })
        } else {
            None
        }
    }

    /// Blocks until the exclusive write lock is acquired.
    #[inline]
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.raw.lock_write();
        RwLockWriteGuard { lock: self }
    }

    /// Attempts to acquire the exclusive write lock without blocking.
    #[inline]
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, T>> {
        if self.raw.try_lock_write() {
            Some(RwLockWriteGuard { lock: self })
        } else {
            None
        }
    }

    /// Returns a mutable reference to the underlying data without locking.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

// SAFETY: `RawRwLock` serializes all access to `data`.
unsafe impl<T: Send + ?Sized> Send for RwLock<T> {}
// SAFETY: shared access only permits acquiring a read or write lock, both of
// which require `T: Send + Sync` to hand data across threads safely.
unsafe impl<T: Send + Sync + ?Sized> Sync for RwLock<T> {}

impl<T: Debug + ?Sized> Debug for RwLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("RwLock");
        match self.try_read() {
            Some(guard) => d.field("data", &&*guard),
            None => d.field("data", &format_args!("<locked>")),
        };
        d.finish()
    }
}

impl<T: Default> Default for RwLock<T> {
    #[inline]
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// An RAII guard for shared read access, releasing the read lock on drop.
#[must_use = "if unused the RwLock immediately unlocks"]
pub struct RwLockReadGuard<'a, T: ?Sized> {
    lock: &'a RwLock<T>,
}

impl<'a, T: ?Sized> RwLockReadGuard<'a, T> {
    /// Attempts to upgrade to a write guard, consuming this guard.
    ///
    /// Only succeeds if this is the sole live read guard on the lock; with
    /// more than one concurrent reader the upgrade always fails (it never
    /// blocks) and the original guard is returned.
    pub fn try_upgrade(self) -> Result<RwLockWriteGuard<'a, T>, Self> {
        if self.lock.raw.try_upgrade() {
            // SAFETY: `try_upgrade` above already transitioned the raw lock
            // from a read to a write hold; this guard's `Drop` must not run.
            let this = std::mem::ManuallyDrop::new(self);
            Ok(RwLockWriteGuard { lock: this.lock })
        } else {
            Err(self)
        }
    }
}

impl<T: ?Sized> Deref for RwLockReadGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: holding the guard proves a read lock is held.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: Debug + ?Sized> Debug for RwLockReadGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&**self, f)
    }
}

impl<T: ?Sized> Drop for RwLockReadGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: the guard's existence proves this thread holds a read lock.
        unsafe { self.lock.raw.unlock_read() }
    }
}

/// An RAII guard for exclusive write access, releasing the write lock on
/// drop.
#[must_use = "if unused the RwLock immediately unlocks"]
pub struct RwLockWriteGuard<'a, T: ?Sized> {
    lock: &'a RwLock<T>,
}

impl<'a, T: ?Sized> RwLockWriteGuard<'a, T> {
    /// Downgrades to a read guard, consuming this guard. Never fails and
    /// never blocks.
    pub fn downgrade(self) -> RwLockReadGuard<'a, T> {
        // SAFETY: this guard's `Drop` (a write unlock) must not run; the raw
        // downgrade below transitions the lock to a read hold in its place.
        let this = std::mem::ManuallyDrop::new(self);
        this.lock.raw.downgrade();
        RwLockReadGuard { lock: this.lock }
    }
}

impl<T: ?Sized> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: holding the guard proves the write lock is held.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for RwLockWriteGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the guard proves the write lock is held.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: Debug + ?Sized> Debug for RwLockWriteGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&**self, f)
    }
}

impl<T: ?Sized> Drop for RwLockWriteGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: the guard's existence proves this thread holds the write
        // lock.
        unsafe { self.lock.raw.unlock_write() }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn readers_share_writers_exclude() {
        let lock = RwLock::new(0);
        let r1 = lock.read();
        let r2 = lock.read();
        assert!(lock.try_write().is_none());
        drop(r1);
        drop(r2);
        assert!(lock.try_write().is_some());
    }

    #[test]
    fn upgrade_succeeds_with_sole_reader() {
        let lock = RwLock::new(1);
        let r = lock.read();
        let mut w = r.try_upgrade().unwrap_or_else(|_| panic!("upgrade failed"));
        *w = 2;
        drop(w);
        assert_eq!(*lock.read(), 2);
    }

    #[test]
    fn upgrade_fails_with_concurrent_reader() {
        let lock = RwLock::new(1);
        let r1 = lock.read();
        let r2 = lock.read();
        let r1 = r1.try_upgrade().unwrap_err();
        drop(r1);
        drop(r2);
    }

    #[test]
    fn downgrade_lets_readers_proceed() {
        let lock = RwLock::new(1);
        let w = lock.write();
        let r = w.downgrade();
        assert_eq!(*r, 1);
        assert!(lock.try_read().is_some());
    }

    #[test]
    fn writer_is_not_starved_by_readers() {
        let lock = Arc::new(RwLock::new(0u64));
        let writer_done = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                        let _r = lock.read();
                        thread::yield_now();
                    }
                })
            })
            .collect();

        let writer = {
            let lock = Arc::clone(&lock);
            let writer_done = Arc::clone(&writer_done);
            thread::spawn(move || {
                let mut w = lock.write();
                *w += 1;
                writer_done.store(true, std::sync::atomic::Ordering::Relaxed);
            })
        };

        writer.join().unwrap();
        assert!(writer_done.load(std::sync::atomic::Ordering::Relaxed));
        stop.store(true, std::sync::atomic::Ordering::Relaxed);
        thread::sleep(Duration::from_millis(5));
        for r in readers {
            r.join().unwrap();
        }
    }
}
