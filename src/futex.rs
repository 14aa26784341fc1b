//! Thin binding over the kernel's futex wait/wake/requeue primitive.
//!
//! Every other module in this crate parks and wakes threads exclusively
//! through the four free functions here; none of them touch `libc` or a
//! platform syscall directly. That keeps this file as the single seam a
//! second platform's equivalent (Windows `WaitOnAddress`, say) would need to
//! replace.
//!
//! On Linux this is realized as direct calls to `libc::syscall(libc::SYS_futex, ..)`
//! with the `*_PRIVATE` opcodes, since every primitive in this crate is
//! process-private (no cross-process shared-memory support is needed). Other
//! platforms fall back to a yielding poll loop; this preserves correctness
//! (every `park` call only blocks while the observed word still equals the
//! expected snapshot) at the cost of the efficiency a real futex provides.

use crate::atomic::{AtomicU32, Ordering};

static_assertions::const_assert_eq!(core::mem::size_of::<AtomicU32>(), 4);

/// Blocks the current thread if `word` still equals `expected`. Returns
/// immediately (without blocking) if it does not. Spurious wakeups are
/// possible; callers must re-check the word themselves.
#[inline]
pub(crate) fn park(word: &AtomicU32, expected: u32) {
    sys::park(word, expected)
}

/// Wakes up to `n` threads parked on `word`. Returns the number actually
/// woken (best effort; callers must not rely on the exact count).
#[inline]
pub(crate) fn wake(word: &AtomicU32, n: i32) -> i32 {
    sys::wake(word, n)
}

/// Like [`park`], but the waiter only counts as eligible for wake-ups whose
/// bitmask intersects `mask`. Used by [`crate::rwlock`] to let readers and
/// writers park on the same word without waking each other.
#[inline]
pub(crate) fn park_bitset(word: &AtomicU32, expected: u32, mask: u32) {
    sys::park_bitset(word, expected, mask)
}

/// Like [`wake`], restricted to waiters whose bitmask intersects `mask`.
#[inline]
pub(crate) fn wake_bitset(word: &AtomicU32, n: i32, mask: u32) -> i32 {
    sys::wake_bitset(word, n, mask)
}

/// Wakes up to `wake_n` waiters on `word1`, and moves up to `requeue_n` of
/// the *remaining* waiters from `word1`'s wait queue onto `word2`'s, without
/// running them. Used by [`crate::condvar`] to hand a broadcast's waiters off
/// to the bound mutex's wait queue.
#[inline]
pub(crate) fn requeue(word1: &AtomicU32, wake_n: i32, word2: &AtomicU32, requeue_n: i32) {
    sys::requeue(word1, wake_n, word2, requeue_n)
}

#[cfg(all(target_os = "linux", not(feature = "loom")))]
mod sys {
    use super::AtomicU32;
    use std::ptr;

    #[inline]
    fn addr(word: &AtomicU32) -> *mut u32 {
        word as *const AtomicU32 as *mut u32
    }

    pub(super) fn park(word: &AtomicU32, expected: u32) {
        log::trace!("futex park: word={:p} expected={expected}", word);
        // SAFETY: `addr(word)` points at a live, aligned `u32` for as long as
        // `word` is borrowed; the kernel only reads/compares it and does not
        // retain the pointer past the call.
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                addr(word),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                expected,
                ptr::null::<libc::timespec>(),
            );
        }
    }

    pub(super) fn wake(word: &AtomicU32, n: i32) -> i32 {
        log::trace!("futex wake: word={:p} n={n}", word);
        // SAFETY: see `park`; `FUTEX_WAKE` does not dereference past `addr`.
        let woken = unsafe {
            libc::syscall(
                libc::SYS_futex,
                addr(word),
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                n,
            )
        };
        woken.max(0) as i32
    }

    pub(super) fn park_bitset(word: &AtomicU32, expected: u32, mask: u32) {
        log::trace!("futex park_bitset: word={:p} expected={expected} mask={mask:#x}", word);
        // SAFETY: see `park`.
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                addr(word),
                libc::FUTEX_WAIT_BITSET | libc::FUTEX_PRIVATE_FLAG,
                expected,
                ptr::null::<libc::timespec>(),
                ptr::null::<u32>(),
                mask,
            );
        }
    }

    pub(super) fn wake_bitset(word: &AtomicU32, n: i32, mask: u32) -> i32 {
        log::trace!("futex wake_bitset: word={:p} n={n} mask={mask:#x}", word);
        // SAFETY: see `park`.
        let woken = unsafe {
            libc::syscall(
                libc::SYS_futex,
                addr(word),
                libc::FUTEX_WAKE_BITSET | libc::FUTEX_PRIVATE_FLAG,
                n,
                ptr::null::<libc::timespec>(),
                ptr::null::<u32>(),
                mask,
            )
        };
        woken.max(0) as i32
    }

    pub(super) fn requeue(word1: &AtomicU32, wake_n: i32, word2: &AtomicU32, requeue_n: i32) {
        log::trace!(
            "futex requeue: word1={:p} wake_n={wake_n} word2={:p} requeue_n={requeue_n}",
            word1,
            word2
        );
        // SAFETY: both words stay borrowed (and therefore alive) for the
        // duration of the call; `FUTEX_REQUEUE`'s "timeout" argument slot is
        // reinterpreted by the kernel as the requeue count for this opcode,
        // not as a pointer, matching the futex(2) ABI.
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                addr(word1),
                libc::FUTEX_REQUEUE | libc::FUTEX_PRIVATE_FLAG,
                wake_n,
                requeue_n,
                addr(word2),
            );
        }
    }
}

/// Portable fallback for platforms without a real futex facility: busy-polls
/// the word with a scheduler yield between checks. Correct (every `park`
/// still only blocks while the word matches the expected snapshot) but gives
/// up the kernel-parked efficiency the primitives above are designed around.
#[cfg(all(not(target_os = "linux"), not(feature = "loom")))]
mod sys {
    use super::{AtomicU32, Ordering};

    pub(super) fn park(word: &AtomicU32, expected: u32) {
        while word.load(Ordering::Acquire) == expected {
            std::thread::yield_now();
        }
    }

    pub(super) fn wake(_word: &AtomicU32, _n: i32) -> i32 {
        0
    }

    pub(super) fn park_bitset(word: &AtomicU32, expected: u32, _mask: u32) {
        park(word, expected)
    }

    pub(super) fn wake_bitset(_word: &AtomicU32, _n: i32, _mask: u32) -> i32 {
        0
    }

    pub(super) fn requeue(_word1: &AtomicU32, _wake_n: i32, _word2: &AtomicU32, _requeue_n: i32) {}
}

/// Model-checking fallback used under `--features loom`. loom's simulated
/// atomics aren't real memory words a kernel syscall can key on, and loom
/// drives its own cooperative scheduler rather than real OS threads, so
/// `park` here busy-polls through loom's scheduler instead of blocking in
/// the kernel. Every `park` call site in this crate only blocks while the
/// observed word equals a stored snapshot, so once the releaser's store is
/// visible the poll exits on its own; `wake`/`wake_bitset`/`requeue` are
/// therefore sound no-ops under the model (they exist only to avoid a real
/// futex's busy-wait cost, not for correctness) and are not exercised by the
/// loom suite.
#[cfg(feature = "loom")]
mod sys {
    use super::{AtomicU32, Ordering};

    pub(super) fn park(word: &AtomicU32, expected: u32) {
        while word.load(Ordering::Acquire) == expected {
            loom::thread::yield_now();
        }
    }

    pub(super) fn wake(_word: &AtomicU32, _n: i32) -> i32 {
        0
    }

    pub(super) fn park_bitset(word: &AtomicU32, expected: u32, _mask: u32) {
        park(word, expected)
    }

    pub(super) fn wake_bitset(_word: &AtomicU32, _n: i32, _mask: u32) -> i32 {
        0
    }

    pub(super) fn requeue(_word1: &AtomicU32, _wake_n: i32, _word2: &AtomicU32, _requeue_n: i32) {}
}
