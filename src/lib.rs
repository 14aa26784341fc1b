//! Futex-backed synchronization primitives: [`Spinlock`], [`Mutex`],
//! [`Event`], [`Barrier`], [`Once`], [`CondVar`], [`Semaphore`], [`RwLock`].
//!
//! Every primitive packs its entire observable state into a single atomic
//! word and parks/wakes waiters directly on that word through
//! [`futex`]'s Linux `SYS_futex` binding — there is no per-waiter list or
//! queue object anywhere in this crate; the kernel's futex wait queue *is*
//! the waiter list. See each module's documentation for its exact state
//! encoding and algorithm.
//!
//! All blocking operations wait indefinitely; none of these primitives
//! support cancellation or timeouts. Misuse (unlocking a lock the caller
//! does not hold, exceeding a semaphore's maximum count, and the like) is
//! undefined behavior rather than a recoverable error, guarded by
//! `debug_assert!` at the internal protocol layer the public RAII guards are
//! built from — the guards themselves make the common misuses structurally
//! unreachable from safe code.
#![warn(missing_docs, rust_2018_idioms, missing_debug_implementations)]

mod atomic;
pub mod barrier;
pub mod condvar;
pub mod event;
mod futex;
pub mod mutex;
pub mod once;
pub mod rwlock;
pub mod semaphore;
pub mod spinlock;

pub use barrier::Barrier;
pub use condvar::CondVar;
pub use event::Event;
pub use mutex::{Mutex, MutexGuard};
pub use once::Once;
pub use rwlock::{RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use semaphore::Semaphore;
pub use spinlock::Spinlock;
