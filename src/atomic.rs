//! Atomic-type shim.
//!
//! Every primitive in this crate imports its atomics from here rather than
//! straight from `core::sync::atomic`, so that building with `--features loom`
//! transparently swaps in loom's simulated atomics for exhaustive interleaving
//! exploration. With the feature off this module is a zero-cost re-export.

#[cfg(not(feature = "loom"))]
pub(crate) use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, Ordering};

#[cfg(feature = "loom")]
pub(crate) use loom::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, Ordering};
