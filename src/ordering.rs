//! Memory orderings shared by every versioned structure.
//!
//! Named constants keep each access point explicit about which side of a
//! publish/observe pair it is on.

use std::sync::atomic::Ordering;

/// Loads of links, values and version words on the lock-free read path.
/// Pairs with [`WRITE_ORD`] and [`UNLOCK_ORD`].
pub const READ_ORD: Ordering = Ordering::Acquire;

/// Stores that publish a link or value to concurrent readers.
pub const WRITE_ORD: Ordering = Ordering::Release;

/// Successful CAS on a version word or link.
pub const CAS_SUCCESS: Ordering = Ordering::AcqRel;

/// Failed CAS; only the current value is needed.
pub const CAS_FAILURE: Ordering = Ordering::Acquire;

/// Accesses already ordered by a held lock.
pub const RELAXED: Ordering = Ordering::Relaxed;

/// Spinning snapshot of a version word. Must observe the lock bit.
pub const VERSION_ORD: Ordering = Ordering::Acquire;

/// Counter bump, mark changes and unlock. Must be visible to validating readers.
pub const UNLOCK_ORD: Ordering = Ordering::Release;

/// Global commit-timestamp allocation.
pub const TID_ORD: Ordering = Ordering::AcqRel;
