//! Filepath: src/version.rs
//!
//! Version word for optimistic concurrency control.
//!
//! [`VersionWord`] packs an exclusive lock bit, two sticky mark bits and a
//! mutation counter into a single `u64`. Every transactional structure in this
//! crate guards its buckets, elements, nodes and slots with one of these.
//!
//! # Concurrency Model
//! 1. Readers: [`VersionWord::load`] (or [`VersionWord::stable`]) to snapshot a
//!    [`Version`], perform the read, then compare with [`Version::matches`].
//! 2. Writers: [`VersionWord::try_lock`] with a bounded spin, mutate, call
//!    [`VersionWord::bump`], then [`VersionWord::unlock`].
//!
//! All writes to a locked word are atomic read-modify-write operations, so a
//! mark set with [`VersionWord::try_mark`] by a transaction that does not hold
//! the lock is never lost by a concurrent unlock.
//!
//! # Type-State Pattern
//! Short internal critical sections (splicing a bucket chain, restructuring
//! the tree) use [`LockGuard`], which unlocks on drop:
//!
//! ```rust
//! use occtx::version::VersionWord;
//!
//! let word = VersionWord::new();
//! let before = word.load();
//! {
//!     let guard = word.lock_guard();
//!     guard.bump();
//! }
//! assert!(!word.load().matches(before));
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::AtomicU64;

use crate::ordering::{CAS_FAILURE, CAS_SUCCESS, READ_ORD, RELAXED, UNLOCK_ORD, VERSION_ORD};



// ============================================================================
//  Bit Constants
// ============================================================================

/// Lock bit: the word is held exclusively by one writer.
pub const LOCK_BIT: u64 = 1 << 63;

/// Inserted mark: the guarded object is a tentative insert.
pub const INSERTED_BIT: u64 = 1 << 62;

/// Deleted mark: the guarded object is (tentatively or finally) deleted.
pub const DELETED_BIT: u64 = 1 << 61;

/// Both sticky marks.
pub const MARK_MASK: u64 = INSERTED_BIT | DELETED_BIT;

/// Mutation counter.
pub const COUNTER_MASK: u64 = DELETED_BIT - 1;

// ============================================================================
//  Version (snapshot)
// ============================================================================

/// An immutable snapshot of a [`VersionWord`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Version(u64);

/// Decoded view of the sticky mark bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    /// Neither mark set.
    Committed,
    /// Tentatively inserted by an uncommitted transaction.
    TentativeInsert,
    /// Marked deleted.
    TentativeDelete,
    /// Inserted and deleted within the same uncommitted transaction.
    InsertedThenDeleted,
}

impl Version {
    /// Wrap a raw value.
    #[inline]
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Mutation counter with lock and mark bits stripped.
    #[inline]
    #[must_use]
    pub const fn counter(self) -> u64 {
        self.0 & COUNTER_MASK
    }

    /// Top bit set.
    #[inline]
    #[must_use]
    pub const fn is_locked(self) -> bool {
        self.0 & LOCK_BIT != 0
    }

    /// Inserted mark set.
    #[inline]
    #[must_use]
    pub const fn is_inserted(self) -> bool {
        self.0 & INSERTED_BIT != 0
    }

    /// Deleted mark set.
    #[inline]
    #[must_use]
    pub const fn is_deleted(self) -> bool {
        self.0 & DELETED_BIT != 0
    }

    /// Decode the mark bits.
    #[must_use]
    pub const fn mark(self) -> Mark {
        match (self.is_inserted(), self.is_deleted()) {
            (false, false) => Mark::Committed,
            (true, false) => Mark::TentativeInsert,
            (false, true) => Mark::TentativeDelete,
            (true, true) => Mark::InsertedThenDeleted,
        }
    }

    /// True if nothing but the lock bit differs.
    ///
    /// The lock bit is ignored because the current holder of the lock may be
    /// the transaction performing the check.
    #[inline]
    #[must_use]
    pub const fn matches(self, other: Self) -> bool {
        (self.0 ^ other.0) & !LOCK_BIT == 0
    }

    /// True if the counters are equal, regardless of lock and mark bits.
    ///
    /// Used by structures that interpret the marks themselves.
    #[inline]
    #[must_use]
    pub const fn same_counter(self, other: Self) -> bool {
        self.counter() == other.counter()
    }

    /// The unlocked value a word holding `self` will have after one
    /// [`VersionWord::bump`] and [`VersionWord::unlock`].
    #[inline]
    #[must_use]
    pub const fn bumped(self) -> Self {
        Self((self.0 & !LOCK_BIT) + 1)
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Version")
            .field("counter", &self.counter())
            .field("locked", &self.is_locked())
            .field("mark", &self.mark())
            .finish()
    }
}

// ============================================================================
//  VersionWord
// ============================================================================

/// An atomic version word: lock bit, sticky marks and a mutation counter.
///
/// # Layout
/// Bit 63: `locked` | Bit 62: `inserted` | Bit 61: `deleted` | Bits 0-60: counter
#[derive(Default)]
pub struct VersionWord {
    value: AtomicU64,
}

impl fmt::Debug for VersionWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("VersionWord").field(&self.load()).finish()
    }
}

impl VersionWord {
    /// Unlocked, unmarked, counter zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// A word that starts out with the given mark bits set.
    #[must_use]
    pub const fn with_marks(marks: u64) -> Self {
        debug_assert!(marks & !MARK_MASK == 0, "with_marks: non-mark bits");
        Self {
            value: AtomicU64::new(marks & MARK_MASK),
        }
    }

    /// Snapshot the current value.
    #[inline]
    #[must_use]
    pub fn load(&self) -> Version {
        Version(self.value.load(READ_ORD))
    }

    /// Snapshot a value whose lock bit is clear, spinning at most `spin`
    /// iterations while a writer holds the word.
    ///
    /// Returns `None` if the word stayed locked for the whole spin.
    #[inline]
    #[must_use]
    pub fn stable(&self, spin: u32) -> Option<Version> {
        let mut remaining = spin;
        loop {
            let v = Version(self.value.load(VERSION_ORD));
            if !v.is_locked() {
                return Some(v);
            }
            if remaining == 0 {
                return None;
            }
            remaining -= 1;
            std::hint::spin_loop();
        }
    }

    /// Is the lock bit currently set?
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.load().is_locked()
    }

    // ========================================================================
    //  Lock Operations
    // ========================================================================

    /// CAS the lock bit on, spinning at most `spin` times before giving up.
    ///
    /// A `false` return means the caller must abort; this never blocks
    /// indefinitely.
    #[must_use]
    pub fn try_lock(&self, spin: u32) -> bool {
        let mut remaining = spin;
        loop {
            let current = self.value.load(RELAXED);
            if current & LOCK_BIT == 0
                && self
                    .value
                    .compare_exchange_weak(current, current | LOCK_BIT, CAS_SUCCESS, CAS_FAILURE)
                    .is_ok()
            {
                return true;
            }
            if remaining == 0 {
                return false;
            }
            remaining -= 1;
            std::hint::spin_loop();
        }
    }

    /// Spin until the lock is acquired.
    ///
    /// Only for short internal sections that must not fail, such as the
    /// install phase of a commit that already passed validation.
    pub fn lock(&self) {
        while !self.try_lock(u32::MAX) {}
    }

    /// Clear the lock bit.
    ///
    /// # Panics
    /// Panics if the word is not locked.
    pub fn unlock(&self) {
        let prev = self.value.fetch_and(!LOCK_BIT, UNLOCK_ORD);
        assert!(prev & LOCK_BIT != 0, "unlock() on an unlocked version word");
    }

    /// Increment the counter. The caller must hold the lock.
    pub fn bump(&self) {
        debug_assert!(self.is_locked(), "bump() without holding the lock");
        let prev = self.value.fetch_add(1, UNLOCK_ORD);
        debug_assert!(prev & COUNTER_MASK != COUNTER_MASK, "version counter overflow");
    }

    /// Set mark bits. The caller must hold the lock.
    pub fn set_marks(&self, marks: u64) {
        debug_assert!(self.is_locked(), "set_marks() without holding the lock");
        self.value.fetch_or(marks & MARK_MASK, UNLOCK_ORD);
    }

    /// Clear mark bits.
    ///
    /// Callable without the lock by the transaction that owns the mark.
    pub fn clear_marks(&self, marks: u64) {
        self.value.fetch_and(!(marks & MARK_MASK), UNLOCK_ORD);
    }

    /// Atomically set `mark` if the word is unlocked and the mark is clear.
    ///
    /// Returns the version observed just before marking on success.
    pub fn try_mark(&self, mark: u64) -> Option<Version> {
        let mut current = self.value.load(RELAXED);
        loop {
            if current & (LOCK_BIT | mark) != 0 {
                return None;
            }
            match self
                .value
                .compare_exchange_weak(current, current | mark, CAS_SUCCESS, CAS_FAILURE)
            {
                Ok(_) => return Some(Version(current)),
                Err(actual) => current = actual,
            }
        }
    }

    // ========================================================================
    //  Lock Guards (Type-State Pattern)
    // ========================================================================

    /// Acquire the lock (unbounded spin) and return a guard.
    #[must_use = "releasing a lock without using the guard is a logic error"]
    pub fn lock_guard(&self) -> LockGuard<'_> {
        self.lock();
        LockGuard {
            word: self,
            _marker: PhantomData,
        }
    }

    /// Try to acquire the lock with a bounded spin.
    #[must_use]
    pub fn try_lock_guard(&self, spin: u32) -> Option<LockGuard<'_>> {
        self.try_lock(spin).then_some(LockGuard {
            word: self,
            _marker: PhantomData,
        })
    }
}

/// Proof that a [`VersionWord`] lock is held.
///
/// Cannot be constructed except through [`VersionWord::lock_guard`] or
/// [`VersionWord::try_lock_guard`]. The lock is released on drop, even during
/// unwinding. Guards are `!Send` and `!Sync` via `PhantomData<*mut ()>`.
#[derive(Debug)]
#[must_use = "releasing a lock without using the guard is a logic error"]
pub struct LockGuard<'a> {
    word: &'a VersionWord,
    _marker: PhantomData<*mut ()>,
}

impl LockGuard<'_> {
    /// Increment the counter of the held word.
    #[inline]
    pub fn bump(&self) {
        self.word.bump();
    }

    /// Current value, lock bit included.
    #[inline]
    #[must_use]
    pub fn version(&self) -> Version {
        self.word.load()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.word.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_clean() {
        let w = VersionWord::new();
        let v = w.load();
        assert!(!v.is_locked());
        assert_eq!(v.mark(), Mark::Committed);
        assert_eq!(v.counter(), 0);
    }

    #[test]
    fn test_try_lock_excludes() {
        let w = VersionWord::new();
        assert!(w.try_lock(0));
        assert!(w.is_locked());
        assert!(!w.try_lock(16));
        w.unlock();
        assert!(!w.is_locked());
    }

    #[test]
    fn test_matches_ignores_lock_bit() {
        let w = VersionWord::new();
        let before = w.load();
        assert!(w.try_lock(0));
        let during = w.load();
        assert!(during.is_locked());
        assert!(during.matches(before));
        w.bump();
        assert!(!w.load().matches(before));
        w.unlock();
        assert_eq!(w.load().counter(), 1);
        assert_eq!(during.bumped(), w.load());
    }

    #[test]
    fn test_marks_are_sticky_across_bumps() {
        let w = VersionWord::with_marks(INSERTED_BIT);
        assert_eq!(w.load().mark(), Mark::TentativeInsert);
        w.lock();
        w.bump();
        w.unlock();
        assert!(w.load().is_inserted());
        assert_eq!(w.load().counter(), 1);

        w.lock();
        w.clear_marks(INSERTED_BIT);
        w.set_marks(DELETED_BIT);
        w.unlock();
        assert_eq!(w.load().mark(), Mark::TentativeDelete);
    }

    #[test]
    fn test_same_counter_vs_matches() {
        let w = VersionWord::new();
        let before = w.load();
        assert!(w.try_mark(DELETED_BIT).is_some());
        let after = w.load();
        assert!(after.same_counter(before));
        assert!(!after.matches(before));
    }

    #[test]
    fn test_try_mark_refuses_locked_or_marked() {
        let w = VersionWord::new();
        assert!(w.try_mark(DELETED_BIT).is_some());
        assert!(w.try_mark(DELETED_BIT).is_none());
        w.clear_marks(DELETED_BIT);

        w.lock();
        assert!(w.try_mark(DELETED_BIT).is_none());
        w.unlock();
        assert!(w.try_mark(DELETED_BIT).is_some());
    }

    #[test]
    fn test_unlock_preserves_concurrent_mark() {
        let w = VersionWord::new();
        w.lock();
        // Another party marks the word while the lock is held.
        w.value.fetch_or(DELETED_BIT, UNLOCK_ORD);
        w.unlock();
        assert!(w.load().is_deleted());
    }

    #[test]
    fn test_guard_unlocks_on_drop() {
        let w = VersionWord::new();
        {
            let g = w.lock_guard();
            assert!(g.version().is_locked());
            g.bump();
        }
        assert!(!w.is_locked());
        assert_eq!(w.load().counter(), 1);

        let g = w.try_lock_guard(0);
        assert!(g.is_some());
        assert!(w.try_lock_guard(0).is_none());
        drop(g);
        assert!(w.try_lock_guard(0).is_some());
    }

    #[test]
    fn test_stable_gives_up_while_locked() {
        let w = VersionWord::new();
        w.lock();
        assert!(w.stable(8).is_none());
        w.unlock();
        assert!(w.stable(0).is_some());
    }

    #[test]
    #[should_panic(expected = "unlock() on an unlocked version word")]
    fn test_unlock_unlocked_panics() {
        VersionWord::new().unlock();
    }
}
