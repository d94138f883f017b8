//! Per-access records kept by a [`Transaction`](super::Transaction).
//!
//! A [`TransItem`] is created on first touch of an `(owner, key)` pair and
//! carries everything the owner needs at commit: the version it read, the
//! value it intends to write, owner-specific scratch state, an optional
//! predicate, and flag bits.

use std::any::Any;
use std::fmt;

use super::TObject;
use crate::version::Version;

// ============================================================================
//  Flags
// ============================================================================

/// First structure-defined flag bit. Owners define their own bits as
/// `USER0_FLAG << n`.
pub const USER0_FLAG: u32 = 1;

/// Set by the coordinator (or by an owner that locks during execution) while
/// this transaction holds the lock guarding the item.
pub(crate) const LOCKED_FLAG: u32 = 1 << 31;

// ============================================================================
//  ItemKey
// ============================================================================

/// Identifies an item within its owner.
///
/// Owners encode either an address (optionally tagged in the low bit, which
/// is always clear for heap allocations of alignment >= 2) or a signed index.
/// The coordinator orders lock acquisition by `(owner, key)`, so keys compare
/// as plain `u64`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemKey(pub u64);

impl ItemKey {
    /// Low tag bit.
    pub const TAG: u64 = 1;

    /// Key for an address.
    #[inline]
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize as u64)
    }

    /// Key for an address with the low tag bit set.
    #[inline]
    #[must_use]
    pub fn tagged<T>(ptr: *const T) -> Self {
        Self(ptr as usize as u64 | Self::TAG)
    }

    /// Key for a signed index.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn from_index(index: i64) -> Self {
        Self(index as u64)
    }

    /// The signed index this key was built from.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn as_index(self) -> i64 {
        self.0 as i64
    }

    /// Is the tag bit set?
    #[inline]
    #[must_use]
    pub const fn is_tagged(self) -> bool {
        self.0 & Self::TAG != 0
    }

    /// The address with the tag bit stripped.
    #[inline]
    #[must_use]
    pub fn as_ptr<T>(self) -> *mut T {
        (self.0 & !Self::TAG) as usize as *mut T
    }
}

impl fmt::Debug for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemKey({:#x})", self.0)
    }
}

// ============================================================================
//  TransItem
// ============================================================================

/// One resource access record.
pub struct TransItem<'a> {
    owner: &'a dyn TObject,
    key: ItemKey,
    read: Option<Version>,
    write: Option<Box<dyn Any>>,
    extra: Option<Box<dyn Any>>,
    predicate: Option<Box<dyn Any>>,
    flags: u32,
}

impl<'a> TransItem<'a> {
    pub(crate) fn new(owner: &'a dyn TObject, key: ItemKey) -> Self {
        Self {
            owner,
            key,
            read: None,
            write: None,
            extra: None,
            predicate: None,
            flags: 0,
        }
    }

    /// The structure this item belongs to.
    #[inline]
    #[must_use]
    pub fn owner(&self) -> &'a dyn TObject {
        self.owner
    }

    /// Key within the owner.
    #[inline]
    #[must_use]
    pub const fn key(&self) -> ItemKey {
        self.key
    }

    // ========================================================================
    //  Reads
    // ========================================================================

    /// Has a version been recorded?
    #[inline]
    #[must_use]
    pub const fn has_read(&self) -> bool {
        self.read.is_some()
    }

    /// The recorded version.
    #[inline]
    #[must_use]
    pub const fn read_version(&self) -> Option<Version> {
        self.read
    }

    /// Record `version` unless a version is already recorded.
    ///
    /// The first observation wins; a later, different observation would fail
    /// validation anyway.
    #[inline]
    pub fn observe(&mut self, version: Version) -> &mut Self {
        if self.read.is_none() {
            self.read = Some(version);
        }
        self
    }

    /// Replace the recorded version.
    #[inline]
    pub fn set_read(&mut self, version: Version) -> &mut Self {
        self.read = Some(version);
        self
    }

    /// Forget the recorded version.
    #[inline]
    pub fn clear_read(&mut self) -> &mut Self {
        self.read = None;
        self
    }

    // ========================================================================
    //  Writes
    // ========================================================================

    /// Is a write pending?
    #[inline]
    #[must_use]
    pub const fn has_write(&self) -> bool {
        self.write.is_some()
    }

    /// Register (or replace) the pending write.
    pub fn add_write<T: 'static>(&mut self, value: T) -> &mut Self {
        self.write = Some(Box::new(value));
        self
    }

    /// The pending write, if it is a `T`.
    #[must_use]
    pub fn write_value<T: 'static>(&self) -> Option<&T> {
        self.write.as_deref().and_then(<dyn Any>::downcast_ref::<T>)
    }

    /// Mutable access to the pending write, if it is a `T`.
    pub fn write_value_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.write.as_deref_mut().and_then(<dyn Any>::downcast_mut::<T>)
    }

    /// Take the pending write out, leaving the item write-free.
    pub fn take_write<T: 'static>(&mut self) -> Option<T> {
        let boxed = self.write.take()?;
        match boxed.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                self.write = Some(other);
                None
            }
        }
    }

    /// Drop the pending write.
    #[inline]
    pub fn clear_write(&mut self) -> &mut Self {
        self.write = None;
        self
    }

    // ========================================================================
    //  Owner Scratch State And Predicates
    // ========================================================================

    /// Owner-defined state, created on first use.
    pub fn extra_or_insert_with<T: 'static>(&mut self, init: impl FnOnce() -> T) -> &mut T {
        if !self.extra.as_deref().is_some_and(<dyn Any>::is::<T>) {
            self.extra = Some(Box::new(init()));
        }
        self.extra
            .as_deref_mut()
            .and_then(<dyn Any>::downcast_mut::<T>)
            .unwrap_or_else(|| unreachable!("extra state was just set to this type"))
    }

    /// Owner-defined state, if present.
    #[must_use]
    pub fn extra<T: 'static>(&self) -> Option<&T> {
        self.extra.as_deref().and_then(<dyn Any>::downcast_ref::<T>)
    }

    /// Has a predicate been attached?
    #[inline]
    #[must_use]
    pub const fn has_predicate(&self) -> bool {
        self.predicate.is_some()
    }

    /// The predicate, created on first use.
    pub fn predicate_or_insert_with<T: 'static>(&mut self, init: impl FnOnce() -> T) -> &mut T {
        if !self.predicate.as_deref().is_some_and(<dyn Any>::is::<T>) {
            self.predicate = Some(Box::new(init()));
        }
        self.predicate
            .as_deref_mut()
            .and_then(<dyn Any>::downcast_mut::<T>)
            .unwrap_or_else(|| unreachable!("predicate was just set to this type"))
    }

    /// The predicate, if present.
    #[must_use]
    pub fn predicate<T: 'static>(&self) -> Option<&T> {
        self.predicate.as_deref().and_then(<dyn Any>::downcast_ref::<T>)
    }

    // ========================================================================
    //  Flags
    // ========================================================================

    /// Raw flag bits.
    #[inline]
    #[must_use]
    pub const fn flags(&self) -> u32 {
        self.flags
    }

    /// Are all bits of `flag` set?
    #[inline]
    #[must_use]
    pub const fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag == flag
    }

    /// Set structure-defined flag bits.
    #[inline]
    pub fn add_flags(&mut self, flags: u32) -> &mut Self {
        debug_assert!(flags & LOCKED_FLAG == 0, "LOCKED_FLAG is reserved");
        self.flags |= flags;
        self
    }

    /// Clear structure-defined flag bits.
    #[inline]
    pub fn clear_flags(&mut self, flags: u32) -> &mut Self {
        debug_assert!(flags & LOCKED_FLAG == 0, "LOCKED_FLAG is reserved");
        self.flags &= !flags;
        self
    }

    /// Does this transaction hold the lock guarding this item?
    #[inline]
    #[must_use]
    pub const fn is_locked_here(&self) -> bool {
        self.flags & LOCKED_FLAG != 0
    }

    /// Record that the owner took this item's lock during execution.
    ///
    /// The coordinator skips such items in the lock phase and unlocks them
    /// on commit or abort like any other.
    #[inline]
    pub fn set_locked_here(&mut self) {
        self.flags |= LOCKED_FLAG;
    }

    #[inline]
    pub(crate) fn clear_locked_here(&mut self) {
        self.flags &= !LOCKED_FLAG;
    }

    pub(crate) fn owner_addr(&self) -> usize {
        owner_addr(self.owner)
    }
}

impl fmt::Debug for TransItem<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransItem")
            .field("owner", &self.owner.name())
            .field("key", &self.key)
            .field("read", &self.read)
            .field("write", &self.write.is_some())
            .field("predicate", &self.predicate.is_some())
            .field("flags", &format_args!("{:#x}", self.flags))
            .finish()
    }
}

pub(crate) fn owner_addr(owner: &dyn TObject) -> usize {
    std::ptr::from_ref(owner).cast::<()>() as usize
}
