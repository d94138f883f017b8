//! Filepath: src/vector.rs
//!
//! Fixed-capacity transactional vector with relative size changes.
//!
//! # Items
//!
//! | Key | Guards |
//! |-----|--------|
//! | `0` | the size; extra holds the transaction's view, predicate holds what it learned |
//! | `i + 1` | slot `i` of the vector as it was when the transaction first touched the size |
//! | `-m` | the `m`-th slot this transaction appended past that snapshot |
//!
//! The first size access snapshots the physical size as the transaction's
//! *original* size. Pushes and pops move a private *current* size; reads of
//! the size only narrow a [`SizePredicate`] over the original. At commit the
//! new physical size is `physical + (current - original)`, so two transactions
//! that each push one element both commit and both elements land. Appended
//! slots are placed relative to the physical size at install time.
//!
//! Reading one of this transaction's own appended slots, or a slot it wrote
//! after popping past it, pins the original size exactly.

use std::fmt;
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize};
use std::ptr;

use crate::config::Config;
use crate::error::{AbortReason, TxResult, TxnError};
use crate::ordering::{READ_ORD, RELAXED, WRITE_ORD};
use crate::predicate::SizePredicate;
use crate::reclaim;
use crate::tracing_helpers::trace_log;
use crate::txn::{ItemKey, TObject, TransItem, Transaction, TxnCtx, USER0_FLAG};
use crate::version::{Version, VersionWord};

/// The item was reached through an index read, so its key names a fixed slot.
const INDEXED_FLAG: u32 = USER0_FLAG;

const SIZE_KEY: ItemKey = ItemKey::from_index(0);

struct Slot<T> {
    version: VersionWord,
    /// Null until first written.
    value: AtomicPtr<T>,
}

/// A transaction's view of the size.
#[derive(Debug, Clone, Copy)]
struct SizeInfo {
    original: usize,
    current: usize,
}

impl SizeInfo {
    #[allow(clippy::cast_possible_wrap)]
    const fn delta(self) -> i64 {
        self.current as i64 - self.original as i64
    }

    /// The original size that corresponds to `k` in this transaction's view.
    ///
    /// Saturates past `i64::MAX`, which no size can reach.
    fn original_bound(self, k: usize) -> i64 {
        i64::try_from(k).unwrap_or(i64::MAX).saturating_sub(self.delta())
    }
}

/// Pending write marker on the size item.
struct SizeWrite;

/// A transactional vector of at most `capacity` elements.
pub struct TVector<T> {
    slots: Box<[Slot<T>]>,
    size: AtomicUsize,
    size_version: VersionWord,
    /// Physical size just before the last committed size change. Written
    /// under the size lock; appended slots are placed relative to it.
    original_size: AtomicUsize,
    /// Transaction holding the size lock at commit, or zero.
    size_owner: AtomicU64,
    config: Config,
}

impl<T> TVector<T> {
    /// Create an empty vector with [`Config::vector_capacity`] slots.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create an empty vector holding at most `capacity` elements.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_config(Config::default().with_vector_capacity(capacity))
    }

    /// Create an empty vector sized and tuned by `config`.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        let slots: Box<[Slot<T>]> = (0..config.vector_capacity)
            .map(|_| Slot {
                version: VersionWord::new(),
                value: AtomicPtr::new(ptr::null_mut()),
            })
            .collect();
        Self {
            slots,
            size: AtomicUsize::new(0),
            size_version: VersionWord::new(),
            original_size: AtomicUsize::new(0),
            size_owner: AtomicU64::new(0),
            config,
        }
    }

    /// Maximum number of elements.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl<T> Default for TVector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TVector<T>
where
    T: Clone + Send + Sync + 'static,
{
    // ========================================================================
    //  Snapshots
    // ========================================================================

    fn snapshot_size(&self, spin: u32) -> Option<(Version, usize)> {
        loop {
            let before = self.size_version.stable(spin)?;
            let size = self.size.load(READ_ORD);
            if self.size_version.load() == before {
                return Some((before, size));
            }
        }
    }

    fn snapshot_slot(slot: &Slot<T>, spin: u32) -> Option<(Version, Option<T>)> {
        loop {
            let before = slot.version.stable(spin)?;
            let raw = slot.value.load(READ_ORD);
            // SAFETY: values are retired, never freed, while a guard is held.
            let value = (!raw.is_null()).then(|| unsafe { (*raw).clone() });
            if slot.version.load() == before {
                return Some((before, value));
            }
        }
    }

    /// Replace the value in `slot`. Caller holds the slot lock.
    fn store_slot(slot: &Slot<T>, value: T, ctx: &TxnCtx) {
        let old = slot.value.swap(Box::into_raw(Box::new(value)), WRITE_ORD);
        // SAFETY: the old value is unreachable once swapped out.
        unsafe { ctx.rcu_free(old) };
        slot.version.bump();
    }

    // ========================================================================
    //  Non-transactional API
    // ========================================================================

    /// Committed length.
    #[must_use]
    pub fn nontrans_len(&self) -> usize {
        loop {
            if let Some((_, size)) = self.snapshot_size(self.config.reader_spin_limit) {
                return size;
            }
        }
    }

    /// Committed element at `index`, if within the committed length.
    #[must_use]
    pub fn nontrans_get(&self, index: usize) -> Option<T> {
        if index >= self.nontrans_len() {
            return None;
        }
        let _guard = reclaim::enter();
        loop {
            if let Some((_, value)) = Self::snapshot_slot(&self.slots[index], self.config.reader_spin_limit) {
                return value;
            }
        }
    }

    /// Append outside any transaction.
    ///
    /// # Errors
    /// [`TxnError::CapacityExceeded`] if the vector is full.
    pub fn nontrans_push_back(&self, value: T) -> TxResult<()> {
        let guard = reclaim::enter();
        let lock = self.size_version.lock_guard();
        let size = self.size.load(RELAXED);
        let Some(slot) = self.slots.get(size) else {
            return Err(TxnError::CapacityExceeded {
                capacity: self.capacity(),
            });
        };
        slot.version.lock();
        let old = slot.value.swap(Box::into_raw(Box::new(value)), WRITE_ORD);
        slot.version.bump();
        slot.version.unlock();
        // SAFETY: swapped out above; published exactly once.
        unsafe { reclaim::retire_boxed(&guard, old) };

        self.original_size.store(size, RELAXED);
        self.size.store(size + 1, WRITE_ORD);
        lock.bump();
        Ok(())
    }

    /// Committed contents, in order.
    #[must_use]
    pub fn nontrans_to_vec(&self) -> Vec<T> {
        (0..self.nontrans_len()).filter_map(|i| self.nontrans_get(i)).collect()
    }

    // ========================================================================
    //  Size item
    // ========================================================================

    fn size_info<'a>(&'a self, txn: &mut Transaction<'a>) -> TxResult<SizeInfo> {
        if let Some(info) = txn.peek_item(self, SIZE_KEY).and_then(|it| it.extra::<SizeInfo>()) {
            return Ok(*info);
        }
        let Some((_, size)) = self.snapshot_size(txn.config().reader_spin_limit) else {
            return Err(txn.abort_with(AbortReason::LockTimeout));
        };
        let info = SizeInfo {
            original: size,
            current: size,
        };
        let item = txn.item(self, SIZE_KEY);
        item.predicate_or_insert_with(SizePredicate::unconstrained);
        item.extra_or_insert_with(|| info);
        Ok(info)
    }

    fn set_current<'a>(&'a self, txn: &mut Transaction<'a>, info: SizeInfo) {
        let item = txn.item(self, SIZE_KEY);
        *item.extra_or_insert_with(|| info) = info;
        item.add_write(SizeWrite);
    }

    /// Narrow the size predicate, aborting on contradiction.
    fn narrow<'a>(
        &'a self,
        txn: &mut Transaction<'a>,
        observe: impl FnOnce(&mut SizePredicate) -> bool,
    ) -> TxResult<()> {
        let pred = txn.item(self, SIZE_KEY).predicate_or_insert_with(SizePredicate::unconstrained);
        if observe(pred) {
            Ok(())
        } else {
            Err(txn.abort_with(AbortReason::PredicateContradiction))
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    fn slot_key(index: usize, info: SizeInfo) -> ItemKey {
        if index < info.original {
            ItemKey::from_index(index as i64 + 1)
        } else {
            ItemKey::from_index(-((index - info.original) as i64 + 1))
        }
    }

    /// Resolve `index` to its item, recording the size facts the access
    /// depends on.
    #[allow(clippy::cast_possible_wrap)]
    fn index_item<'a>(&'a self, txn: &mut Transaction<'a>, index: usize) -> TxResult<ItemKey> {
        let info = self.size_info(txn)?;
        if index >= info.current {
            self.narrow(txn, |p| p.observe_le(info.original_bound(index), true))?;
            return Err(TxnError::OutOfRange {
                index,
                len: info.current,
            });
        }

        let key = Self::slot_key(index, info);
        let item = txn.item(self, key);
        let pinned = key.as_index() < 0 || (item.has_write() && !item.has_flag(INDEXED_FLAG));
        item.add_flags(INDEXED_FLAG);
        if pinned {
            self.narrow(txn, |p| p.pin(info.original as i64))?;
        } else {
            self.narrow(txn, |p| p.observe_gt(index as i64, true))?;
        }
        Ok(key)
    }

    // ========================================================================
    //  Transactional API
    // ========================================================================

    /// Element at `index`.
    ///
    /// # Errors
    /// [`TxnError::OutOfRange`] past the transactional length, or an abort.
    pub fn get<'a>(&'a self, txn: &mut Transaction<'a>, index: usize) -> TxResult<T> {
        txn.ensure_active()?;
        let key = self.index_item(txn, index)?;
        if let Some(v) = txn.peek_item(self, key).and_then(|it| it.write_value::<T>()) {
            return Ok(v.clone());
        }
        debug_assert!(key.as_index() > 0, "appended slots always carry a write");

        let slot = &self.slots[index];
        let Some((version, value)) = Self::snapshot_slot(slot, txn.config().reader_spin_limit) else {
            return Err(txn.abort_with(AbortReason::LockTimeout));
        };
        let Some(value) = value else {
            // Never written: the size we were promised is already gone.
            return Err(txn.abort_with(AbortReason::ValidationFailed));
        };
        txn.item(self, key).observe(version);
        Ok(value)
    }

    /// Overwrite the element at `index`.
    ///
    /// # Errors
    /// [`TxnError::OutOfRange`] past the transactional length, or an abort.
    pub fn put<'a>(&'a self, txn: &mut Transaction<'a>, index: usize, value: T) -> TxResult<()> {
        txn.ensure_active()?;
        let key = self.index_item(txn, index)?;
        txn.item(self, key).add_write(value);
        Ok(())
    }

    /// Last element.
    ///
    /// # Errors
    /// [`TxnError::OutOfRange`] if empty, or an abort.
    #[allow(clippy::cast_possible_wrap)]
    pub fn back<'a>(&'a self, txn: &mut Transaction<'a>) -> TxResult<T> {
        txn.ensure_active()?;
        let info = self.size_info(txn)?;
        if info.current == 0 {
            self.narrow(txn, |p| p.observe_le(-info.delta(), true))?;
            return Err(TxnError::OutOfRange { index: 0, len: 0 });
        }
        self.get(txn, info.current - 1)
    }

    /// Append `value`.
    ///
    /// # Errors
    /// [`TxnError::CapacityExceeded`] if the transactional length is already
    /// at capacity, or an abort.
    #[allow(clippy::cast_possible_wrap)]
    pub fn push_back<'a>(&'a self, txn: &mut Transaction<'a>, value: T) -> TxResult<()> {
        txn.ensure_active()?;
        let mut info = self.size_info(txn)?;
        if info.current >= self.capacity() {
            return Err(TxnError::CapacityExceeded {
                capacity: self.capacity(),
            });
        }
        let index = info.current;
        info.current += 1;
        self.set_current(txn, info);
        if index < info.original {
            // Refilling a slot this transaction popped: its position only
            // stays fixed if nobody else moves the size.
            self.narrow(txn, |p| p.pin(info.original as i64))?;
        }
        txn.item(self, Self::slot_key(index, info)).add_write(value);
        Ok(())
    }

    /// Remove the last element.
    ///
    /// Only requires that enough elements exist at commit; concurrent
    /// appends by others are kept.
    ///
    /// # Errors
    /// [`TxnError::OutOfRange`] if empty, or an abort.
    #[allow(clippy::cast_possible_wrap)]
    pub fn pop_back<'a>(&'a self, txn: &mut Transaction<'a>) -> TxResult<()> {
        txn.ensure_active()?;
        let mut info = self.size_info(txn)?;
        if info.current == 0 {
            self.narrow(txn, |p| p.pin(info.original as i64))?;
            return Err(TxnError::OutOfRange { index: 0, len: 0 });
        }
        info.current -= 1;
        self.set_current(txn, info);
        if info.current < info.original {
            let popped = (info.original - info.current) as i64;
            self.narrow(txn, |p| p.observe_ge(popped, true))?;
        }
        Ok(())
    }

    /// Remove every element.
    ///
    /// # Errors
    /// Aborts if the size was already observed to be something else.
    #[allow(clippy::cast_possible_wrap)]
    pub fn clear<'a>(&'a self, txn: &mut Transaction<'a>) -> TxResult<()> {
        txn.ensure_active()?;
        let mut info = self.size_info(txn)?;
        self.narrow(txn, |p| p.pin(info.original as i64))?;
        info.current = 0;
        self.set_current(txn, info);
        Ok(())
    }

    /// Exact transactional length. Pins the size.
    ///
    /// Prefer the comparison methods when only a bound matters.
    #[allow(clippy::cast_possible_wrap)]
    pub fn len<'a>(&'a self, txn: &mut Transaction<'a>) -> TxResult<usize> {
        txn.ensure_active()?;
        let info = self.size_info(txn)?;
        self.narrow(txn, |p| p.pin(info.original as i64))?;
        Ok(info.current)
    }

    /// `len() == 0`, recorded as a bound.
    pub fn is_empty<'a>(&'a self, txn: &mut Transaction<'a>) -> TxResult<bool> {
        self.size_eq(txn, 0)
    }

    /// `len() < k`, recorded as a bound rather than an exact size.
    pub fn size_lt<'a>(&'a self, txn: &mut Transaction<'a>, k: usize) -> TxResult<bool> {
        txn.ensure_active()?;
        let info = self.size_info(txn)?;
        let outcome = info.current < k;
        self.narrow(txn, |p| p.observe_lt(info.original_bound(k), outcome))?;
        Ok(outcome)
    }

    /// `len() <= k`.
    pub fn size_le<'a>(&'a self, txn: &mut Transaction<'a>, k: usize) -> TxResult<bool> {
        txn.ensure_active()?;
        let info = self.size_info(txn)?;
        let outcome = info.current <= k;
        self.narrow(txn, |p| p.observe_le(info.original_bound(k), outcome))?;
        Ok(outcome)
    }

    /// `len() > k`.
    pub fn size_gt<'a>(&'a self, txn: &mut Transaction<'a>, k: usize) -> TxResult<bool> {
        self.size_le(txn, k).map(|le| !le)
    }

    /// `len() >= k`.
    pub fn size_ge<'a>(&'a self, txn: &mut Transaction<'a>, k: usize) -> TxResult<bool> {
        self.size_lt(txn, k).map(|lt| !lt)
    }

    /// `len() == k`.
    pub fn size_eq<'a>(&'a self, txn: &mut Transaction<'a>, k: usize) -> TxResult<bool> {
        txn.ensure_active()?;
        let info = self.size_info(txn)?;
        let outcome = info.current == k;
        self.narrow(txn, |p| p.observe_eq(info.original_bound(k), outcome))?;
        Ok(outcome)
    }

    /// `len() != k`.
    pub fn size_ne<'a>(&'a self, txn: &mut Transaction<'a>, k: usize) -> TxResult<bool> {
        self.size_eq(txn, k).map(|eq| !eq)
    }

    fn slot_word(&self, key: ItemKey) -> Option<&VersionWord> {
        match key.as_index() {
            0 => Some(&self.size_version),
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            k if k > 0 => Some(&self.slots[(k - 1) as usize].version),
            _ => None,
        }
    }
}

// ============================================================================
//  TObject
// ============================================================================

impl<T> TObject for TVector<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn lock(&self, item: &mut TransItem<'_>, ctx: &TxnCtx) -> bool {
        let spin = ctx.config().lock_spin_limit;
        if item.key() == SIZE_KEY {
            if !self.size_version.try_lock(spin) {
                return false;
            }
            self.size_owner.store(ctx.txn_id(), RELAXED);
            return true;
        }
        match self.slot_word(item.key()) {
            Some(word) => word.try_lock(spin),
            None => {
                // Appended slots are covered by the size lock, which sorts first.
                debug_assert_eq!(self.size_owner.load(RELAXED), ctx.txn_id());
                true
            }
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    fn check_predicate(&self, item: &mut TransItem<'_>, ctx: &TxnCtx) -> bool {
        let Some(pred) = item.predicate::<SizePredicate>().copied() else {
            return true;
        };
        let Some(info) = item.extra::<SizeInfo>().copied() else {
            return true;
        };

        let locked_here = item.is_locked_here();
        let (version, size) = if locked_here {
            (self.size_version.load(), self.size.load(RELAXED))
        } else {
            match self.snapshot_size(ctx.config().reader_spin_limit) {
                Some(snap) => snap,
                None => return false,
            }
        };
        if !pred.verify(size as i64) {
            trace_log!(size, lo = pred.lo(), hi = pred.hi(), "size predicate failed");
            return false;
        }
        if size as i64 + info.delta() > self.capacity() as i64 {
            return false;
        }
        if !locked_here {
            item.set_read(version);
        }
        true
    }

    fn check(&self, item: &TransItem<'_>, _ctx: &TxnCtx) -> bool {
        let Some(read) = item.read_version() else {
            return true;
        };
        let Some(word) = self.slot_word(item.key()) else {
            return true;
        };
        let now = word.load();
        read.matches(now) && (!now.is_locked() || item.is_locked_here())
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    fn install(&self, item: &mut TransItem<'_>, ctx: &TxnCtx) {
        let k = item.key().as_index();
        if k == 0 {
            let Some(info) = item.extra::<SizeInfo>().copied() else {
                return;
            };
            let physical = self.size.load(RELAXED);
            let target = physical as i64 + info.delta();
            debug_assert!((0..=self.capacity() as i64).contains(&target));
            self.original_size.store(physical, RELAXED);
            self.size.store(target as usize, WRITE_ORD);
            self.size_version.bump();
            trace_log!(from = physical, to = target, "vector resized");
            return;
        }

        let Some(value) = item.take_write::<T>() else {
            return;
        };
        let resized_here = self.size_owner.load(RELAXED) == ctx.txn_id();
        let index = if k > 0 {
            (k - 1) as usize
        } else {
            self.original_size.load(RELAXED) + (-k) as usize - 1
        };
        if resized_here && index >= self.size.load(RELAXED) {
            // Popped again before commit.
            return;
        }

        let slot = &self.slots[index];
        if k > 0 {
            Self::store_slot(slot, value, ctx);
        } else {
            slot.version.lock();
            Self::store_slot(slot, value, ctx);
            slot.version.unlock();
        }
    }

    fn unlock(&self, item: &mut TransItem<'_>) {
        if item.key() == SIZE_KEY {
            self.size_owner.store(0, RELAXED);
        }
        if let Some(word) = self.slot_word(item.key()) {
            word.unlock();
        }
    }

    fn name(&self) -> &'static str {
        "vector"
    }
}

impl<T> Drop for TVector<T> {
    fn drop(&mut self) {
        for slot in &mut *self.slots {
            // SAFETY: exclusive access; live values are owned by their slot.
            unsafe { reclaim::free_boxed(*slot.value.get_mut()) };
        }
    }
}

impl<T> fmt::Debug for TVector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TVector")
            .field("len", &self.size.load(RELAXED))
            .field("capacity", &self.slots.len())
            .finish_non_exhaustive()
    }
}
