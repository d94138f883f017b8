//! Filepath: src/hashtable.rs
//!
//! Versioned bucket-chained hash table.
//!
//! Each bucket carries a structural [`VersionWord`] that changes iff its chain
//! topology changes; each element carries a value [`VersionWord`] whose
//! `INSERTED` mark flags a tentative insert and whose `DELETED` mark flags a
//! committed delete awaiting unlink.
//!
//! # Reads
//! - Present key: the element's version is recorded.
//! - Absent key: the bucket's version is recorded, so any later insert into
//!   that bucket invalidates the absent read.
//!
//! # Writes
//! Inserting an absent key splices a tentative element under a short
//! bounded-spin bucket lock during execution; the element is promoted at
//! install or unlinked again by abort cleanup. Updates and deletes of existing
//! elements are buffered and applied at install; deleted elements are unlinked
//! in commit cleanup and retired through the transaction's guard.
//!
//! The table never rehashes; the bucket count is fixed at construction.

use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::AtomicPtr;

use seize::LocalGuard;

use crate::config::Config;
use crate::error::{AbortReason, TxResult};
use crate::ordering::{READ_ORD, RELAXED, WRITE_ORD};
use crate::reclaim;
use crate::tracing_helpers::trace_log;
use crate::txn::{ItemKey, TObject, TransItem, Transaction, TxnCtx, USER0_FLAG};
use crate::version::{Version, VersionWord, DELETED_BIT, INSERTED_BIT};

#[cfg(all(test, not(loom)))]
mod shuttle_tests;

/// Item inserted this element.
const INSERT_FLAG: u32 = USER0_FLAG;

/// Item deletes this element.
const DELETE_FLAG: u32 = USER0_FLAG << 1;

/// The recorded read only vouches for presence, not for the value.
const PRESENCE_FLAG: u32 = USER0_FLAG << 2;

// ============================================================================
//  Chain Nodes
// ============================================================================

struct Element<K, V> {
    key: K,
    /// Null while the element is a tentative insert.
    value: AtomicPtr<V>,
    version: VersionWord,
    next: AtomicPtr<Element<K, V>>,
}

impl<K, V> Drop for Element<K, V> {
    fn drop(&mut self) {
        // SAFETY: the element is being freed, so nobody can reach its value.
        unsafe { reclaim::free_boxed(*self.value.get_mut()) };
    }
}

struct BucketEntry<K, V> {
    version: VersionWord,
    head: AtomicPtr<Element<K, V>>,
}

impl<K, V> BucketEntry<K, V> {
    const fn new() -> Self {
        Self {
            version: VersionWord::new(),
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

/// Pending write on an element item.
enum HashWrite<V> {
    Put(V),
    Delete,
}

/// Shapes of transactional write.
enum WriteOp<V> {
    /// Only if absent.
    Insert(V),
    /// Upsert.
    Put(V),
    /// Only if present.
    Update(V),
    Delete,
}

// ============================================================================
//  HashTable
// ============================================================================

/// A transactional hash map with a fixed number of buckets.
///
/// Values are cloned out on read, so cheap-to-clone values (or `Arc`s) work
/// best.
pub struct HashTable<K, V, S = RandomState> {
    buckets: Box<[BucketEntry<K, V>]>,
    hasher: S,
    config: Config,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> HashTable<K, V, RandomState> {
    /// Create a table with [`Config::default_buckets`] buckets.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create a table with exactly `buckets` buckets (at least one).
    #[must_use]
    pub fn with_buckets(buckets: usize) -> Self {
        Self::with_config(Config::default().with_default_buckets(buckets))
    }

    /// Create a table sized and tuned by `config`.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        Self::with_config_and_hasher(config, RandomState::new())
    }
}

impl<K, V> Default for HashTable<K, V, RandomState> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> HashTable<K, V, S> {
    /// Create a table with a caller-provided hasher.
    #[must_use]
    pub fn with_config_and_hasher(config: Config, hasher: S) -> Self {
        let n = config.default_buckets.max(1);
        let buckets: Box<[BucketEntry<K, V>]> = (0..n).map(|_| BucketEntry::new()).collect();
        Self {
            buckets,
            hasher,
            config,
            _marker: PhantomData,
        }
    }

    /// Number of buckets.
    #[inline]
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

impl<K, V, S> HashTable<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Send + Sync + 'static,
{
    // ========================================================================
    //  Addressing
    // ========================================================================

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn bucket_index(&self, key: &K) -> usize {
        (self.hasher.hash_one(key) % self.buckets.len() as u64) as usize
    }

    #[inline]
    fn bucket_key(index: usize) -> ItemKey {
        ItemKey(((index as u64) << 1) | ItemKey::TAG)
    }

    #[inline]
    fn element_key(elem: *const Element<K, V>) -> ItemKey {
        ItemKey::from_ptr(elem)
    }

    /// Walk a chain. The guard keeps every element reachable during the walk
    /// from being freed.
    fn find(bucket: &BucketEntry<K, V>, key: &K, _guard: &LocalGuard<'_>) -> *mut Element<K, V> {
        let mut cur = bucket.head.load(READ_ORD);
        while !cur.is_null() {
            // SAFETY: reachable elements are retired, never freed, while a
            // guard is held.
            let e = unsafe { &*cur };
            if e.key == *key {
                return cur;
            }
            cur = e.next.load(READ_ORD);
        }
        ptr::null_mut()
    }

    /// Read `(version, value)` twice until both reads agree.
    ///
    /// Returns `None` if the element stayed locked for the whole spin.
    fn snapshot(e: &Element<K, V>, spin: u32) -> Option<(Version, Option<V>)> {
        loop {
            let before = e.version.stable(spin)?;
            let raw = e.value.load(READ_ORD);
            // SAFETY: values are retired, never freed, while a guard is held.
            let value = (!raw.is_null()).then(|| unsafe { (*raw).clone() });
            if e.version.load() == before {
                return Some((before, value));
            }
        }
    }

    // ========================================================================
    //  Non-transactional API
    // ========================================================================

    /// Lock-free point read of the committed value.
    ///
    /// Retries until it observes a `(version, value)` pair from a single
    /// instant.
    #[must_use]
    pub fn read(&self, key: &K) -> Option<V> {
        let guard = reclaim::enter();
        let bucket = &self.buckets[self.bucket_index(key)];
        let elem = Self::find(bucket, key, &guard);
        if elem.is_null() {
            return None;
        }
        // SAFETY: protected by `guard`.
        let e = unsafe { &*elem };
        loop {
            if let Some((version, value)) = Self::snapshot(e, self.config.reader_spin_limit) {
                if version.is_inserted() || version.is_deleted() {
                    return None;
                }
                return value;
            }
        }
    }

    /// Committed read that also reports the version it was read at.
    #[must_use]
    pub fn read_versioned(&self, key: &K) -> Option<(Version, V)> {
        let guard = reclaim::enter();
        let bucket = &self.buckets[self.bucket_index(key)];
        let elem = Self::find(bucket, key, &guard);
        if elem.is_null() {
            return None;
        }
        // SAFETY: protected by `guard`.
        let e = unsafe { &*elem };
        loop {
            if let Some((version, value)) = Self::snapshot(e, self.config.reader_spin_limit) {
                if version.is_inserted() || version.is_deleted() {
                    return None;
                }
                return value.map(|v| (version, v));
            }
        }
    }

    /// Write outside any transaction. Intended for setup and for tests; must
    /// not race with transactions touching the same key.
    pub fn nontrans_put(&self, key: K, value: V) {
        let guard = reclaim::enter();
        let bucket = &self.buckets[self.bucket_index(&key)];
        let lock = bucket.version.lock_guard();
        let elem = Self::find(bucket, &key, &guard);
        let boxed = Box::into_raw(Box::new(value));
        if elem.is_null() {
            let fresh = Box::into_raw(Box::new(Element {
                key,
                value: AtomicPtr::new(boxed),
                version: VersionWord::new(),
                next: AtomicPtr::new(bucket.head.load(RELAXED)),
            }));
            bucket.head.store(fresh, WRITE_ORD);
            lock.bump();
            return;
        }
        drop(lock);
        // SAFETY: protected by `guard`.
        let e = unsafe { &*elem };
        e.version.lock();
        let old = e.value.swap(boxed, WRITE_ORD);
        e.version.bump();
        e.version.unlock();
        // SAFETY: `old` is no longer reachable and was published exactly once.
        unsafe { reclaim::retire_boxed(&guard, old) };
    }

    /// Number of committed, live entries. Walks every chain.
    #[must_use]
    pub fn len(&self) -> usize {
        let guard = reclaim::enter();
        let mut n = 0;
        for bucket in &*self.buckets {
            let mut cur = bucket.head.load(READ_ORD);
            while !cur.is_null() {
                // SAFETY: protected by `guard`.
                let e = unsafe { &*cur };
                let v = e.version.load();
                if !v.is_inserted() && !v.is_deleted() {
                    n += 1;
                }
                cur = e.next.load(READ_ORD);
            }
        }
        drop(guard);
        n
    }

    /// True if [`HashTable::len`] is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========================================================================
    //  Transactional API
    // ========================================================================

    /// Transactional point read.
    pub fn get<'a>(&'a self, txn: &mut Transaction<'a>, key: &K) -> TxResult<Option<V>> {
        txn.ensure_active()?;
        let b = self.bucket_index(key);
        let bucket = &self.buckets[b];
        let bucket_version = bucket.version.load();
        let elem = Self::find(bucket, key, txn.guard());

        if elem.is_null() {
            txn.item(self, Self::bucket_key(b)).observe(bucket_version);
            return Ok(None);
        }

        let ekey = Self::element_key(elem);
        if let Some(item) = txn.peek_item(self, ekey) {
            if item.has_flag(DELETE_FLAG) {
                return Ok(None);
            }
            if let Some(HashWrite::Put(v)) = item.write_value::<HashWrite<V>>() {
                return Ok(Some(v.clone()));
            }
        }

        // SAFETY: protected by the transaction's guard.
        let e = unsafe { &*elem };
        let Some((version, value)) = Self::snapshot(e, txn.config().reader_spin_limit) else {
            return Err(txn.abort_with(AbortReason::LockTimeout));
        };
        if version.is_inserted() {
            return Err(txn.abort_with(AbortReason::DirtyRead));
        }
        if version.is_deleted() {
            return Err(txn.abort_with(AbortReason::ConcurrentDelete));
        }
        let item = txn.item(self, ekey);
        item.observe(version).clear_flags(PRESENCE_FLAG);
        Ok(value)
    }

    /// True if `key` is present.
    pub fn contains<'a>(&'a self, txn: &mut Transaction<'a>, key: &K) -> TxResult<bool> {
        self.get(txn, key).map(|v| v.is_some())
    }

    /// Number of entries for `key` (zero or one).
    pub fn count<'a>(&'a self, txn: &mut Transaction<'a>, key: &K) -> TxResult<usize> {
        self.contains(txn, key).map(usize::from)
    }

    /// Insert only if absent. Returns `true` if inserted.
    pub fn insert<'a>(&'a self, txn: &mut Transaction<'a>, key: K, value: V) -> TxResult<bool> {
        self.write_op(txn, key, WriteOp::Insert(value))
    }

    /// Insert or overwrite. Returns `true` if the key was absent.
    pub fn put<'a>(&'a self, txn: &mut Transaction<'a>, key: K, value: V) -> TxResult<bool> {
        self.write_op(txn, key, WriteOp::Put(value))
    }

    /// Overwrite only if present. Returns `true` if the key was present.
    pub fn update<'a>(&'a self, txn: &mut Transaction<'a>, key: K, value: V) -> TxResult<bool> {
        self.write_op(txn, key, WriteOp::Update(value))
    }

    /// Delete if present. Returns `true` if the key was present.
    pub fn delete<'a>(&'a self, txn: &mut Transaction<'a>, key: &K) -> TxResult<bool> {
        self.write_op(txn, key.clone(), WriteOp::Delete)
    }

    fn write_op<'a>(
        &'a self,
        txn: &mut Transaction<'a>,
        key: K,
        mut op: WriteOp<V>,
    ) -> TxResult<bool> {
        txn.ensure_active()?;
        let b = self.bucket_index(&key);
        let bucket = &self.buckets[b];
        let spin = txn.config().lock_spin_limit;

        loop {
            let bucket_version = bucket.version.load();
            let elem = Self::find(bucket, &key, txn.guard());
            if !elem.is_null() {
                return self.write_existing(txn, elem, op);
            }

            let (value, upsert) = match op {
                WriteOp::Update(_) | WriteOp::Delete => {
                    txn.item(self, Self::bucket_key(b)).observe(bucket_version);
                    return Ok(false);
                }
                WriteOp::Insert(v) => (v, false),
                WriteOp::Put(v) => (v, true),
            };

            let Some(lock) = bucket.version.try_lock_guard(spin) else {
                return Err(txn.abort_with(AbortReason::LockTimeout));
            };
            if !Self::find(bucket, &key, txn.guard()).is_null() {
                // Lost a race with another insert of the same key.
                drop(lock);
                op = if upsert {
                    WriteOp::Put(value)
                } else {
                    WriteOp::Insert(value)
                };
                continue;
            }

            let locked_at = lock.version();
            let fresh = Box::into_raw(Box::new(Element {
                key,
                value: AtomicPtr::new(ptr::null_mut()),
                version: VersionWord::with_marks(INSERTED_BIT),
                next: AtomicPtr::new(bucket.head.load(RELAXED)),
            }));
            bucket.head.store(fresh, WRITE_ORD);
            lock.bump();
            drop(lock);
            trace_log!(bucket = b, "spliced tentative element");

            // Our own splice must not invalidate our own earlier absent read.
            if let Some(bitem) = txn.find_item(self, Self::bucket_key(b)) {
                if bitem.read_version().is_some_and(|r| r.matches(locked_at)) {
                    bitem.set_read(locked_at.bumped());
                }
            }

            txn.item(self, Self::element_key(fresh))
                .add_write(HashWrite::Put(value))
                .add_flags(INSERT_FLAG);
            return Ok(true);
        }
    }

    fn write_existing<'a>(
        &'a self,
        txn: &mut Transaction<'a>,
        elem: *mut Element<K, V>,
        op: WriteOp<V>,
    ) -> TxResult<bool> {
        let ekey = Self::element_key(elem);

        let own_insert = txn.peek_item(self, ekey).is_some_and(|it| it.has_flag(INSERT_FLAG));
        if !own_insert {
            // SAFETY: protected by the transaction's guard.
            let e = unsafe { &*elem };
            let Some((version, _)) = Self::snapshot(e, txn.config().reader_spin_limit) else {
                return Err(txn.abort_with(AbortReason::LockTimeout));
            };
            if version.is_inserted() {
                return Err(txn.abort_with(AbortReason::DirtyRead));
            }
            if version.is_deleted() {
                return Err(txn.abort_with(AbortReason::ConcurrentDelete));
            }
            let item = txn.item(self, ekey);
            if !item.has_read() {
                item.observe(version).add_flags(PRESENCE_FLAG);
            }
        }

        let item = txn.item(self, ekey);
        let deleted_here = item.has_flag(DELETE_FLAG);
        let changed = match op {
            WriteOp::Insert(v) => {
                if deleted_here {
                    item.clear_flags(DELETE_FLAG).add_write(HashWrite::Put(v));
                }
                deleted_here
            }
            WriteOp::Put(v) => {
                item.clear_flags(DELETE_FLAG).add_write(HashWrite::Put(v));
                deleted_here
            }
            WriteOp::Update(v) => {
                if !deleted_here {
                    item.add_write(HashWrite::Put(v));
                }
                !deleted_here
            }
            WriteOp::Delete => {
                if !deleted_here {
                    item.add_flags(DELETE_FLAG).add_write(HashWrite::<V>::Delete);
                }
                !deleted_here
            }
        };
        Ok(changed)
    }

    /// Remove `elem` from its chain and retire it.
    fn unlink(&self, elem: *mut Element<K, V>, ctx: &TxnCtx) {
        // SAFETY: protected by the transaction's guard.
        let e = unsafe { &*elem };
        let bucket = &self.buckets[self.bucket_index(&e.key)];
        let lock = bucket.version.lock_guard();

        let mut link = &bucket.head;
        loop {
            let cur = link.load(RELAXED);
            if cur.is_null() {
                debug_assert!(false, "unlink: element not in its bucket");
                return;
            }
            if cur == elem {
                link.store(e.next.load(RELAXED), WRITE_ORD);
                lock.bump();
                break;
            }
            // SAFETY: chain is stable while the bucket lock is held.
            link = unsafe { &(*cur).next };
        }
        drop(lock);
        // SAFETY: unlinked above; each element is unlinked exactly once, by
        // the cleanup of the item that inserted or deleted it.
        unsafe { ctx.rcu_free(elem) };
    }
}

// ============================================================================
//  TObject
// ============================================================================

impl<K, V, S> TObject for HashTable<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Send + Sync + 'static,
{
    fn lock(&self, item: &mut TransItem<'_>, ctx: &TxnCtx) -> bool {
        debug_assert!(!item.key().is_tagged(), "bucket items never carry writes");
        // SAFETY: items pin their elements through the transaction's guard.
        let e = unsafe { &*item.key().as_ptr::<Element<K, V>>() };
        e.version.try_lock(ctx.config().lock_spin_limit)
    }

    fn check(&self, item: &TransItem<'_>, _ctx: &TxnCtx) -> bool {
        let Some(read) = item.read_version() else {
            return true;
        };
        if item.key().is_tagged() {
            #[allow(clippy::cast_possible_truncation)]
            let bucket = &self.buckets[(item.key().0 >> 1) as usize];
            let now = bucket.version.load();
            return !now.is_locked() && read.matches(now);
        }

        // SAFETY: items pin their elements through the transaction's guard.
        let e = unsafe { &*item.key().as_ptr::<Element<K, V>>() };
        let now = e.version.load();
        if now.is_locked() && !item.is_locked_here() {
            return false;
        }
        if now.is_deleted() || now.is_inserted() {
            return false;
        }
        item.has_flag(PRESENCE_FLAG) || read.same_counter(now)
    }

    fn install(&self, item: &mut TransItem<'_>, ctx: &TxnCtx) {
        // SAFETY: items pin their elements through the transaction's guard.
        let e = unsafe { &*item.key().as_ptr::<Element<K, V>>() };
        match item.take_write::<HashWrite<V>>() {
            Some(HashWrite::Put(v)) => {
                let old = e.value.swap(Box::into_raw(Box::new(v)), WRITE_ORD);
                // SAFETY: the old value is unreachable once swapped out.
                unsafe { ctx.rcu_free(old) };
                e.version.clear_marks(INSERTED_BIT);
            }
            Some(HashWrite::Delete) => {
                e.version.set_marks(DELETED_BIT);
                e.version.clear_marks(INSERTED_BIT);
            }
            None => {}
        }
        e.version.bump();
    }

    fn unlock(&self, item: &mut TransItem<'_>) {
        // SAFETY: items pin their elements through the transaction's guard.
        let e = unsafe { &*item.key().as_ptr::<Element<K, V>>() };
        e.version.unlock();
    }

    fn cleanup(&self, item: &mut TransItem<'_>, committed: bool, ctx: &TxnCtx) {
        if item.key().is_tagged() {
            return;
        }
        let elem = item.key().as_ptr::<Element<K, V>>();
        if committed && item.has_flag(DELETE_FLAG) {
            self.unlink(elem, ctx);
        } else if !committed && item.has_flag(INSERT_FLAG) {
            // SAFETY: our own tentative insert; still linked.
            let e = unsafe { &*elem };
            e.version.lock();
            e.version.set_marks(DELETED_BIT);
            e.version.bump();
            e.version.unlock();
            self.unlink(elem, ctx);
        }
    }

    fn name(&self) -> &'static str {
        "hashtable"
    }
}

impl<K, V, S> Drop for HashTable<K, V, S> {
    fn drop(&mut self) {
        for bucket in &mut *self.buckets {
            let mut cur = *bucket.head.get_mut();
            while !cur.is_null() {
                // SAFETY: exclusive access; every linked element is owned by
                // its chain and was never retired.
                let next = unsafe { *(*cur).next.get_mut() };
                unsafe { reclaim::free_boxed(cur) };
                cur = next;
            }
        }
    }
}

impl<K, V, S> fmt::Debug for HashTable<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashTable")
            .field("buckets", &self.buckets.len())
            .finish_non_exhaustive()
    }
}
