//! Filepath: src/tree.rs
//!
//! Versioned ordered map with phantom protection.
//!
//! [`VersionedTree`] is a red-black tree whose structure is guarded by one
//! tree-wide lock. Readers never take it: they descend lock-free and validate
//! the lock word as a seqlock afterwards.
//!
//! # Versions
//! - Each node's `version` guards its value and carries the `INSERTED` and
//!   `DELETED` marks.
//! - Each node's `node_version` changes when a committed insert attaches a
//!   child under it or when the node itself is unlinked. Absent reads record
//!   the node versions of the in-order neighbours bounding the gap.
//! - A tree-wide version stands in for the neighbours when the tree is empty.
//!
//! # Item keys
//! | Key | Guards |
//! |-----|--------|
//! | `0` | tree-wide version |
//! | node address | node `version` |
//! | node address with tag bit | node `node_version` |
//!
//! # Writes
//! An insert splices a node marked `INSERTED` under the structural lock
//! during execution and registers a write on its parent's node version (or
//! the tree version). An erase marks the node `DELETED` at once; the node is
//! unlinked at install and retired in commit cleanup. Abort clears the mark
//! or, for a node this transaction inserted, unlinks it.
//!
//! A transaction never attaches a node under another transaction's tentative
//! node: if that node were later rolled back, the bump meant for readers of
//! the surrounding gap would land on a node none of them recorded.

mod node;
mod rbtree;

use std::fmt;
use std::ptr;

use crate::config::Config;
use crate::error::{AbortReason, TxResult};
use crate::ordering::{READ_ORD, WRITE_ORD};
use crate::reclaim;
use crate::tracing_helpers::trace_log;
use crate::txn::{ItemKey, TObject, TransItem, Transaction, TxnCtx, USER0_FLAG};
use crate::version::{Version, VersionWord, DELETED_BIT, INSERTED_BIT};

use node::Node;
use rbtree::{Probe, RbTree, Slot};

/// Item inserted this node.
const INSERT_FLAG: u32 = USER0_FLAG;

/// Item erases this node.
const DELETE_FLAG: u32 = USER0_FLAG << 1;

/// The recorded read only vouches for presence, not for the value.
const PRESENCE_FLAG: u32 = USER0_FLAG << 2;

/// Item key of the tree-wide version.
const TREE_KEY: ItemKey = ItemKey(0);

/// Validation windows a transactional descent gets before aborting.
const PROBE_ATTEMPTS: u32 = 64;

/// Pending write on a node item.
enum TreeWrite<V> {
    /// Promote a tentative node; the value already lives in the node.
    Insert,
    Value(V),
    Delete,
}

/// Pending bump of a node version or the tree version.
struct Bump;

/// Shapes of transactional write.
enum WriteOp<V> {
    Insert(V),
    Put(V),
    Update(V),
    Delete,
}

/// What a transactional search found.
enum Lookup<K, V> {
    Node(*mut Node<K, V>),
    Absent(Gap<K, V>),
}

/// Evidence that a key was absent.
enum Gap<K, V> {
    Empty(Version),
    Between {
        pred: Option<(*mut Node<K, V>, Version)>,
        succ: Option<(*mut Node<K, V>, Version)>,
    },
}

// ============================================================================
//  VersionedTree
// ============================================================================

/// A transactional ordered map.
///
/// ```rust
/// use occtx::{Transaction, VersionedTree};
///
/// let tree: VersionedTree<u64, &str> = VersionedTree::new();
/// let mut txn = Transaction::new();
/// assert!(tree.insert(&mut txn, 2, "two").unwrap());
/// assert_eq!(tree.get(&mut txn, &2).unwrap(), Some("two"));
/// txn.try_commit().unwrap();
/// assert_eq!(tree.nontrans_get(&2), Some("two"));
/// ```
pub struct VersionedTree<K, V> {
    rb: RbTree<K, V>,
    tree_version: VersionWord,
    config: Config,
}

impl<K, V> VersionedTree<K, V> {
    /// Create an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create an empty tree tuned by `config`.
    #[must_use]
    pub const fn with_config(config: Config) -> Self {
        Self {
            rb: RbTree::new(),
            tree_version: VersionWord::new(),
            config,
        }
    }
}

impl<K, V> Default for VersionedTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> VersionedTree<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    #[inline]
    fn node_key(n: *const Node<K, V>) -> ItemKey {
        ItemKey::from_ptr(n)
    }

    #[inline]
    fn nv_key(n: *const Node<K, V>) -> ItemKey {
        ItemKey::tagged(n)
    }

    /// Lock-free search validated against the structural word.
    ///
    /// Returns `None` if no attempt saw a quiescent structure.
    fn probe(&self, key: &K, attempts: u32) -> Option<Lookup<K, V>> {
        let structure = self.rb.structure();
        for _ in 0..attempts {
            let Some(start) = structure.stable(self.config.reader_spin_limit) else {
                continue;
            };
            let tree_version = self.tree_version.load();
            let Some(probe) = self.rb.descend(key) else {
                continue;
            };
            if structure.load() != start {
                continue;
            }
            return Some(match probe {
                Probe::Found(n) => Lookup::Node(n),
                Probe::Gap { pred, succ } => Lookup::Absent(Gap::Between { pred, succ }),
                Probe::Empty => Lookup::Absent(Gap::Empty(tree_version)),
            });
        }
        None
    }

    /// Read `(version, value)` twice until both reads agree.
    fn snapshot(n: &Node<K, V>, spin: u32) -> Option<(Version, V)> {
        loop {
            let before = n.version.stable(spin)?;
            let raw = n.value.load(READ_ORD);
            // SAFETY: a node's value is never null and replaced values are
            // retired, never freed, while a guard is held.
            let value = unsafe { (*raw).clone() };
            if n.version.load() == before {
                return Some((before, value));
            }
        }
    }

    // ========================================================================
    //  Non-transactional API
    // ========================================================================

    /// Lock-free point read of the committed value.
    #[must_use]
    pub fn nontrans_get(&self, key: &K) -> Option<V> {
        let _guard = reclaim::enter();
        let mut tombstone = ptr::null_mut();
        loop {
            let Some(lookup) = self.probe(key, PROBE_ATTEMPTS) else {
                continue;
            };
            let Lookup::Node(p) = lookup else {
                return None;
            };
            // SAFETY: protected by `_guard`.
            let n = unsafe { &*p };
            let Some((version, value)) = Self::snapshot(n, self.config.reader_spin_limit) else {
                continue;
            };
            if version.is_inserted() {
                return None;
            }
            if !version.is_deleted() || p == tombstone {
                return Some(value);
            }
            // Committed erases unlink before unlocking; a marked node that
            // is still reachable is only tentatively erased.
            tombstone = p;
        }
    }

    /// Insert if absent, outside any transaction. Returns `true` if
    /// inserted. Intended for setup; must not race with transactions
    /// touching the same key.
    pub fn nontrans_insert(&self, key: K, value: V) -> bool {
        let _guard = reclaim::enter();
        let held = self.rb.structure().lock_guard();
        let Slot::Vacant { parent, left } = self.rb.locate(&held, &key) else {
            return false;
        };
        let fresh = Box::into_raw(Box::new(Node::new(key, value, 0)));
        self.rb.attach_at(&held, fresh, parent, left);
        held.bump();
        drop(held);
        self.bump_gap_owner(parent);
        true
    }

    /// Remove outside any transaction, returning the removed value.
    pub fn nontrans_remove(&self, key: &K) -> Option<V> {
        let guard = reclaim::enter();
        let held = self.rb.structure().lock_guard();
        let Slot::Occupied(p) = self.rb.locate(&held, key) else {
            return None;
        };
        self.rb.detach(&held, p);
        held.bump();
        drop(held);

        // SAFETY: unlinked above; protected by `guard` until retired.
        let n = unsafe { &*p };
        n.node_version.lock();
        n.node_version.bump();
        n.node_version.unlock();
        n.version.lock();
        n.version.set_marks(DELETED_BIT);
        n.version.bump();
        n.version.unlock();
        // SAFETY: the value pointer is never null.
        let value = unsafe { (*n.value.load(READ_ORD)).clone() };
        // SAFETY: unlinked and retired exactly once.
        unsafe { reclaim::retire_boxed(&guard, p) };
        Some(value)
    }

    /// Number of committed entries. Takes the structural lock.
    #[must_use]
    pub fn len(&self) -> usize {
        let held = self.rb.structure().lock_guard();
        let mut n = 0;
        self.rb.for_each(&held, |node| {
            if !node.version.load().is_inserted() {
                n += 1;
            }
        });
        n
    }

    /// True if [`VersionedTree::len`] is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Committed entries in key order. Takes the structural lock.
    #[must_use]
    pub fn entries(&self) -> Vec<(K, V)> {
        let _guard = reclaim::enter();
        let held = self.rb.structure().lock_guard();
        let mut out = Vec::new();
        self.rb.for_each(&held, |node| {
            if !node.version.load().is_inserted() {
                // SAFETY: the value pointer is never null; a value swapped
                // out by a concurrent install is retired, not freed, while
                // `_guard` is held.
                let value = unsafe { (*node.value.load(READ_ORD)).clone() };
                out.push((node.key.clone(), value));
            }
        });
        out
    }

    /// Check ordering, parent links and red-black balance.
    ///
    /// Returns the number of linked nodes, tentative ones included.
    ///
    /// # Errors
    /// A description of the first violated invariant.
    pub fn validate(&self) -> Result<usize, String> {
        let held = self.rb.structure().lock_guard();
        self.rb.validate(&held)
    }

    /// Bump whatever guards the gap a new child of `parent` fell into.
    fn bump_gap_owner(&self, parent: *mut Node<K, V>) {
        let word = if parent.is_null() {
            &self.tree_version
        } else {
            // SAFETY: the caller holds a guard; the parent was linked when
            // the child was attached.
            unsafe { &(*parent).node_version }
        };
        word.lock();
        word.bump();
        word.unlock();
    }

    // ========================================================================
    //  Transactional API
    // ========================================================================

    /// Search, aborting on another transaction's tentative insert.
    fn find_or_abort<'a>(&'a self, txn: &mut Transaction<'a>, key: &K) -> TxResult<Lookup<K, V>> {
        let Some(lookup) = self.probe(key, PROBE_ATTEMPTS) else {
            return Err(txn.abort_with(AbortReason::LockTimeout));
        };
        if let Lookup::Node(n) = lookup {
            // SAFETY: protected by the transaction's guard.
            let version = unsafe { &*n }.version.load();
            if version.is_inserted() && !self.own_insert(txn, n) {
                return Err(txn.abort_with(AbortReason::DirtyRead));
            }
        }
        Ok(lookup)
    }

    fn own_insert<'a>(&'a self, txn: &Transaction<'a>, n: *const Node<K, V>) -> bool {
        txn.peek_item(self, Self::node_key(n))
            .is_some_and(|it| it.has_flag(INSERT_FLAG))
    }

    /// Record the absence evidence.
    fn observe_gap<'a>(&'a self, txn: &mut Transaction<'a>, gap: &Gap<K, V>) {
        match *gap {
            Gap::Empty(version) => {
                txn.item(self, TREE_KEY).observe(version);
            }
            Gap::Between { pred, succ } => {
                for (n, nv) in [pred, succ].into_iter().flatten() {
                    txn.item(self, Self::nv_key(n)).observe(nv);
                }
            }
        }
    }

    /// Transactional point read.
    pub fn get<'a>(&'a self, txn: &mut Transaction<'a>, key: &K) -> TxResult<Option<V>> {
        txn.ensure_active()?;
        match self.find_or_abort(txn, key)? {
            Lookup::Absent(gap) => {
                self.observe_gap(txn, &gap);
                Ok(None)
            }
            Lookup::Node(n) => self.read_node(txn, n),
        }
    }

    fn read_node<'a>(&'a self, txn: &mut Transaction<'a>, n: *mut Node<K, V>) -> TxResult<Option<V>> {
        let nkey = Self::node_key(n);
        // SAFETY: protected by the transaction's guard.
        let node = unsafe { &*n };
        if let Some(item) = txn.peek_item(self, nkey) {
            if item.has_flag(DELETE_FLAG) {
                return Ok(None);
            }
            if item.has_flag(INSERT_FLAG) {
                // SAFETY: our own node; the value pointer is never null.
                return Ok(Some(unsafe { (*node.value.load(READ_ORD)).clone() }));
            }
            if let Some(TreeWrite::Value(v)) = item.write_value::<TreeWrite<V>>() {
                return Ok(Some(v.clone()));
            }
        }

        let Some((version, value)) = Self::snapshot(node, txn.config().reader_spin_limit) else {
            return Err(txn.abort_with(AbortReason::LockTimeout));
        };
        if version.is_inserted() {
            return Err(txn.abort_with(AbortReason::DirtyRead));
        }
        // A foreign tentative delete is readable: validation fails if it
        // commits and passes if it rolls back.
        txn.item(self, nkey).observe(version).clear_flags(PRESENCE_FLAG);
        Ok(Some(value))
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

    /// Erase if present. Returns `true` if the key was present.
    pub fn erase<'a>(&'a self, txn: &mut Transaction<'a>, key: &K) -> TxResult<bool> {
        self.write_op(txn, key.clone(), WriteOp::Delete)
    }

    fn write_op<'a>(&'a self, txn: &mut Transaction<'a>, key: K, mut op: WriteOp<V>) -> TxResult<bool> {
        txn.ensure_active()?;
        let spin = txn.config().lock_spin_limit;

        loop {
            let gap = match self.find_or_abort(txn, &key)? {
                Lookup::Node(n) => return self.write_existing(txn, n, op),
                Lookup::Absent(gap) => gap,
            };

            let (value, upsert) = match op {
                WriteOp::Update(_) | WriteOp::Delete => {
                    self.observe_gap(txn, &gap);
                    return Ok(false);
                }
                WriteOp::Insert(v) => (v, false),
                WriteOp::Put(v) => (v, true),
            };

            let Some(held) = self.rb.structure().try_lock_guard(spin) else {
                return Err(txn.abort_with(AbortReason::LockTimeout));
            };
            let (parent, left) = match self.rb.locate(&held, &key) {
                Slot::Vacant { parent, left } => (parent, left),
                Slot::Occupied(_) => {
                    // Lost a race with another insert of the same key.
                    drop(held);
                    op = if upsert {
                        WriteOp::Put(value)
                    } else {
                        WriteOp::Insert(value)
                    };
                    continue;
                }
            };
            if !parent.is_null() {
                // SAFETY: linked; structure frozen by `held`.
                let pv = unsafe { &*parent }.version.load();
                if pv.is_inserted() && !self.own_insert(txn, parent) {
                    drop(held);
                    return Err(txn.abort_with(AbortReason::DirtyRead));
                }
            }

            let fresh = Box::into_raw(Box::new(Node::new(key, value, INSERTED_BIT)));
            self.rb.attach_at(&held, fresh, parent, left);
            held.bump();
            drop(held);
            trace_log!(parent_is_root_slot = parent.is_null(), "spliced tentative node");

            let gap_key = if parent.is_null() {
                TREE_KEY
            } else {
                Self::nv_key(parent)
            };
            txn.item(self, gap_key).add_write(Bump);
            txn.item(self, Self::node_key(fresh))
                .add_write(TreeWrite::<V>::Insert)
                .add_flags(INSERT_FLAG);
            return Ok(true);
        }
    }

    fn write_existing<'a>(
        &'a self,
        txn: &mut Transaction<'a>,
        n: *mut Node<K, V>,
        op: WriteOp<V>,
    ) -> TxResult<bool> {
        let nkey = Self::node_key(n);
        // SAFETY: protected by the transaction's guard.
        let node = unsafe { &*n };
        let own = self.own_insert(txn, n);
        let deleted_here = txn.peek_item(self, nkey).is_some_and(|it| it.has_flag(DELETE_FLAG));

        if !own && !deleted_here {
            let Some((version, _)) = Self::snapshot(node, txn.config().reader_spin_limit) else {
                return Err(txn.abort_with(AbortReason::LockTimeout));
            };
            if version.is_inserted() {
                return Err(txn.abort_with(AbortReason::DirtyRead));
            }
            let item = txn.item(self, nkey);
            if !item.has_read() {
                item.observe(version).add_flags(PRESENCE_FLAG);
            }
        }

        match op {
            WriteOp::Insert(v) | WriteOp::Put(v) if deleted_here => {
                self.revive(txn, n, v);
                Ok(true)
            }
            WriteOp::Insert(_) => Ok(false),
            WriteOp::Put(v) => {
                self.overwrite(txn, n, v, own);
                Ok(false)
            }
            WriteOp::Update(_) if deleted_here => Ok(false),
            WriteOp::Update(v) => {
                self.overwrite(txn, n, v, own);
                Ok(true)
            }
            WriteOp::Delete if deleted_here => Ok(false),
            WriteOp::Delete => {
                if !own {
                    let Some(before) = node.version.try_mark(DELETED_BIT) else {
                        let reason = if node.version.is_locked() {
                            AbortReason::LockTimeout
                        } else {
                            AbortReason::ConcurrentDelete
                        };
                        return Err(txn.abort_with(reason));
                    };
                    txn.item(self, nkey).observe(before);
                }
                txn.item(self, nkey)
                    .add_flags(DELETE_FLAG)
                    .add_write(TreeWrite::<V>::Delete);
                txn.item(self, Self::nv_key(n)).add_write(Bump);
                Ok(true)
            }
        }
    }

    /// New value for a present node: in place for our own insert, buffered
    /// otherwise.
    fn overwrite<'a>(&'a self, txn: &mut Transaction<'a>, n: *mut Node<K, V>, value: V, own: bool) {
        if own {
            // SAFETY: our own tentative node; protected by the guard.
            let old = unsafe { &*n }.value.swap(Box::into_raw(Box::new(value)), WRITE_ORD);
            // SAFETY: swapped out; readers that loaded it hold guards.
            unsafe { txn.ctx().rcu_free(old) };
        } else {
            txn.item(self, Self::node_key(n)).add_write(TreeWrite::Value(value));
        }
    }

    /// Undo our own erase of `n` and give it `value`.
    fn revive<'a>(&'a self, txn: &mut Transaction<'a>, n: *mut Node<K, V>, value: V) {
        let own = self.own_insert(txn, n);
        let item = txn.item(self, Self::node_key(n));
        item.clear_flags(DELETE_FLAG);
        if own {
            item.add_write(TreeWrite::<V>::Insert);
            self.overwrite(txn, n, value, true);
        } else {
            item.add_write(TreeWrite::Value(value));
            // SAFETY: protected by the transaction's guard; the mark is ours.
            unsafe { (*n).version.clear_marks(DELETED_BIT) };
        }
    }

    /// Roll back our own tentative node.
    fn unlink_tentative(&self, n: *mut Node<K, V>, ctx: &TxnCtx) {
        // SAFETY: our own node, still linked; protected by the guard.
        let node = unsafe { &*n };
        node.node_version.lock();
        node.node_version.bump();
        node.node_version.unlock();
        node.version.lock();
        node.version.set_marks(DELETED_BIT);
        node.version.bump();
        node.version.unlock();

        let held = self.rb.structure().lock_guard();
        self.rb.detach(&held, n);
        held.bump();
        drop(held);
        trace_log!("unlinked tentative node");
        // SAFETY: unlinked above, retired once by the item that inserted it.
        unsafe { ctx.rcu_free(n) };
    }
}

// ============================================================================
//  TObject
// ============================================================================

impl<K, V> TObject for VersionedTree<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn lock(&self, item: &mut TransItem<'_>, ctx: &TxnCtx) -> bool {
        self.word_for(item.key()).try_lock(ctx.config().lock_spin_limit)
    }

    fn check(&self, item: &TransItem<'_>, _ctx: &TxnCtx) -> bool {
        let Some(read) = item.read_version() else {
            return true;
        };
        let key = item.key();
        if key == TREE_KEY || key.is_tagged() {
            let now = self.word_for(key).load();
            return read.matches(now) && (!now.is_locked() || item.is_locked_here());
        }

        // SAFETY: items pin their nodes through the transaction's guard.
        let now = unsafe { &*key.as_ptr::<Node<K, V>>() }.version.load();
        if now.is_locked() && !item.is_locked_here() {
            return false;
        }
        if now.is_deleted() && !item.has_flag(DELETE_FLAG) {
            return false;
        }
        if now.is_inserted() && !item.has_flag(INSERT_FLAG) {
            return false;
        }
        item.has_flag(PRESENCE_FLAG) || read.same_counter(now)
    }

    fn install(&self, item: &mut TransItem<'_>, ctx: &TxnCtx) {
        let key = item.key();
        if key == TREE_KEY || key.is_tagged() {
            self.word_for(key).bump();
            return;
        }

        let n = key.as_ptr::<Node<K, V>>();
        // SAFETY: items pin their nodes through the transaction's guard.
        let node = unsafe { &*n };
        match item.take_write::<TreeWrite<V>>() {
            Some(TreeWrite::Insert) => node.version.clear_marks(INSERTED_BIT),
            Some(TreeWrite::Value(v)) => {
                let old = node.value.swap(Box::into_raw(Box::new(v)), WRITE_ORD);
                // SAFETY: the old value is unreachable once swapped out.
                unsafe { ctx.rcu_free(old) };
            }
            Some(TreeWrite::Delete) => {
                let held = self.rb.structure().lock_guard();
                self.rb.detach(&held, n);
                held.bump();
                drop(held);
                node.version.set_marks(DELETED_BIT);
                node.version.clear_marks(INSERTED_BIT);
                trace_log!(tid = ctx.commit_tid(), "unlinked erased node");
            }
            None => {}
        }
        node.version.bump();
    }

    fn unlock(&self, item: &mut TransItem<'_>) {
        self.word_for(item.key()).unlock();
    }

    fn cleanup(&self, item: &mut TransItem<'_>, committed: bool, ctx: &TxnCtx) {
        let key = item.key();
        if key == TREE_KEY || key.is_tagged() {
            return;
        }
        let n = key.as_ptr::<Node<K, V>>();
        if committed {
            if item.has_flag(DELETE_FLAG) {
                // SAFETY: unlinked at install; retired once, here.
                unsafe { ctx.rcu_free(n) };
            }
        } else if item.has_flag(INSERT_FLAG) {
            self.unlink_tentative(n, ctx);
        } else if item.has_flag(DELETE_FLAG) {
            // SAFETY: protected by the guard; the mark is ours.
            unsafe { (*n).version.clear_marks(DELETED_BIT) };
        }
    }

    fn name(&self) -> &'static str {
        "tree"
    }
}

impl<K, V> VersionedTree<K, V> {
    /// The version word an item key refers to.
    fn word_for(&self, key: ItemKey) -> &VersionWord {
        if key == TREE_KEY {
            return &self.tree_version;
        }
        // SAFETY: items pin their nodes through the transaction's guard.
        let node = unsafe { &*key.as_ptr::<Node<K, V>>() };
        if key.is_tagged() {
            &node.node_version
        } else {
            &node.version
        }
    }
}

impl<K, V> fmt::Debug for VersionedTree<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedTree")
            .field("tree_version", &self.tree_version.load())
            .finish_non_exhaustive()
    }
}
