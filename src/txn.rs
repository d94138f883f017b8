//! Filepath: src/txn.rs
//!
//! Transaction coordinator.
//!
//! A [`Transaction`] records every access a structure makes on its behalf as a
//! [`TransItem`] and, at commit, drives the owners of those items through the
//! [`TObject`] contract in a fixed order:
//!
//! 1. `lock` every item with a pending write, sorted by `(owner, key)`
//! 2. `check_predicate` every item carrying a predicate
//! 3. allocate the commit tid
//! 4. `check` every item carrying a read
//! 5. `install` every item with a pending write, in lock order
//! 6. `unlock` everything locked
//! 7. `cleanup(true)` in reverse registration order
//!
//! Any failure before step 5 unlocks what was locked and runs
//! `cleanup(false)` in reverse registration order. Dropping a transaction that
//! neither committed nor aborted aborts it.
//!
//! # Example
//!
//! ```rust
//! use occtx::{Config, HashTable, Transaction};
//!
//! let table: HashTable<u64, u64> = HashTable::new();
//! let config = Config::default();
//!
//! Transaction::run(&config, |txn| {
//!     let seen = table.get(txn, &1)?;
//!     table.put(txn, 1, seen.unwrap_or(0) + 1)
//! })
//! .unwrap();
//!
//! assert_eq!(table.read(&1), Some(1));
//! ```

mod item;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::AtomicU64;

use seize::LocalGuard;

pub use item::{ItemKey, TransItem, USER0_FLAG};

use crate::config::Config;
use crate::error::{AbortReason, TxResult, TxnError};
use crate::ordering::TID_ORD;
use crate::reclaim;
use crate::tracing_helpers::{debug_log, trace_log, warn_log};

/// Source of commit timestamps.
static GLOBAL_TID: AtomicU64 = AtomicU64::new(0);

/// Source of transaction identities.
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
//  TObject
// ============================================================================

/// The contract a structure exposes to the coordinator.
///
/// `lock`, `check` and `install` are only called for items this object
/// registered. `unlock` is only called for items whose lock is held.
pub trait TObject: Send + Sync {
    /// Take the lock implied by `item`. Must not block indefinitely.
    fn lock(&self, item: &mut TransItem<'_>, ctx: &TxnCtx) -> bool;

    /// Re-evaluate the item's predicate against current state.
    ///
    /// May record additional reads on `item`; those are validated by the
    /// following `check` pass.
    fn check_predicate(&self, item: &mut TransItem<'_>, ctx: &TxnCtx) -> bool {
        let _ = (item, ctx);
        true
    }

    /// Revalidate the item's recorded read.
    fn check(&self, item: &TransItem<'_>, ctx: &TxnCtx) -> bool;

    /// Apply the pending write. Called with the item's lock held.
    fn install(&self, item: &mut TransItem<'_>, ctx: &TxnCtx);

    /// Release the lock taken by `lock`.
    fn unlock(&self, item: &mut TransItem<'_>);

    /// Undo tentative changes (`committed == false`) or finish deferred work
    /// such as unlinking deleted entries (`committed == true`).
    fn cleanup(&self, item: &mut TransItem<'_>, committed: bool, ctx: &TxnCtx) {
        let _ = (item, committed, ctx);
    }

    /// Short name used in diagnostics.
    fn name(&self) -> &'static str {
        "tobject"
    }
}

// ============================================================================
//  TxnCtx
// ============================================================================

/// The parts of a transaction owners may see while the item set is borrowed.
pub struct TxnCtx {
    id: u64,
    commit_tid: u64,
    config: Config,
    guard: LocalGuard<'static>,
}

impl TxnCtx {
    /// Unique, nonzero identity of the transaction.
    #[inline]
    #[must_use]
    pub const fn txn_id(&self) -> u64 {
        self.id
    }

    /// Commit timestamp; zero until the commit tid has been allocated.
    #[inline]
    #[must_use]
    pub const fn commit_tid(&self) -> u64 {
        self.commit_tid
    }

    /// Configuration the transaction runs with.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Reclamation guard held for the transaction's whole lifetime.
    #[inline]
    #[must_use]
    pub const fn guard(&self) -> &LocalGuard<'static> {
        &self.guard
    }

    /// Retire an unlinked allocation through this transaction's guard.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `Box::into_raw`, must be unreachable for new
    /// traversals and must not be retired twice.
    pub unsafe fn rcu_free<T: Send>(&self, ptr: *mut T) {
        // SAFETY: forwarded from the caller.
        unsafe { reclaim::retire_boxed(&self.guard, ptr) };
    }
}

impl fmt::Debug for TxnCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxnCtx")
            .field("id", &self.id)
            .field("commit_tid", &self.commit_tid)
            .finish_non_exhaustive()
    }
}

// ============================================================================
//  Transaction
// ============================================================================

/// Lifecycle of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Accepting operations.
    Active,
    /// Committed with the given tid.
    Committed(u64),
    /// Aborted; all tentative changes are (or will be, on finish) undone.
    Aborted(AbortReason),
}

/// A per-thread optimistic transaction.
///
/// `Transaction` holds a reclamation guard and is therefore neither `Send`
/// nor `Sync`.
pub struct Transaction<'a> {
    items: Vec<TransItem<'a>>,
    index: HashMap<(usize, u64), usize>,
    state: TxnState,
    finished: bool,
    ctx: TxnCtx,
}

impl Default for Transaction<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.ctx.id)
            .field("state", &self.state)
            .field("items", &self.items.len())
            .finish()
    }
}

impl<'a> Transaction<'a> {
    /// Begin a transaction with [`Config::default`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Begin a transaction with the given configuration.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        let id = NEXT_TXN_ID.fetch_add(1, TID_ORD);
        Self {
            items: Vec::new(),
            index: HashMap::new(),
            state: TxnState::Active,
            finished: false,
            ctx: TxnCtx {
                id,
                commit_tid: 0,
                config,
                guard: reclaim::enter(),
            },
        }
    }

    /// Run `body` in a fresh transaction and commit, retrying on abort.
    ///
    /// Non-abort errors returned by `body` abort the attempt and are returned
    /// unchanged. After [`Config::max_retries`] aborted attempts the result is
    /// [`TxnError::RetryLimit`].
    pub fn run<T, F>(config: &Config, mut body: F) -> TxResult<T>
    where
        F: FnMut(&mut Transaction<'a>) -> TxResult<T>,
    {
        let attempts = config.max_retries.max(1);
        for attempt in 0..attempts {
            let mut txn = Transaction::with_config(config.clone());
            let outcome = body(&mut txn).and_then(|value| txn.try_commit().map(|_| value));
            match outcome {
                Ok(value) => return Ok(value),
                Err(TxnError::Aborted(_reason)) => {
                    trace_log!(attempt, reason = %_reason, "retrying transaction");
                    backoff(attempt);
                }
                Err(other) => return Err(other),
            }
        }
        warn_log!(attempts, "transaction retry budget exhausted");
        Err(TxnError::RetryLimit(attempts))
    }

    // ========================================================================
    //  Accessors
    // ========================================================================

    /// Unique identity of this transaction.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.ctx.id
    }

    /// Current lifecycle state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> TxnState {
        self.state
    }

    /// Still accepting operations?
    #[inline]
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.state, TxnState::Active)
    }

    /// Configuration the transaction runs with.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.ctx.config
    }

    /// Context shared with owners.
    #[inline]
    #[must_use]
    pub const fn ctx(&self) -> &TxnCtx {
        &self.ctx
    }

    /// Reclamation guard protecting everything this transaction loads.
    #[inline]
    #[must_use]
    pub const fn guard(&self) -> &LocalGuard<'static> {
        &self.ctx.guard
    }

    /// Commit timestamp; zero unless committed.
    #[inline]
    #[must_use]
    pub const fn commit_tid(&self) -> u64 {
        self.ctx.commit_tid
    }

    /// Number of items recorded so far.
    #[inline]
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Fail with [`AbortReason::AlreadyAborted`] unless active.
    ///
    /// Every structure operation calls this first.
    pub fn ensure_active(&self) -> TxResult<()> {
        match self.state {
            TxnState::Active => Ok(()),
            _ => Err(TxnError::Aborted(AbortReason::AlreadyAborted)),
        }
    }

    // ========================================================================
    //  Items
    // ========================================================================

    /// Find or create the item for `(owner, key)`.
    pub fn item(&mut self, owner: &'a dyn TObject, key: ItemKey) -> &mut TransItem<'a> {
        let slot = *self
            .index
            .entry((item::owner_addr(owner), key.0))
            .or_insert_with(|| {
                self.items.push(TransItem::new(owner, key));
                self.items.len() - 1
            });
        &mut self.items[slot]
    }

    /// Find or create an item, also handing out the context.
    pub fn item_with_ctx(
        &mut self,
        owner: &'a dyn TObject,
        key: ItemKey,
    ) -> (&mut TransItem<'a>, &TxnCtx) {
        let slot = *self
            .index
            .entry((item::owner_addr(owner), key.0))
            .or_insert_with(|| {
                self.items.push(TransItem::new(owner, key));
                self.items.len() - 1
            });
        (&mut self.items[slot], &self.ctx)
    }

    /// The item for `(owner, key)` if one was recorded.
    pub fn find_item(&mut self, owner: &'a dyn TObject, key: ItemKey) -> Option<&mut TransItem<'a>> {
        let slot = *self.index.get(&(item::owner_addr(owner), key.0))?;
        Some(&mut self.items[slot])
    }

    /// Was an item for `(owner, key)` recorded?
    #[must_use]
    pub fn has_item(&self, owner: &'a dyn TObject, key: ItemKey) -> bool {
        self.index.contains_key(&(item::owner_addr(owner), key.0))
    }

    /// Read-only view of an item.
    #[must_use]
    pub fn peek_item(&self, owner: &'a dyn TObject, key: ItemKey) -> Option<&TransItem<'a>> {
        let slot = *self.index.get(&(item::owner_addr(owner), key.0))?;
        Some(&self.items[slot])
    }

    // ========================================================================
    //  Abort
    // ========================================================================

    /// Mark the transaction aborted and return the error to propagate.
    ///
    /// Tentative changes are undone when the transaction is finished
    /// ([`Transaction::abort`], [`Transaction::try_commit`] or drop).
    pub fn abort_with(&mut self, reason: AbortReason) -> TxnError {
        if self.is_active() {
            debug_log!(txn = self.ctx.id, %reason, "transaction aborted");
            self.state = TxnState::Aborted(reason);
        }
        TxnError::Aborted(reason)
    }

    /// Abort explicitly and undo all tentative changes.
    pub fn abort(mut self) {
        if self.is_active() {
            self.state = TxnState::Aborted(AbortReason::Explicit);
        }
        self.finish_abort();
    }

    // ========================================================================
    //  Commit
    // ========================================================================

    /// Validate and commit. Returns the commit tid.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all, fields(txn = self.ctx.id)))]
    pub fn try_commit(mut self) -> Result<u64, TxnError> {
        if let TxnState::Aborted(reason) = self.state {
            self.finish_abort();
            return Err(TxnError::Aborted(reason));
        }

        match self.commit_phases() {
            Ok(tid) => {
                trace_log!(txn = self.ctx.id, tid, items = self.items.len(), "committed");
                Ok(tid)
            }
            Err(reason) => {
                let err = self.abort_with(reason);
                self.finish_abort();
                Err(err)
            }
        }
    }

    fn commit_phases(&mut self) -> Result<u64, AbortReason> {
        let Self {
            items, ctx, state, finished, ..
        } = self;

        // Phase 1: lock writes in a global order.
        let mut order: Vec<usize> = (0..items.len()).filter(|&i| items[i].has_write()).collect();
        order.sort_unstable_by_key(|&i| (items[i].owner_addr(), items[i].key().0));
        for &i in &order {
            let it = &mut items[i];
            if it.is_locked_here() {
                continue;
            }
            let owner = it.owner();
            if !owner.lock(it, ctx) {
                trace_log!(owner = owner.name(), key = ?it.key(), "lock failed");
                return Err(AbortReason::LockTimeout);
            }
            it.set_locked_here();
        }

        // Phase 2: predicates.
        for it in items.iter_mut().filter(|it| it.has_predicate()) {
            let owner = it.owner();
            if !owner.check_predicate(it, ctx) {
                return Err(AbortReason::PredicateContradiction);
            }
        }

        // Phase 3: commit tid.
        ctx.commit_tid = GLOBAL_TID.fetch_add(1, TID_ORD) + 1;

        // Phase 4: reads.
        for it in items.iter().filter(|it| it.has_read()) {
            if !it.owner().check(it, ctx) {
                trace_log!(owner = it.owner().name(), key = ?it.key(), "check failed");
                return Err(AbortReason::ValidationFailed);
            }
        }

        // Phase 5: install.
        for &i in &order {
            let it = &mut items[i];
            let owner = it.owner();
            owner.install(it, ctx);
        }

        // Phase 6 and 7.
        unlock_all(items);
        for it in items.iter_mut().rev() {
            let owner = it.owner();
            owner.cleanup(it, true, ctx);
        }

        *state = TxnState::Committed(ctx.commit_tid);
        *finished = true;
        Ok(ctx.commit_tid)
    }

    fn finish_abort(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let Self { items, ctx, .. } = self;
        unlock_all(items);
        for it in items.iter_mut().rev() {
            let owner = it.owner();
            owner.cleanup(it, false, ctx);
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if self.is_active() {
                self.state = TxnState::Aborted(AbortReason::Explicit);
            }
            self.finish_abort();
        }
    }
}

fn unlock_all(items: &mut [TransItem<'_>]) {
    for it in items.iter_mut().filter(|it| it.is_locked_here()) {
        let owner = it.owner();
        owner.unlock(it);
        it.clear_locked_here();
    }
}

fn backoff(attempt: u32) {
    let spins = 1u32 << attempt.min(10);
    for _ in 0..spins {
        std::hint::spin_loop();
    }
    if attempt >= 4 {
        std::thread::yield_now();
    }
}
