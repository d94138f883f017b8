//! Filepath: src/queue.rs
//!
//! Transactional FIFO queue.
//!
//! The whole queue is one item guarded by one [`VersionWord`]. Pushes are
//! buffered in the item and appended at install. Taking or peeking at the
//! head locks the queue for the rest of the transaction, so at most one
//! transaction consumes from the head at a time and what it saw cannot move.
//! Emptiness checks that do not hold the lock record a read of the version
//! instead.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{AbortReason, TxResult};
use crate::tracing_helpers::trace_log;
use crate::txn::{ItemKey, TObject, TransItem, Transaction, TxnCtx};
use crate::version::{Version, VersionWord};

const QUEUE_KEY: ItemKey = ItemKey::from_index(0);

/// A transaction's pending effect on the queue.
struct QueueState<T> {
    /// Committed elements consumed from the head.
    popped: usize,
    /// Buffered pushes, oldest first.
    pushed: VecDeque<T>,
}

impl<T> Default for QueueState<T> {
    fn default() -> Self {
        Self {
            popped: 0,
            pushed: VecDeque::new(),
        }
    }
}

/// Pending write marker.
struct QueueWrite;

/// A transactional FIFO queue.
pub struct TQueue<T> {
    elems: Mutex<VecDeque<T>>,
    version: VersionWord,
    config: Config,
}

impl<T> TQueue<T> {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create an empty queue tuned by `config`.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        Self {
            elems: Mutex::new(VecDeque::new()),
            version: VersionWord::new(),
            config,
        }
    }

    /// Committed length.
    #[must_use]
    pub fn nontrans_len(&self) -> usize {
        self.elems.lock().len()
    }

    /// Append outside any transaction.
    pub fn nontrans_push(&self, value: T) {
        let lock = self.version.lock_guard();
        self.elems.lock().push_back(value);
        lock.bump();
    }
}

impl<T> Default for TQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TQueue<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Committed contents, head first.
    #[must_use]
    pub fn nontrans_to_vec(&self) -> Vec<T> {
        self.elems.lock().iter().cloned().collect()
    }

    fn state<'a, 't>(&'a self, txn: &'t mut Transaction<'a>) -> &'t mut QueueState<T> {
        txn.item(self, QUEUE_KEY).extra_or_insert_with(QueueState::default)
    }

    /// Hold the queue lock until the transaction finishes.
    fn lock_head<'a>(&'a self, txn: &mut Transaction<'a>) -> TxResult<()> {
        let spin = txn.config().lock_spin_limit;
        let item = txn.item(self, QUEUE_KEY);
        if item.is_locked_here() {
            return Ok(());
        }
        if !self.version.try_lock(spin) {
            return Err(txn.abort_with(AbortReason::LockTimeout));
        }
        item.set_locked_here();
        Ok(())
    }

    /// Append `value` at commit.
    pub fn push<'a>(&'a self, txn: &mut Transaction<'a>, value: T) -> TxResult<()> {
        txn.ensure_active()?;
        self.state(txn).pushed.push_back(value);
        txn.item(self, QUEUE_KEY).add_write(QueueWrite);
        Ok(())
    }

    /// Remove and return the head, or `None` if the queue is empty.
    ///
    /// Committed elements come out before this transaction's own pushes.
    pub fn pop<'a>(&'a self, txn: &mut Transaction<'a>) -> TxResult<Option<T>> {
        txn.ensure_active()?;
        self.lock_head(txn)?;
        let head = {
            let elems = self.elems.lock();
            let state = self.state(txn);
            if let Some(v) = elems.get(state.popped) {
                state.popped += 1;
                Some(v.clone())
            } else {
                state.pushed.pop_front()
            }
        };
        if head.is_some() {
            txn.item(self, QUEUE_KEY).add_write(QueueWrite);
        }
        Ok(head)
    }

    /// The head, without removing it.
    pub fn front<'a>(&'a self, txn: &mut Transaction<'a>) -> TxResult<Option<T>> {
        txn.ensure_active()?;
        self.lock_head(txn)?;
        let elems = self.elems.lock();
        let state = self.state(txn);
        Ok(elems
            .get(state.popped)
            .or_else(|| state.pushed.front())
            .cloned())
    }

    /// True if nothing is left for this transaction to pop.
    pub fn is_empty<'a>(&'a self, txn: &mut Transaction<'a>) -> TxResult<bool> {
        txn.ensure_active()?;
        let locked_here = txn.peek_item(self, QUEUE_KEY).is_some_and(|it| it.is_locked_here());
        let (version, committed) = if locked_here {
            (None, self.elems.lock().len())
        } else {
            let Some((version, len)) = self.snapshot_len() else {
                return Err(txn.abort_with(AbortReason::LockTimeout));
            };
            (Some(version), len)
        };

        let state = self.state(txn);
        let empty = committed <= state.popped && state.pushed.is_empty();
        if let Some(version) = version {
            txn.item(self, QUEUE_KEY).observe(version);
        }
        Ok(empty)
    }

    fn snapshot_len(&self) -> Option<(Version, usize)> {
        loop {
            let before = self.version.stable(self.config.reader_spin_limit)?;
            let len = self.elems.lock().len();
            if self.version.load() == before {
                return Some((before, len));
            }
        }
    }
}

impl<T> TObject for TQueue<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn lock(&self, _item: &mut TransItem<'_>, ctx: &TxnCtx) -> bool {
        self.version.try_lock(ctx.config().lock_spin_limit)
    }

    fn check(&self, item: &TransItem<'_>, _ctx: &TxnCtx) -> bool {
        let Some(read) = item.read_version() else {
            return true;
        };
        let now = self.version.load();
        read.matches(now) && (!now.is_locked() || item.is_locked_here())
    }

    fn install(&self, item: &mut TransItem<'_>, _ctx: &TxnCtx) {
        let state = item.extra_or_insert_with(QueueState::<T>::default);
        let popped = state.popped;
        let pushed = std::mem::take(&mut state.pushed);
        let mut elems = self.elems.lock();
        debug_assert!(popped <= elems.len(), "popped past the committed head");
        trace_log!(popped, pushes = pushed.len(), "queue install");
        elems.drain(..popped);
        elems.extend(pushed);
        drop(elems);
        self.version.bump();
    }

    fn unlock(&self, _item: &mut TransItem<'_>) {
        self.version.unlock();
    }

    fn name(&self) -> &'static str {
        "queue"
    }
}

impl<T> fmt::Debug for TQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TQueue")
            .field("len", &self.elems.lock().len())
            .finish_non_exhaustive()
    }
}
