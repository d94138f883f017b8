//! Error types for transactional operations.
//!
//! Every conflict a structure detects surfaces as [`TxnError::Aborted`]. No
//! structure retries internally; [`Transaction::run`](crate::Transaction::run)
//! is the only place that loops.

use std::fmt;

use thiserror::Error;

/// Why a transaction was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbortReason {
    /// A bounded-spin lock acquisition ran out of spins.
    LockTimeout,
    /// A recorded read no longer matches the current version.
    ValidationFailed,
    /// Observed another transaction's uncommitted insert.
    DirtyRead,
    /// A size observation contradicts earlier observations, or the final
    /// size predicate does not hold at commit.
    PredicateContradiction,
    /// The target was deleted, or is being deleted, by another transaction.
    ConcurrentDelete,
    /// The application asked for the abort.
    Explicit,
    /// An operation was attempted on a transaction that had already aborted.
    AlreadyAborted,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LockTimeout => "lock timeout",
            Self::ValidationFailed => "read validation failed",
            Self::DirtyRead => "uncommitted insert observed",
            Self::PredicateContradiction => "size predicate violated",
            Self::ConcurrentDelete => "concurrent delete",
            Self::Explicit => "explicit abort",
            Self::AlreadyAborted => "transaction already aborted",
        };
        f.write_str(s)
    }
}

/// All transactional errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxnError {
    /// Conflict; retrying the whole transaction may succeed.
    #[error("transaction aborted: {0}")]
    Aborted(AbortReason),

    /// Index outside the vector as seen by this transaction.
    #[error("index {index} out of range for length {len}")]
    OutOfRange {
        /// Requested index
        index: usize,
        /// Transactional length at the time of the access
        len: usize,
    },

    /// The fixed capacity of a vector would be exceeded.
    #[error("capacity {capacity} exceeded")]
    CapacityExceeded {
        /// Configured capacity
        capacity: usize,
    },

    /// [`Transaction::run`](crate::Transaction::run) gave up.
    #[error("gave up after {0} attempts")]
    RetryLimit(u32),
}

/// Result type for transactional operations.
pub type TxResult<T> = Result<T, TxnError>;

impl TxnError {
    /// Check if this error is a conflict abort.
    #[must_use]
    pub const fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }

    /// The abort reason, if this is an abort.
    #[must_use]
    pub const fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            Self::Aborted(reason) => Some(*reason),
            _ => None,
        }
    }
}
