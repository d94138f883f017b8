//! # `occtx`
//!
//! Versioned in-memory data structures that take part in optimistic
//! multi-object transactions.
//!
//! Every structure here implements [`TObject`], the five-method contract a
//! transaction coordinator drives at commit (`lock`, `check`, `install`,
//! `unlock`, `cleanup`). During execution a structure only records what it
//! read and buffers what it wants to write as [`TransItem`]s; conflicts are
//! found at commit by revalidating version words.
//!
//! | Structure | Reads validated by | Notes |
//! |-----------|--------------------|-------|
//! | [`HashTable`] | element version, bucket version for absent keys | fixed bucket count |
//! | [`VersionedTree`] | node version, neighbour node versions for gaps | red-black, phantom-safe |
//! | [`TVector`] | slot versions plus a [`SizePredicate`] on the size | relative push/pop |
//! | [`TQueue`] | queue version | head locked by consumers |
//!
//! ## Example
//!
//! ```rust
//! use occtx::{Config, HashTable, Transaction, VersionedTree};
//!
//! let accounts: HashTable<u32, i64> = HashTable::new();
//! let audit: VersionedTree<u64, u32> = VersionedTree::new();
//! accounts.nontrans_put(1, 100);
//! accounts.nontrans_put(2, 0);
//!
//! Transaction::run(&Config::default(), |txn| {
//!     let from = accounts.get(txn, &1)?.unwrap_or(0);
//!     let to = accounts.get(txn, &2)?.unwrap_or(0);
//!     accounts.put(txn, 1, from - 40)?;
//!     accounts.put(txn, 2, to + 40)?;
//!     audit.insert(txn, 1, 2)?;
//!     Ok(())
//! })
//! .unwrap();
//!
//! assert_eq!(accounts.read(&1), Some(60));
//! assert_eq!(audit.nontrans_get(&1), Some(2));
//! ```
//!
//! ## Thread Safety
//!
//! Structures are `Send + Sync` and shared by reference; a [`Transaction`] is
//! per-thread. Memory unlinked by one transaction is retired through the
//! crate-wide [`seize`] collector and freed only once no transaction or
//! lock-free reader can still hold it.

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod hashtable;
pub mod ordering;
pub mod predicate;
pub mod queue;
pub mod reclaim;
pub mod tree;
pub mod txn;
pub mod vector;
pub mod version;

mod tracing_helpers;

// Re-export main types for convenience
pub use config::Config;
pub use error::{AbortReason, TxResult, TxnError};
pub use hashtable::HashTable;
pub use predicate::SizePredicate;
pub use queue::TQueue;
pub use tree::VersionedTree;
pub use txn::{ItemKey, TObject, TransItem, Transaction, TxnCtx, TxnState};
pub use vector::TVector;
pub use version::{Version, VersionWord};
