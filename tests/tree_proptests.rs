//! Property-based tests for `VersionedTree`.
//!
//! Differential testing against `BTreeMap`: random batches of operations run
//! as single transactions that either commit or abort, and the tree must
//! match the model after every batch.

#![expect(clippy::unwrap_used, reason = "fail fast in tests")]

use occtx::{Transaction, VersionedTree};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Small key space so operations collide often.
const KEY_SPACE: u16 = 64;

// ============================================================================
//  Strategies
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Get(u16),
    Insert(u16, u32),
    Put(u16, u32),
    Update(u16, u32),
    Erase(u16),
}

fn key() -> impl Strategy<Value = u16> {
    0..KEY_SPACE
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => key().prop_map(Op::Get),
        3 => (key(), any::<u32>()).prop_map(|(k, v)| Op::Insert(k, v)),
        1 => (key(), any::<u32>()).prop_map(|(k, v)| Op::Put(k, v)),
        1 => (key(), any::<u32>()).prop_map(|(k, v)| Op::Update(k, v)),
        2 => key().prop_map(Op::Erase),
    ]
}

/// A batch of operations and whether its transaction commits.
fn batches() -> impl Strategy<Value = Vec<(Vec<Op>, bool)>> {
    prop::collection::vec((prop::collection::vec(op(), 1..12), prop::bool::weighted(0.8)), 1..20)
}

/// Apply `ops` to both the tree (inside `txn`) and a scratch model,
/// asserting they answer identically.
fn run_batch<'a>(
    tree: &'a VersionedTree<u16, u32>,
    txn: &mut Transaction<'a>,
    model: &mut BTreeMap<u16, u32>,
    ops: &[Op],
) -> Result<(), TestCaseError> {
    for op in ops {
        match *op {
            Op::Get(k) => {
                prop_assert_eq!(tree.get(txn, &k).unwrap(), model.get(&k).copied());
            }
            Op::Insert(k, v) => {
                let absent = !model.contains_key(&k);
                prop_assert_eq!(tree.insert(txn, k, v).unwrap(), absent);
                model.entry(k).or_insert(v);
            }
            Op::Put(k, v) => {
                let absent = model.insert(k, v).is_none();
                prop_assert_eq!(tree.put(txn, k, v).unwrap(), absent);
            }
            Op::Update(k, v) => {
                let present = model.contains_key(&k);
                prop_assert_eq!(tree.update(txn, k, v).unwrap(), present);
                if present {
                    model.insert(k, v);
                }
            }
            Op::Erase(k) => {
                prop_assert_eq!(tree.erase(txn, &k).unwrap(), model.remove(&k).is_some());
            }
        }
    }
    Ok(())
}

// ============================================================================
//  Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Committed batches match the model; aborted batches leave no trace.
    #[test]
    fn transactions_match_btreemap(batches in batches()) {
        let tree: VersionedTree<u16, u32> = VersionedTree::new();
        let mut committed: BTreeMap<u16, u32> = BTreeMap::new();

        for (ops, commit) in &batches {
            let mut scratch = committed.clone();
            let mut txn = Transaction::new();
            run_batch(&tree, &mut txn, &mut scratch, ops)?;
            if *commit {
                txn.try_commit().unwrap();
                committed = scratch;
            } else {
                txn.abort();
            }

            let entries: BTreeMap<u16, u32> = tree.entries().into_iter().collect();
            prop_assert_eq!(&entries, &committed);
            prop_assert_eq!(tree.validate(), Ok(committed.len()));
        }
    }

    /// Non-transactional setup and transactional reads agree.
    #[test]
    fn nontrans_then_transactional_reads(pairs in prop::collection::vec((key(), any::<u32>()), 0..100)) {
        let tree: VersionedTree<u16, u32> = VersionedTree::new();
        let mut model = BTreeMap::new();
        for &(k, v) in &pairs {
            let absent = !model.contains_key(&k);
            prop_assert_eq!(tree.nontrans_insert(k, v), absent);
            model.entry(k).or_insert(v);
        }

        let mut txn = Transaction::new();
        for k in 0..KEY_SPACE {
            prop_assert_eq!(tree.get(&mut txn, &k).unwrap(), model.get(&k).copied());
        }
        txn.try_commit().unwrap();
        prop_assert_eq!(tree.len(), model.len());
    }

    /// Removing everything returns the values and leaves a valid empty tree.
    #[test]
    fn nontrans_remove_drains(keys in prop::collection::btree_set(key(), 0..64)) {
        let tree: VersionedTree<u16, u32> = VersionedTree::new();
        for &k in &keys {
            tree.nontrans_insert(k, u32::from(k) * 3);
        }
        for &k in &keys {
            prop_assert_eq!(tree.nontrans_remove(&k), Some(u32::from(k) * 3));
            prop_assert_eq!(tree.nontrans_remove(&k), None);
        }
        prop_assert!(tree.is_empty());
        prop_assert_eq!(tree.validate(), Ok(0));
    }
}
