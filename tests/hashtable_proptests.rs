//! Property-based tests for `HashTable`.
//!
//! Differential testing against `HashMap`, with few buckets so chains are
//! long and every operation walks shared structure.

#![expect(clippy::unwrap_used, reason = "fail fast in tests")]

use occtx::{HashTable, Transaction};
use proptest::prelude::*;
use std::collections::HashMap;

#[derive(Debug, Clone)]
enum Op {
    Get(u8),
    Insert(u8, u64),
    Put(u8, u64),
    Update(u8, u64),
    Delete(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => any::<u8>().prop_map(Op::Get),
        3 => (any::<u8>(), any::<u64>()).prop_map(|(k, v)| Op::Insert(k, v)),
        1 => (any::<u8>(), any::<u64>()).prop_map(|(k, v)| Op::Put(k, v)),
        1 => (any::<u8>(), any::<u64>()).prop_map(|(k, v)| Op::Update(k, v)),
        2 => any::<u8>().prop_map(Op::Delete),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Committed transactions match the model; aborted ones leave no trace.
    #[test]
    fn transactions_match_hashmap(
        batches in prop::collection::vec(
            (prop::collection::vec(op(), 1..16), prop::bool::weighted(0.75)),
            1..16,
        ),
        buckets in 1usize..8,
    ) {
        let table: HashTable<u8, u64> = HashTable::with_buckets(buckets);
        let mut committed: HashMap<u8, u64> = HashMap::new();

        for (ops, commit) in &batches {
            let mut scratch = committed.clone();
            let mut txn = Transaction::new();
            for op in ops {
                match *op {
                    Op::Get(k) => {
                        prop_assert_eq!(table.get(&mut txn, &k).unwrap(), scratch.get(&k).copied());
                    }
                    Op::Insert(k, v) => {
                        let absent = !scratch.contains_key(&k);
                        prop_assert_eq!(table.insert(&mut txn, k, v).unwrap(), absent);
                        scratch.entry(k).or_insert(v);
                    }
                    Op::Put(k, v) => {
                        let absent = scratch.insert(k, v).is_none();
                        prop_assert_eq!(table.put(&mut txn, k, v).unwrap(), absent);
                    }
                    Op::Update(k, v) => {
                        let present = scratch.contains_key(&k);
                        prop_assert_eq!(table.update(&mut txn, k, v).unwrap(), present);
                        if present {
                            scratch.insert(k, v);
                        }
                    }
                    Op::Delete(k) => {
                        prop_assert_eq!(table.delete(&mut txn, &k).unwrap(), scratch.remove(&k).is_some());
                    }
                }
            }
            if *commit {
                txn.try_commit().unwrap();
                committed = scratch;
            } else {
                txn.abort();
            }

            prop_assert_eq!(table.len(), committed.len());
            for (k, v) in &committed {
                prop_assert_eq!(table.read(k), Some(*v));
            }
        }
    }

    /// Every committed write bumps the version a lock-free reader sees.
    #[test]
    fn versions_change_on_every_commit(values in prop::collection::vec(any::<u64>(), 1..20)) {
        let table: HashTable<u8, u64> = HashTable::with_buckets(3);
        table.nontrans_put(0, 0);
        let (mut last, _) = table.read_versioned(&0).unwrap();
        for v in values {
            let mut txn = Transaction::new();
            table.put(&mut txn, 0, v).unwrap();
            txn.try_commit().unwrap();
            let (now, seen) = table.read_versioned(&0).unwrap();
            prop_assert_eq!(seen, v);
            prop_assert!(!now.matches(last));
            last = now;
        }
    }
}
