//! Every value a structure ever held is dropped exactly once.
//!
//! Values count their constructions (including clones handed out by reads)
//! and their drops. After committed deletes, aborted inserts and overwrites
//! the structures are dropped and the collector is drained; the two counts
//! must then agree. A leak leaves drops short, a double free pushes them over.
//!
//! `reclaim_all` requires that nothing else uses the crate-wide collector, so
//! this binary holds a single test.

#![expect(clippy::unwrap_used, reason = "fail fast in tests")]

use std::sync::atomic::{AtomicUsize, Ordering};

use occtx::{reclaim, HashTable, TVector, Transaction, VersionedTree};

static CREATED: AtomicUsize = AtomicUsize::new(0);
static DROPPED: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug)]
struct Tracked(u64);

impl Tracked {
    fn new(n: u64) -> Self {
        CREATED.fetch_add(1, Ordering::SeqCst);
        Self(n)
    }
}

impl Clone for Tracked {
    fn clone(&self) -> Self {
        Self::new(self.0)
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        DROPPED.fetch_add(1, Ordering::SeqCst);
    }
}

fn hashtable_churn() {
    let table: HashTable<u64, Tracked> = HashTable::with_buckets(7);
    for k in 0..16 {
        table.nontrans_put(k, Tracked::new(k));
    }

    // Committed deletes and overwrites.
    let mut txn = Transaction::new();
    for k in 0..4 {
        assert!(table.delete(&mut txn, &k).unwrap());
    }
    for k in 4..8 {
        assert!(!table.put(&mut txn, k, Tracked::new(k * 10)).unwrap());
    }
    assert!(table.update(&mut txn, 8, Tracked::new(80)).unwrap());
    assert_eq!(table.get(&mut txn, &9).unwrap().map(|t| t.0), Some(9));
    txn.try_commit().unwrap();

    // Aborted inserts and overwrites.
    let mut txn = Transaction::new();
    for k in 100..104 {
        assert!(table.insert(&mut txn, k, Tracked::new(k)).unwrap());
    }
    table.put(&mut txn, 10, Tracked::new(1000)).unwrap();
    table.delete(&mut txn, &11).unwrap();
    txn.abort();

    // Own insert deleted, then a delete revived by an insert.
    let mut txn = Transaction::new();
    assert!(table.insert(&mut txn, 200, Tracked::new(200)).unwrap());
    assert!(table.delete(&mut txn, &200).unwrap());
    assert!(table.delete(&mut txn, &12).unwrap());
    assert!(table.insert(&mut txn, 12, Tracked::new(120)).unwrap());
    txn.try_commit().unwrap();

    assert_eq!(table.read(&12).map(|t| t.0), Some(120));
    assert!(table.read(&200).is_none());
    assert_eq!(table.len(), 12);
}

fn tree_churn() {
    let tree: VersionedTree<u64, Tracked> = VersionedTree::new();
    for k in 0..32 {
        tree.nontrans_insert(k, Tracked::new(k));
    }

    let mut txn = Transaction::new();
    for k in (0..32).step_by(4) {
        assert!(tree.erase(&mut txn, &k).unwrap());
    }
    for k in (1..32).step_by(4) {
        assert!(!tree.put(&mut txn, k, Tracked::new(k + 100)).unwrap());
    }
    assert!(tree.insert(&mut txn, 500, Tracked::new(500)).unwrap());
    assert!(tree.update(&mut txn, 500, Tracked::new(501)).unwrap());
    txn.try_commit().unwrap();

    let mut txn = Transaction::new();
    for k in 40..48 {
        assert!(tree.insert(&mut txn, k, Tracked::new(k)).unwrap());
    }
    tree.put(&mut txn, 2, Tracked::new(2000)).unwrap();
    tree.erase(&mut txn, &3).unwrap();
    txn.abort();

    let mut txn = Transaction::new();
    assert!(tree.erase(&mut txn, &6).unwrap());
    assert!(tree.insert(&mut txn, 6, Tracked::new(60)).unwrap());
    assert_eq!(tree.get(&mut txn, &6).unwrap().map(|t| t.0), Some(60));
    txn.try_commit().unwrap();

    assert!(tree.nontrans_remove(&7).is_some());
    assert_eq!(tree.nontrans_get(&6).map(|t| t.0), Some(60));
    assert_eq!(tree.validate(), Ok(tree.len()));
}

fn vector_churn() {
    let v: TVector<Tracked> = TVector::with_capacity(16);
    for i in 0..6 {
        v.nontrans_push_back(Tracked::new(i)).unwrap();
    }

    // Overwrite, and refill a popped slot.
    let mut txn = Transaction::new();
    v.put(&mut txn, 0, Tracked::new(100)).unwrap();
    v.pop_back(&mut txn).unwrap();
    v.push_back(&mut txn, Tracked::new(105)).unwrap();
    v.push_back(&mut txn, Tracked::new(106)).unwrap();
    assert_eq!(v.get(&mut txn, 6).unwrap().0, 106);
    txn.try_commit().unwrap();

    // Aborted appends and overwrites.
    let mut txn = Transaction::new();
    for i in 0..4 {
        v.push_back(&mut txn, Tracked::new(200 + i)).unwrap();
    }
    v.put(&mut txn, 1, Tracked::new(201)).unwrap();
    txn.abort();

    // Popped slots keep their value until overwritten or dropped.
    let mut txn = Transaction::new();
    v.pop_back(&mut txn).unwrap();
    v.pop_back(&mut txn).unwrap();
    txn.try_commit().unwrap();

    let contents: Vec<u64> = v.nontrans_to_vec().into_iter().map(|t| t.0).collect();
    assert_eq!(contents, vec![100, 1, 2, 3, 4]);
}

#[test]
fn every_value_is_dropped_exactly_once() {
    hashtable_churn();
    tree_churn();
    vector_churn();

    // SAFETY: every structure, transaction and guard is gone, and this
    // binary runs no other test that could touch the collector.
    unsafe { reclaim::collector().reclaim_all() };

    let created = CREATED.load(Ordering::SeqCst);
    let dropped = DROPPED.load(Ordering::SeqCst);
    assert!(created > 0);
    assert_eq!(dropped, created, "created {created}, dropped {dropped}");
}
