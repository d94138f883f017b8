//! Multi-threaded stress tests for transactional structures.
//!
//! Each test checks an invariant that only holds if commits are serializable:
//! - Bank transfers conserve the total
//! - Lock-free readers never see a torn `(version, value)` pair
//! - Insert-if-partner-absent never lets both partners in (phantoms)
//! - Concurrent appends, pops and queue hand-offs lose nothing
//!
//! Run:
//! ```bash
//! cargo test --test stress_tests --release
//! RUST_LOG=occtx=debug cargo test --features tracing --test stress_tests
//! ```

#![allow(clippy::pedantic)]
#![expect(clippy::unwrap_used)]
#![allow(clippy::panic)]

mod common;

use occtx::{Config, HashTable, TQueue, TVector, Transaction, VersionedTree};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

// =============================================================================
// Test Configuration
// =============================================================================

fn config() -> Config {
    Config::default().with_max_retries(1_000_000)
}

/// Deterministic per-thread generator.
struct XorShift(u64);

impl XorShift {
    fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1)
    }

    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

// =============================================================================
// HASH TABLE
// =============================================================================

#[test]
fn bank_transfers_conserve_total() {
    common::init_tracing();

    const ACCOUNTS: u64 = 16;
    const INITIAL: i64 = 1_000;
    const WRITERS: usize = 4;
    const TRANSFERS: usize = 2_000;

    let table: Arc<HashTable<u64, i64>> = Arc::new(HashTable::with_buckets(7));
    for a in 0..ACCOUNTS {
        table.nontrans_put(a, INITIAL);
    }
    let done = Arc::new(AtomicBool::new(false));

    let auditor = {
        let table = Arc::clone(&table);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut audits = 0usize;
            while !done.load(Ordering::Acquire) {
                let total = Transaction::run(&config(), |txn| {
                    let mut sum = 0;
                    for a in 0..ACCOUNTS {
                        sum += table.get(txn, &a)?.unwrap_or(0);
                    }
                    Ok(sum)
                })
                .unwrap();
                assert_eq!(total, INITIAL * ACCOUNTS as i64, "audit saw a partial transfer");
                audits += 1;
            }
            audits
        })
    };

    let writers: Vec<_> = (0..WRITERS)
        .map(|t| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                let mut rng = XorShift::new(t as u64 + 1);
                for _ in 0..TRANSFERS {
                    let from = rng.below(ACCOUNTS);
                    let to = (from + 1 + rng.below(ACCOUNTS - 1)) % ACCOUNTS;
                    let amount = rng.below(50) as i64;
                    Transaction::run(&config(), |txn| {
                        let a = table.get(txn, &from)?.unwrap_or(0);
                        let b = table.get(txn, &to)?.unwrap_or(0);
                        table.put(txn, from, a - amount)?;
                        table.put(txn, to, b + amount)?;
                        Ok(())
                    })
                    .unwrap();
                }
            })
        })
        .collect();

    for w in writers {
        w.join().unwrap();
    }
    done.store(true, Ordering::Release);
    let audits = auditor.join().unwrap();
    tracing::info!(audits, "bank transfer audits");

    let total: i64 = (0..ACCOUNTS).map(|a| table.read(&a).unwrap()).sum();
    assert_eq!(total, INITIAL * ACCOUNTS as i64);
}

#[test]
fn lock_free_reads_are_never_torn() {
    common::init_tracing();

    const KEYS: u64 = 8;
    const ROUNDS: u64 = 5_000;

    let table: Arc<HashTable<u64, (u64, u64)>> = Arc::new(HashTable::with_buckets(3));
    for k in 0..KEYS {
        table.nontrans_put(k, (0, 0));
    }
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let table = Arc::clone(&table);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut last = vec![0u64; KEYS as usize];
                while !done.load(Ordering::Acquire) {
                    for k in 0..KEYS {
                        let (a, b) = table.read(&k).unwrap();
                        assert_eq!(a, b, "torn read of key {k}");
                        assert!(a >= last[k as usize], "value went backwards");
                        last[k as usize] = a;
                    }
                }
            })
        })
        .collect();

    let writers: Vec<_> = (0..2)
        .map(|t| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                for round in 1..=ROUNDS {
                    let k = (round + t) % KEYS;
                    Transaction::run(&config(), |txn| {
                        let (a, _) = table.get(txn, &k)?.unwrap_or((0, 0));
                        table.put(txn, k, (a + 1, a + 1))?;
                        Ok(())
                    })
                    .unwrap();
                }
            })
        })
        .collect();

    for w in writers {
        w.join().unwrap();
    }
    done.store(true, Ordering::Release);
    for r in readers {
        r.join().unwrap();
    }

    let total: u64 = (0..KEYS).map(|k| table.read(&k).unwrap().0).sum();
    assert_eq!(total, 2 * ROUNDS);
}

#[test]
fn hashtable_insert_delete_churn() {
    common::init_tracing();

    const THREADS: u64 = 4;
    const OPS: usize = 3_000;
    const KEYS: u64 = 32;

    let table: Arc<HashTable<u64, u64>> = Arc::new(HashTable::with_buckets(5));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                let mut rng = XorShift::new(100 + t);
                let mut inserted = 0i64;
                for _ in 0..OPS {
                    let k = rng.below(KEYS);
                    let insert = rng.below(2) == 0;
                    let changed = Transaction::run(&config(), |txn| {
                        if insert {
                            table.insert(txn, k, t)
                        } else {
                            table.delete(txn, &k)
                        }
                    })
                    .unwrap();
                    if changed {
                        inserted += if insert { 1 } else { -1 };
                    }
                }
                inserted
            })
        })
        .collect();

    let balance: i64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(table.len() as i64, balance);
}

// =============================================================================
// TREE
// =============================================================================

#[test]
fn tree_partner_inserts_never_both_commit() {
    common::init_tracing();

    const PAIRS: u64 = 200;

    let tree: Arc<VersionedTree<u64, u64>> = Arc::new(VersionedTree::new());
    for k in (0..PAIRS * 2).step_by(16) {
        tree.nontrans_insert(k * 10 + 5, 0);
    }

    let handles: Vec<_> = (0..2u64)
        .map(|side| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let mut wins = 0;
                for pair in 0..PAIRS {
                    let mine = (pair * 2 + side) * 10;
                    let theirs = (pair * 2 + (1 - side)) * 10;
                    let won = Transaction::run(&config(), |txn| {
                        if tree.contains(txn, &theirs)? {
                            return Ok(false);
                        }
                        tree.insert(txn, mine, side)
                    })
                    .unwrap();
                    wins += usize::from(won);
                }
                wins
            })
        })
        .collect();

    let wins: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    for pair in 0..PAIRS {
        let a = tree.nontrans_get(&(pair * 20)).is_some();
        let b = tree.nontrans_get(&(pair * 20 + 10)).is_some();
        assert!(a != b, "pair {pair}: a={a} b={b}");
    }
    assert_eq!(wins, PAIRS as usize);
    tree.validate().unwrap();
}

#[test]
fn tree_concurrent_inserts_and_erases_stay_balanced() {
    common::init_tracing();

    const THREADS: u64 = 4;
    const KEYS_PER_THREAD: u64 = 500;

    let tree: Arc<VersionedTree<u64, u64>> = Arc::new(VersionedTree::new());

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                // Interleaved key ranges force neighbouring nodes to come
                // from different threads.
                let keys: Vec<u64> = (0..KEYS_PER_THREAD).map(|i| i * THREADS + t).collect();
                for chunk in keys.chunks(5) {
                    Transaction::run(&config(), |txn| {
                        for &k in chunk {
                            tree.insert(txn, k, k)?;
                        }
                        Ok(())
                    })
                    .unwrap();
                }
                for &k in keys.iter().filter(|k| *k % 3 == 0) {
                    let erased = Transaction::run(&config(), |txn| tree.erase(txn, &k)).unwrap();
                    assert!(erased, "key {k} vanished before its erase");
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let expected: Vec<u64> = (0..THREADS * KEYS_PER_THREAD).filter(|k| k % 3 != 0).collect();
    let got: Vec<u64> = tree.entries().into_iter().map(|(k, _)| k).collect();
    assert_eq!(got, expected);
    assert_eq!(tree.validate().unwrap(), expected.len());
}

#[test]
fn tree_exactly_one_insert_wins_per_key() {
    common::init_tracing();

    const THREADS: u64 = 4;
    const KEYS: u64 = 300;

    let tree: Arc<VersionedTree<u64, u64>> = Arc::new(VersionedTree::new());
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let mut wins = Vec::new();
                for k in 0..KEYS {
                    if Transaction::run(&config(), |txn| tree.insert(txn, k, t)).unwrap() {
                        wins.push(k);
                    }
                }
                wins
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for h in handles {
        for k in h.join().unwrap() {
            assert!(seen.insert(k), "key {k} inserted twice");
        }
    }
    assert_eq!(seen.len(), KEYS as usize);
    assert_eq!(tree.len(), KEYS as usize);
}

// =============================================================================
// VECTOR AND QUEUE
// =============================================================================

#[test]
fn vector_concurrent_appends_all_land() {
    common::init_tracing();

    const THREADS: u64 = 4;
    const PUSHES: u64 = 200;

    let vector: Arc<TVector<u64>> =
        Arc::new(TVector::with_config(config().with_vector_capacity((THREADS * PUSHES) as usize)));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let vector = Arc::clone(&vector);
            thread::spawn(move || {
                for i in 0..PUSHES {
                    Transaction::run(&config(), |txn| vector.push_back(txn, t * PUSHES + i)).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let mut all = vector.nontrans_to_vec();
    assert_eq!(all.len(), (THREADS * PUSHES) as usize);
    all.sort_unstable();
    assert!(all.iter().copied().eq(0..THREADS * PUSHES));
}

#[test]
fn vector_push_pop_pairs_keep_length() {
    common::init_tracing();

    const BASE: usize = 50;
    const THREADS: usize = 4;
    const ROUNDS: usize = 500;

    let vector: Arc<TVector<usize>> = Arc::new(TVector::with_capacity(BASE + THREADS * 2));
    for i in 0..BASE {
        vector.nontrans_push_back(i).unwrap();
    }

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let vector = Arc::clone(&vector);
            thread::spawn(move || {
                for r in 0..ROUNDS {
                    Transaction::run(&config(), |txn| vector.push_back(txn, t * ROUNDS + r)).unwrap();
                    Transaction::run(&config(), |txn| {
                        assert!(vector.size_ge(txn, 1)?);
                        vector.pop_back(txn)
                    })
                    .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(vector.nontrans_len(), BASE);
}

#[test]
fn queue_hands_off_every_element_once() {
    common::init_tracing();

    const PRODUCERS: u64 = 2;
    const CONSUMERS: usize = 2;
    const PER_PRODUCER: u64 = 1_000;

    let queue: Arc<TQueue<u64>> = Arc::new(TQueue::new());
    let consumed = Arc::new(AtomicUsize::new(0));
    let total = (PRODUCERS * PER_PRODUCER) as usize;

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    Transaction::run(&config(), |txn| queue.push(txn, p * PER_PRODUCER + i)).unwrap();
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let consumed = Arc::clone(&consumed);
            thread::spawn(move || {
                let mut got = Vec::new();
                while consumed.load(Ordering::Acquire) < total {
                    if let Some(v) = Transaction::run(&config(), |txn| queue.pop(txn)).unwrap() {
                        got.push(v);
                        consumed.fetch_add(1, Ordering::AcqRel);
                    } else {
                        thread::yield_now();
                    }
                }
                got
            })
        })
        .collect();

    for p in producers {
        p.join().unwrap();
    }
    let mut seen = HashSet::new();
    for c in consumers {
        for v in c.join().unwrap() {
            assert!(seen.insert(v), "{v} consumed twice");
        }
    }
    assert_eq!(seen.len(), total);
    assert_eq!(queue.nontrans_len(), 0);
}
