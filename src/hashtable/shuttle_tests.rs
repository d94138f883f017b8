//! Shuttle tests for the double-snapshot read protocol.
//!
//! Shuttle explores randomized thread schedules. Its atomics are needed for
//! scheduling points, so the element is modelled with shuttle primitives: a
//! version word and a value split across two words that a writer updates
//! under the lock. A torn read would observe the halves disagreeing.
//!
//! Run with: `cargo test --lib hashtable::shuttle_tests`

use shuttle::sync::atomic::{AtomicU64, Ordering};
use shuttle::sync::Arc;
use shuttle::thread;

const LOCK_BIT: u64 = 1 << 63;

/// Version word plus a two-word value: `(n, n * 2)` is always consistent.
struct ShuttleElement {
    version: AtomicU64,
    lo: AtomicU64,
    hi: AtomicU64,
}

impl ShuttleElement {
    fn new() -> Self {
        Self {
            version: AtomicU64::new(0),
            lo: AtomicU64::new(0),
            hi: AtomicU64::new(0),
        }
    }

    fn write(&self, n: u64) {
        loop {
            let v = self.version.load(Ordering::Relaxed);
            if v & LOCK_BIT == 0
                && self
                    .version
                    .compare_exchange(v, v | LOCK_BIT, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                break;
            }
            thread::yield_now();
        }
        self.lo.store(n, Ordering::Release);
        thread::yield_now();
        self.hi.store(n * 2, Ordering::Release);
        self.version.fetch_add(1, Ordering::Release);
        self.version.fetch_and(!LOCK_BIT, Ordering::Release);
    }

    /// Mirrors `HashTable::snapshot`: read the version, the value, the version
    /// again, and retry until they agree.
    fn snapshot(&self) -> (u64, u64, u64) {
        loop {
            let before = self.version.load(Ordering::Acquire);
            if before & LOCK_BIT != 0 {
                thread::yield_now();
                continue;
            }
            let lo = self.lo.load(Ordering::Acquire);
            let hi = self.hi.load(Ordering::Acquire);
            if self.version.load(Ordering::Acquire) == before {
                return (before, lo, hi);
            }
        }
    }
}

#[test]
fn test_shuttle_snapshot_never_torn() {
    shuttle::check_random(
        || {
            let elem = Arc::new(ShuttleElement::new());

            let writers: Vec<_> = (1..=2u64)
                .map(|w| {
                    let e = Arc::clone(&elem);
                    thread::spawn(move || {
                        for i in 0..3 {
                            e.write(w * 10 + i);
                        }
                    })
                })
                .collect();

            let e = Arc::clone(&elem);
            let reader = thread::spawn(move || {
                let mut last_version = 0;
                for _ in 0..4 {
                    let (version, lo, hi) = e.snapshot();
                    assert_eq!(hi, lo * 2, "torn read at version {version}");
                    assert!(version >= last_version, "version went backwards");
                    last_version = version;
                }
            });

            for w in writers {
                w.join().unwrap();
            }
            reader.join().unwrap();
            assert_eq!(elem.version.load(Ordering::Relaxed), 6);
        },
        1000,
    );
}

#[test]
fn test_shuttle_version_counts_committed_writes() {
    shuttle::check_random(
        || {
            let elem = Arc::new(ShuttleElement::new());
            let handles: Vec<_> = (0..3u64)
                .map(|n| {
                    let e = Arc::clone(&elem);
                    thread::spawn(move || e.write(n + 1))
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
            let (version, lo, hi) = elem.snapshot();
            assert_eq!(version, 3);
            assert_eq!(hi, lo * 2);
            assert!((1..=3).contains(&lo));
        },
        500,
    );
}
