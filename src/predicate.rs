//! Range predicate over a size.
//!
//! A [`SizePredicate`] remembers what a transaction learned about a size as
//! an inclusive range `[lo, hi]` instead of an exact value. Each observed
//! comparison narrows the range to the tightest one consistent with the
//! outcome; at commit the size only has to still fall inside it.
//!
//! ```rust
//! use occtx::SizePredicate;
//!
//! let mut p = SizePredicate::unconstrained();
//! assert!(p.observe_gt(5, true)); // size > 5
//! assert!(p.observe_lt(10, true)); // size < 10
//! assert_eq!((p.lo(), p.hi()), (6, 9));
//! assert!(p.verify(7));
//! assert!(!p.verify(10));
//!
//! // Contradicts what was already learned.
//! assert!(!p.observe_eq(3, true));
//! ```

/// Inclusive bounds on a size observed by one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizePredicate {
    lo: i64,
    hi: i64,
}

impl Default for SizePredicate {
    fn default() -> Self {
        Self::unconstrained()
    }
}

impl SizePredicate {
    /// Every non-negative size.
    #[must_use]
    pub const fn unconstrained() -> Self {
        Self { lo: 0, hi: i64::MAX }
    }

    /// Smallest size still consistent.
    #[must_use]
    pub const fn lo(&self) -> i64 {
        self.lo
    }

    /// Largest size still consistent.
    #[must_use]
    pub const fn hi(&self) -> i64 {
        self.hi
    }

    /// Has nothing been learned yet?
    #[must_use]
    pub const fn is_unconstrained(&self) -> bool {
        self.lo == 0 && self.hi == i64::MAX
    }

    /// Is the range empty?
    #[must_use]
    pub const fn is_contradiction(&self) -> bool {
        self.lo > self.hi
    }

    /// Does `size` satisfy everything observed?
    #[must_use]
    pub const fn verify(&self, size: i64) -> bool {
        self.lo <= size && size <= self.hi
    }

    fn narrow(&mut self, lo: i64, hi: i64) -> bool {
        self.lo = self.lo.max(lo);
        self.hi = self.hi.min(hi);
        !self.is_contradiction()
    }

    /// Record that `size < k` evaluated to `outcome`.
    ///
    /// Returns `false` if the range became empty.
    #[must_use]
    pub fn observe_lt(&mut self, k: i64, outcome: bool) -> bool {
        if outcome {
            self.narrow(i64::MIN, k.saturating_sub(1))
        } else {
            self.narrow(k, i64::MAX)
        }
    }

    /// Record that `size <= k` evaluated to `outcome`.
    #[must_use]
    pub fn observe_le(&mut self, k: i64, outcome: bool) -> bool {
        if outcome {
            self.narrow(i64::MIN, k)
        } else {
            self.narrow(k.saturating_add(1), i64::MAX)
        }
    }

    /// Record that `size > k` evaluated to `outcome`.
    #[must_use]
    pub fn observe_gt(&mut self, k: i64, outcome: bool) -> bool {
        if outcome {
            self.narrow(k.saturating_add(1), i64::MAX)
        } else {
            self.narrow(i64::MIN, k)
        }
    }

    /// Record that `size >= k` evaluated to `outcome`.
    #[must_use]
    pub fn observe_ge(&mut self, k: i64, outcome: bool) -> bool {
        if outcome {
            self.narrow(k, i64::MAX)
        } else {
            self.narrow(i64::MIN, k.saturating_sub(1))
        }
    }

    /// Record that `size == k` evaluated to `outcome`.
    ///
    /// A false equality only narrows when `k` sits on a bound; a hole in the
    /// middle of the range is not representable and is dropped.
    #[must_use]
    pub fn observe_eq(&mut self, k: i64, outcome: bool) -> bool {
        if outcome {
            return self.narrow(k, k);
        }
        if k == self.lo {
            self.lo = self.lo.saturating_add(1);
        } else if k == self.hi {
            self.hi = self.hi.saturating_sub(1);
        }
        !self.is_contradiction()
    }

    /// Pin the range to exactly `size`.
    #[must_use]
    pub fn pin(&mut self, size: i64) -> bool {
        self.observe_eq(size, true)
    }
}
