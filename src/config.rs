//! Tunables shared by transactions and structures.
//!
//! # Environment
//!
//! [`Config::from_env`] starts from [`Config::default`] and overrides any
//! field whose variable is set and parses:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `OCCTX_LOCK_SPIN` | [`Config::lock_spin_limit`] |
//! | `OCCTX_READ_SPIN` | [`Config::reader_spin_limit`] |
//! | `OCCTX_BUCKETS` | [`Config::default_buckets`] |
//! | `OCCTX_VECTOR_CAPACITY` | [`Config::vector_capacity`] |
//! | `OCCTX_MAX_RETRIES` | [`Config::max_retries`] |

use std::env;
use std::str::FromStr;

/// Spins before a write lock attempt gives up and aborts.
pub const DEFAULT_LOCK_SPIN: u32 = 1 << 10;

/// Spins a lock-free reader waits for a locked word before retrying.
pub const DEFAULT_READ_SPIN: u32 = 1 << 12;

/// Hash table bucket count when none is given.
pub const DEFAULT_BUCKETS: usize = 129;

/// Vector capacity when none is given.
pub const DEFAULT_VECTOR_CAPACITY: usize = 1024;

/// Attempts [`Transaction::run`](crate::Transaction::run) makes.
pub const DEFAULT_MAX_RETRIES: u32 = 1000;

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Bounded spin for `try_lock` during execution and the lock phase.
    pub lock_spin_limit: u32,
    /// Bounded spin for snapshot reads that find a word locked.
    pub reader_spin_limit: u32,
    /// Bucket count for tables built with [`Config`] defaults.
    pub default_buckets: usize,
    /// Fixed capacity of vectors built with [`Config`] defaults.
    pub vector_capacity: usize,
    /// Retry budget for [`Transaction::run`](crate::Transaction::run).
    pub max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_spin_limit: DEFAULT_LOCK_SPIN,
            reader_spin_limit: DEFAULT_READ_SPIN,
            default_buckets: DEFAULT_BUCKETS,
            vector_capacity: DEFAULT_VECTOR_CAPACITY,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl Config {
    /// Create config from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        override_from_env("OCCTX_LOCK_SPIN", &mut config.lock_spin_limit);
        override_from_env("OCCTX_READ_SPIN", &mut config.reader_spin_limit);
        override_from_env("OCCTX_BUCKETS", &mut config.default_buckets);
        override_from_env("OCCTX_VECTOR_CAPACITY", &mut config.vector_capacity);
        override_from_env("OCCTX_MAX_RETRIES", &mut config.max_retries);
        config
    }

    /// Set [`Config::lock_spin_limit`].
    #[must_use]
    pub const fn with_lock_spin_limit(mut self, spins: u32) -> Self {
        self.lock_spin_limit = spins;
        self
    }

    /// Set [`Config::reader_spin_limit`].
    #[must_use]
    pub const fn with_reader_spin_limit(mut self, spins: u32) -> Self {
        self.reader_spin_limit = spins;
        self
    }

    /// Set [`Config::default_buckets`]. Zero is bumped to one.
    #[must_use]
    pub const fn with_default_buckets(mut self, buckets: usize) -> Self {
        self.default_buckets = if buckets == 0 { 1 } else { buckets };
        self
    }

    /// Set [`Config::vector_capacity`].
    #[must_use]
    pub const fn with_vector_capacity(mut self, capacity: usize) -> Self {
        self.vector_capacity = capacity;
        self
    }

    /// Set [`Config::max_retries`].
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

fn override_from_env<T: FromStr>(var: &str, field: &mut T) {
    if let Some(parsed) = env::var(var).ok().and_then(|raw| raw.trim().parse().ok()) {
        *field = parsed;
    }
}
