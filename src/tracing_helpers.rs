//! Logging macros that vanish without the `tracing` feature.
//!
//! With `--features tracing` each macro forwards to the matching `tracing`
//! macro. Without it the macro expands to nothing, so hot paths such as lock
//! acquisition and validation pay no cost.
//!
//! ```bash
//! # Commits, aborts and lock timeouts for one test
//! RUST_LOG=occtx::txn=debug cargo test --features tracing bank_transfer
//!
//! # Everything the tree does
//! RUST_LOG=occtx::tree=trace cargo test --features tracing --test tree_proptests
//! ```
//!
//! Levels used in this crate:
//! - `trace`: per-operation events (descents, splices, installs)
//! - `debug`: transaction outcomes (commit tid, abort reason)
//! - `warn`: retry budget exhausted

#![allow(unused_macros, unused_imports)]

/// Per-operation detail.
#[cfg(feature = "tracing")]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_log {
    ($($arg:tt)*) => {};
}

/// Transaction outcomes.
#[cfg(feature = "tracing")]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

/// Conditions a caller should look at.
#[cfg(feature = "tracing")]
macro_rules! warn_log {
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn_log {
    ($($arg:tt)*) => {};
}

pub(crate) use debug_log;
pub(crate) use trace_log;
pub(crate) use warn_log;
