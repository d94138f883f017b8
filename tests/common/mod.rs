//! Filepath: tests/common/mod.rs
//!
//! Tracing for integration tests.
//!
//! Every event passing the filter is appended to `$OCCTX_LOG_DIR/occtx.jsonl`
//! (default `logs/`), one JSON object per line. `OCCTX_LOG_CONSOLE=1` also
//! prints them. `RUST_LOG` overrides the default `occtx=debug` filter; the
//! crate only emits events when built with `--features tracing`.
//!
//! Fields the crate logs:
//!
//! | Field | Events |
//! |-------|--------|
//! | `txn` | `transaction aborted`, `committed` |
//! | `tid` | `committed`, `unlinked erased node` |
//! | `reason` | `transaction aborted`, `retrying transaction` |
//! | `owner` | `lock failed`, `check failed` |
//!
//! ```bash
//! # Why did transactions abort?
//! jq -r 'select(.fields.message == "transaction aborted") | .fields.reason' logs/occtx.jsonl | sort | uniq -c
//!
//! # Which structure refused a lock or a check?
//! jq 'select(.fields.owner) | {owner: .fields.owner, msg: .fields.message}' logs/occtx.jsonl
//!
//! # Commits in tid order
//! jq -s 'map(select(.fields.tid)) | sort_by(.fields.tid)' logs/occtx.jsonl
//! ```

#![allow(dead_code)]

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::{Mutex, Once};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

const DEFAULT_FILTER: &str = "occtx=debug";

static INIT: Once = Once::new();

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the subscriber once per test binary.
pub fn init_tracing() {
    INIT.call_once(install);
}

#[expect(clippy::expect_used, reason = "a test run without its log is useless")]
fn install() {
    let dir = std::env::var_os("OCCTX_LOG_DIR").map_or_else(|| PathBuf::from("logs"), PathBuf::from);
    fs::create_dir_all(&dir).expect("create log directory");
    // Append: test binaries run in parallel and share the file.
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("occtx.jsonl"))
        .expect("open log file");

    let ndjson = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(Mutex::new(file))
        .with_thread_ids(true)
        .with_target(true)
        .with_filter(filter());

    let console = std::env::var("OCCTX_LOG_CONSOLE").is_ok_and(|v| v == "1").then(|| {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_thread_ids(true)
            .with_filter(filter())
    });

    // Another harness may already own the global subscriber.
    let _ = Registry::default().with(ndjson).with(console).try_init();
}
