//! Deferred reclamation for unlinked elements, nodes and replaced values.
//!
//! Every transaction and every lock-free reader holds a guard from the
//! crate-wide [`Collector`]. Memory unlinked while guards are active is handed
//! to [`retire_boxed`] and freed only once no guard that could still hold a
//! reference remains.

// We use pub(crate) for helpers only structures in this crate may call.
#![allow(clippy::redundant_pub_crate)]

use std::sync::LazyLock;

use seize::{Collector, Guard, LocalGuard};

static COLLECTOR: LazyLock<Collector> = LazyLock::new(Collector::new);

/// The crate-wide collector.
#[must_use]
pub fn collector() -> &'static Collector {
    &COLLECTOR
}

/// Enter a protected region.
///
/// Pointers loaded from any structure in this crate stay valid until the
/// returned guard is dropped.
#[must_use]
pub fn enter() -> LocalGuard<'static> {
    COLLECTOR.enter()
}

/// Reclaim a boxed allocation (seize callback).
///
/// # Safety
///
/// - `ptr` must come from `Box::into_raw`.
/// - Must only be called once seize determines no reader remains.
pub(crate) unsafe fn reclaim_boxed<T>(ptr: *mut T, _collector: &Collector) {
    // SAFETY: Caller guarantees ptr is valid and from Box::into_raw.
    // Seize ensures no readers remain.
    unsafe { drop(Box::from_raw(ptr)) };
}

/// Retire a boxed allocation that is no longer reachable.
///
/// Null pointers are ignored.
///
/// # Safety
///
/// - `ptr` must come from `Box::into_raw` and be unreachable for any new
///   traversal.
/// - `ptr` must not be retired twice.
pub(crate) unsafe fn retire_boxed<T: Send>(guard: &LocalGuard<'_>, ptr: *mut T) {
    if ptr.is_null() {
        return;
    }
    // SAFETY: Caller guarantees ptr came from Box::into_raw, is unlinked, and
    // is retired exactly once.
    unsafe { guard.defer_retire(ptr, reclaim_boxed::<T>) };
}

/// Free a boxed allocation immediately.
///
/// # Safety
///
/// Caller must have exclusive access (e.g. `Drop` of the owning structure)
/// and `ptr` must come from `Box::into_raw`. Null pointers are ignored.
pub(crate) unsafe fn free_boxed<T>(ptr: *mut T) {
    if !ptr.is_null() {
        // SAFETY: Caller guarantees exclusive access and Box provenance.
        unsafe { drop(Box::from_raw(ptr)) };
    }
}
