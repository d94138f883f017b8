//! Tree node.
//!
//! Links and color are atomics so lock-free readers can follow them while a
//! writer holding the structural lock restructures the tree. Readers never
//! trust what they saw until the structural version validates.

use std::sync::atomic::{AtomicBool, AtomicPtr};
use std::ptr;

use crate::ordering::{READ_ORD, WRITE_ORD};
use crate::reclaim;
use crate::version::VersionWord;

pub(crate) struct Node<K, V> {
    pub(crate) key: K,
    pub(crate) value: AtomicPtr<V>,

    /// Value version; carries the `INSERTED` and `DELETED` marks.
    pub(crate) version: VersionWord,

    /// Bumped when a committed insert attaches a child here or when this
    /// node is unlinked; guards the key gaps this node bounds.
    pub(crate) node_version: VersionWord,

    left: AtomicPtr<Node<K, V>>,
    right: AtomicPtr<Node<K, V>>,
    parent: AtomicPtr<Node<K, V>>,
    red: AtomicBool,
}

impl<K, V> Node<K, V> {
    /// A detached red node.
    pub(crate) fn new(key: K, value: V, marks: u64) -> Self {
        Self {
            key,
            value: AtomicPtr::new(Box::into_raw(Box::new(value))),
            version: VersionWord::with_marks(marks),
            node_version: VersionWord::new(),
            left: AtomicPtr::new(ptr::null_mut()),
            right: AtomicPtr::new(ptr::null_mut()),
            parent: AtomicPtr::new(ptr::null_mut()),
            red: AtomicBool::new(true),
        }
    }

    #[inline]
    pub(crate) fn left(&self) -> *mut Self {
        self.left.load(READ_ORD)
    }

    #[inline]
    pub(crate) fn right(&self) -> *mut Self {
        self.right.load(READ_ORD)
    }

    #[inline]
    pub(crate) fn parent(&self) -> *mut Self {
        self.parent.load(READ_ORD)
    }

    #[inline]
    pub(crate) fn set_left(&self, n: *mut Self) {
        self.left.store(n, WRITE_ORD);
    }

    #[inline]
    pub(crate) fn set_right(&self, n: *mut Self) {
        self.right.store(n, WRITE_ORD);
    }

    #[inline]
    pub(crate) fn set_parent(&self, n: *mut Self) {
        self.parent.store(n, WRITE_ORD);
    }

    #[inline]
    pub(crate) fn is_red(&self) -> bool {
        self.red.load(READ_ORD)
    }

    #[inline]
    pub(crate) fn set_red(&self, red: bool) {
        self.red.store(red, WRITE_ORD);
    }

    /// Child on the given side (`true` = left).
    #[inline]
    pub(crate) fn child(&self, left: bool) -> *mut Self {
        if left {
            self.left()
        } else {
            self.right()
        }
    }

    #[inline]
    pub(crate) fn set_child(&self, left: bool, n: *mut Self) {
        if left {
            self.set_left(n);
        } else {
            self.set_right(n);
        }
    }
}

impl<K, V> Drop for Node<K, V> {
    fn drop(&mut self) {
        // SAFETY: the node is being freed; its value went with it.
        unsafe { reclaim::free_boxed(*self.value.get_mut()) };
    }
}
