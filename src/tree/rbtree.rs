//! Red-black tree core.
//!
//! Every structural change (attach, detach, rebalance) happens while the
//! caller holds the tree's structural [`VersionWord`], witnessed by a
//! [`LockGuard`] argument. Readers run [`RbTree::descend`] without locks and
//! validate the structural version afterwards, seqlock style; a descent that
//! runs into a half-finished rotation either fails validation or hits the
//! step bound and retries.
//!
//! Nodes move between positions but never change identity, so a node seen as
//! a gap boundary stays the same node until it is unlinked.

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::AtomicPtr;

use crate::ordering::{READ_ORD, WRITE_ORD};
use crate::reclaim;
use crate::version::{LockGuard, Version, VersionWord};

use super::node::Node;

/// Upper bound on links followed by one descent. A balanced tree of any
/// addressable size is far shallower; hitting the bound means the descent
/// raced with a restructure.
pub(crate) const MAX_DESCENT: usize = 128;

/// Where a key lives, or the gap it would fall into.
pub(crate) enum Probe<K, V> {
    Found(*mut Node<K, V>),
    /// In-order neighbours of the missing key with their node versions,
    /// read inside the same validation window. `None` at either end.
    Gap {
        pred: Option<(*mut Node<K, V>, Version)>,
        succ: Option<(*mut Node<K, V>, Version)>,
    },
    Empty,
}

/// Result of a locked search.
pub(crate) enum Slot<K, V> {
    Occupied(*mut Node<K, V>),
    /// Empty child slot of `parent` (the root slot if `parent` is null).
    Vacant { parent: *mut Node<K, V>, left: bool },
}

pub(crate) struct RbTree<K, V> {
    root: AtomicPtr<Node<K, V>>,
    structure: VersionWord,
    _marker: PhantomData<(K, V)>,
}

/// # Safety
/// `p` must be non-null and protected by a reclamation guard or by
/// exclusive access to the tree.
#[inline]
unsafe fn node<'g, K, V>(p: *mut Node<K, V>) -> &'g Node<K, V> {
    debug_assert!(!p.is_null());
    // SAFETY: forwarded from the caller.
    unsafe { &*p }
}

#[inline]
fn is_red<K, V>(p: *mut Node<K, V>) -> bool {
    // SAFETY: every non-null link points at a node protected by the
    // caller's guard.
    !p.is_null() && unsafe { node(p) }.is_red()
}

impl<K, V> RbTree<K, V> {
    pub(crate) const fn new() -> Self {
        Self {
            root: AtomicPtr::new(ptr::null_mut()),
            structure: VersionWord::new(),
            _marker: PhantomData,
        }
    }

    /// The structural lock and seqlock.
    #[inline]
    pub(crate) fn structure(&self) -> &VersionWord {
        &self.structure
    }

    #[inline]
    fn root(&self) -> *mut Node<K, V> {
        self.root.load(READ_ORD)
    }

    /// Point `parent`'s link that held `old` at `new`, or the root if
    /// `parent` is null.
    fn replace_child(&self, parent: *mut Node<K, V>, old: *mut Node<K, V>, new: *mut Node<K, V>) {
        if parent.is_null() {
            self.root.store(new, WRITE_ORD);
        } else {
            // SAFETY: structural lock held by the caller.
            let p = unsafe { node(parent) };
            p.set_child(p.left() == old, new);
        }
    }

    /// Rotate `x` down towards `left` (`true` is a left rotation).
    fn rotate(&self, x: *mut Node<K, V>, left: bool) {
        // SAFETY: structural lock held; a rotation always has a child on
        // the opposite side.
        let xn = unsafe { node(x) };
        let y = xn.child(!left);
        let yn = unsafe { node(y) };

        let inner = yn.child(left);
        xn.set_child(!left, inner);
        if !inner.is_null() {
            unsafe { node(inner).set_parent(x) };
        }
        let xp = xn.parent();
        yn.set_parent(xp);
        self.replace_child(xp, x, y);
        yn.set_child(left, x);
        xn.set_parent(y);
    }
}

impl<K: Ord, V> RbTree<K, V> {
    // ========================================================================
    //  Lock-free descent
    // ========================================================================

    /// Search for `key` without locks.
    ///
    /// Returns `None` if [`MAX_DESCENT`] links were followed without reaching
    /// a leaf. The caller must validate the structural version around the
    /// call before trusting the result.
    pub(crate) fn descend(&self, key: &K) -> Option<Probe<K, V>> {
        let mut cur = self.root();
        if cur.is_null() {
            return Some(Probe::Empty);
        }
        let mut pred: *mut Node<K, V> = ptr::null_mut();
        let mut succ: *mut Node<K, V> = ptr::null_mut();

        for _ in 0..MAX_DESCENT {
            if cur.is_null() {
                let bound = |p: *mut Node<K, V>| {
                    // SAFETY: visited during this descent; guard held.
                    (!p.is_null()).then(|| (p, unsafe { node(p) }.node_version.load()))
                };
                return Some(Probe::Gap {
                    pred: bound(pred),
                    succ: bound(succ),
                });
            }
            // SAFETY: unlinked nodes are retired, never freed, while the
            // caller's guard is held.
            let n = unsafe { node(cur) };
            match key.cmp(&n.key) {
                Ordering::Equal => return Some(Probe::Found(cur)),
                Ordering::Less => {
                    succ = cur;
                    cur = n.left();
                }
                Ordering::Greater => {
                    pred = cur;
                    cur = n.right();
                }
            }
        }
        None
    }

    // ========================================================================
    //  Locked operations
    // ========================================================================

    /// Where `key` is, or where it would be attached, while holding the
    /// structural lock.
    pub(crate) fn locate(&self, _held: &LockGuard<'_>, key: &K) -> Slot<K, V> {
        let mut parent: *mut Node<K, V> = ptr::null_mut();
        let mut left = false;
        let mut cur = self.root();
        while !cur.is_null() {
            // SAFETY: structure frozen by the held lock.
            let n = unsafe { node(cur) };
            parent = cur;
            match key.cmp(&n.key) {
                Ordering::Equal => return Slot::Occupied(cur),
                Ordering::Less => {
                    left = true;
                    cur = n.left();
                }
                Ordering::Greater => {
                    left = false;
                    cur = n.right();
                }
            }
        }
        Slot::Vacant { parent, left }
    }

    /// Link a detached node at a slot returned by [`RbTree::locate`] under
    /// the same lock hold, then rebalance.
    pub(crate) fn attach_at(
        &self,
        _held: &LockGuard<'_>,
        fresh: *mut Node<K, V>,
        parent: *mut Node<K, V>,
        left: bool,
    ) {
        // SAFETY: `fresh` is owned by the caller and not yet published.
        let f = unsafe { node(fresh) };
        f.set_left(ptr::null_mut());
        f.set_right(ptr::null_mut());
        f.set_parent(parent);
        f.set_red(true);
        if parent.is_null() {
            self.root.store(fresh, WRITE_ORD);
        } else {
            // SAFETY: `parent` is linked; structure frozen by the held lock.
            unsafe { node(parent).set_child(left, fresh) };
        }
        self.insert_fixup(fresh);
    }

    /// Link a detached node and rebalance.
    ///
    /// Returns the node it was attached under (null if the tree was empty),
    /// or `Err` with the node already holding the same key.
    #[cfg(test)]
    fn attach(
        &self,
        held: &LockGuard<'_>,
        fresh: *mut Node<K, V>,
    ) -> Result<*mut Node<K, V>, *mut Node<K, V>> {
        // SAFETY: `fresh` is owned by the caller.
        match self.locate(held, &unsafe { node(fresh) }.key) {
            Slot::Occupied(existing) => Err(existing),
            Slot::Vacant { parent, left } => {
                self.attach_at(held, fresh, parent, left);
                Ok(parent)
            }
        }
    }

    fn insert_fixup(&self, mut z: *mut Node<K, V>) {
        // SAFETY (whole loop): structural lock held; a red parent is never
        // the root, so the grandparent exists.
        loop {
            let p = unsafe { node(z) }.parent();
            if !is_red(p) {
                break;
            }
            let g = unsafe { node(p) }.parent();
            let gn = unsafe { node(g) };
            let p_left = gn.left() == p;
            let uncle = gn.child(!p_left);

            if is_red(uncle) {
                unsafe { node(p).set_red(false) };
                unsafe { node(uncle).set_red(false) };
                gn.set_red(true);
                z = g;
                continue;
            }

            if z == unsafe { node(p) }.child(!p_left) {
                z = p;
                self.rotate(z, p_left);
            }
            let p = unsafe { node(z) }.parent();
            let g = unsafe { node(p) }.parent();
            unsafe { node(p).set_red(false) };
            unsafe { node(g).set_red(true) };
            self.rotate(g, !p_left);
        }
        let root = self.root();
        if !root.is_null() {
            // SAFETY: root is linked.
            unsafe { node(root).set_red(false) };
        }
    }

    /// Unlink `z` and rebalance. `z` keeps its own links, so a reader
    /// standing on it can still walk off it.
    pub(crate) fn detach(&self, _held: &LockGuard<'_>, z: *mut Node<K, V>) {
        // SAFETY (whole function): `z` is linked and the structure is frozen
        // by the held lock.
        let zn = unsafe { node(z) };
        let x: *mut Node<K, V>;
        let x_parent: *mut Node<K, V>;
        let removed_red: bool;

        if zn.left().is_null() || zn.right().is_null() {
            removed_red = zn.is_red();
            x = if zn.left().is_null() { zn.right() } else { zn.left() };
            x_parent = zn.parent();
            self.replace_child(zn.parent(), z, x);
            if !x.is_null() {
                unsafe { node(x).set_parent(x_parent) };
            }
        } else {
            let mut y = zn.right();
            while !unsafe { node(y) }.left().is_null() {
                y = unsafe { node(y) }.left();
            }
            let yn = unsafe { node(y) };
            removed_red = yn.is_red();
            x = yn.right();

            if yn.parent() == z {
                x_parent = y;
            } else {
                x_parent = yn.parent();
                unsafe { node(x_parent).set_left(x) };
                if !x.is_null() {
                    unsafe { node(x).set_parent(x_parent) };
                }
                yn.set_right(zn.right());
                unsafe { node(zn.right()).set_parent(y) };
            }
            yn.set_left(zn.left());
            unsafe { node(zn.left()).set_parent(y) };
            yn.set_parent(zn.parent());
            self.replace_child(zn.parent(), z, y);
            yn.set_red(zn.is_red());
        }

        if !removed_red {
            self.delete_fixup(x, x_parent);
        }
    }

    fn delete_fixup(&self, mut x: *mut Node<K, V>, mut x_parent: *mut Node<K, V>) {
        // SAFETY (whole loop): structural lock held. A doubly-black `x`
        // always has a non-null sibling.
        while x != self.root() && !is_red(x) {
            let pn = unsafe { node(x_parent) };
            let x_left = pn.left() == x;
            let mut w = pn.child(!x_left);

            if is_red(w) {
                unsafe { node(w).set_red(false) };
                pn.set_red(true);
                self.rotate(x_parent, x_left);
                w = pn.child(!x_left);
            }

            let wn = unsafe { node(w) };
            if !is_red(wn.left()) && !is_red(wn.right()) {
                wn.set_red(true);
                x = x_parent;
                x_parent = pn.parent();
                continue;
            }

            if !is_red(wn.child(!x_left)) {
                unsafe { node(wn.child(x_left)).set_red(false) };
                wn.set_red(true);
                self.rotate(w, !x_left);
                w = pn.child(!x_left);
            }
            let wn = unsafe { node(w) };
            wn.set_red(pn.is_red());
            pn.set_red(false);
            let far = wn.child(!x_left);
            if !far.is_null() {
                unsafe { node(far).set_red(false) };
            }
            self.rotate(x_parent, x_left);
            x = self.root();
            break;
        }
        if !x.is_null() {
            // SAFETY: linked node.
            unsafe { node(x).set_red(false) };
        }
    }

    /// In-order walk while holding the structural lock.
    pub(crate) fn for_each(&self, _held: &LockGuard<'_>, mut f: impl FnMut(&Node<K, V>)) {
        let mut stack = Vec::new();
        let mut cur = self.root();
        while !cur.is_null() || !stack.is_empty() {
            while !cur.is_null() {
                stack.push(cur);
                // SAFETY: structure frozen by the held lock.
                cur = unsafe { node(cur) }.left();
            }
            if let Some(top) = stack.pop() {
                // SAFETY: as above.
                let n = unsafe { node(top) };
                f(n);
                cur = n.right();
            }
        }
    }

    /// Check ordering, parent links and red-black balance.
    ///
    /// Returns the number of linked nodes.
    pub(crate) fn validate(&self, _held: &LockGuard<'_>) -> Result<usize, String> {
        let root = self.root();
        if root.is_null() {
            return Ok(0);
        }
        // SAFETY: structure frozen by the held lock.
        let r = unsafe { node(root) };
        if r.is_red() {
            return Err("red root".into());
        }
        if !r.parent().is_null() {
            return Err("root has a parent".into());
        }
        let mut count = 0;
        Self::validate_subtree(root, None, None, &mut count)?;
        Ok(count)
    }

    /// Returns the black height of the subtree.
    fn validate_subtree(
        p: *mut Node<K, V>,
        lo: Option<&K>,
        hi: Option<&K>,
        count: &mut usize,
    ) -> Result<usize, String> {
        if p.is_null() {
            return Ok(1);
        }
        *count += 1;
        // SAFETY: structure frozen by the caller's lock.
        let n = unsafe { node(p) };
        if lo.is_some_and(|lo| n.key <= *lo) || hi.is_some_and(|hi| n.key >= *hi) {
            return Err("keys out of order".into());
        }
        for child in [n.left(), n.right()] {
            if !child.is_null() {
                // SAFETY: as above.
                let c = unsafe { node(child) };
                if c.parent() != p {
                    return Err("broken parent link".into());
                }
                if n.is_red() && c.is_red() {
                    return Err("red node with red child".into());
                }
            }
        }
        let left = Self::validate_subtree(n.left(), lo, Some(&n.key), count)?;
        let right = Self::validate_subtree(n.right(), Some(&n.key), hi, count)?;
        if left != right {
            return Err(format!("black height mismatch ({left} vs {right})"));
        }
        Ok(left + usize::from(!n.is_red()))
    }
}

impl<K, V> Drop for RbTree<K, V> {
    fn drop(&mut self) {
        let mut stack = vec![*self.root.get_mut()];
        while let Some(p) = stack.pop() {
            if p.is_null() {
                continue;
            }
            // SAFETY: exclusive access; every linked node is owned by the
            // tree and was never retired.
            let n = unsafe { node(p) };
            stack.push(n.left());
            stack.push(n.right());
            unsafe { reclaim::free_boxed(p) };
        }
    }
}
