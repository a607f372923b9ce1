//! Tree engine: root pointer, descent/locking discipline, and the
//! insert/search/remove/rebalance algorithms.

pub mod config;

use crate::{
    cache::{Cache, Handle},
    error::{unreachable_corruption, Error, Result},
    nid::NodeId,
    node::{index::IndexNode, leaf::LeafNode, Node},
    size::FixedSize,
};
use log::trace;
use parking_lot::{ArcRwLockWriteGuard, RawRwLock, RwLock};
use std::fmt::Write as _;

pub use config::TreeConfig;

/// One entry of the captured access path: the node's current
/// NID, a handle to mark it dirty without re-locking, the held write guard,
/// and — for every frame but the root — the slot index this node occupies
/// in its parent, so a later rebalance doesn't have to re-probe for it.
struct Frame<K, V> {
    nid: NodeId,
    handle: Handle<K, V>,
    guard: ArcRwLockWriteGuard<RawRwLock, Node<K, V>>,
    child_slot: Option<usize>,
}

/// An embeddable, cache-backed B+-tree index.
///
/// `degree` bounds node fan-out; every non-root node holds between
/// `⌈degree/2⌉` and `degree` keys or pivots.
pub struct Tree<K, V, C> {
    degree: usize,
    root: RwLock<Option<NodeId>>,
    cache: C,
    _marker: std::marker::PhantomData<(K, V)>,
}

fn insert_safe<K, N>(idx: &IndexNode<K, N>, degree: usize) -> bool
where
    K: FixedSize + Ord + Clone,
    N: FixedSize + Clone,
{
    idx.n_pivots() + 1 <= degree
}

fn remove_safe<K, N>(idx: &IndexNode<K, N>, degree: usize) -> bool
where
    K: FixedSize + Ord + Clone,
    N: FixedSize + Clone,
{
    idx.n_pivots() > degree.div_ceil(2) + 1
}

/// Always-safe predicate used for search: nothing below a search ever needs
/// bubble-up, so ancestors can be released the moment a child is locked.
fn always_safe<K, N>(_idx: &IndexNode<K, N>, _degree: usize) -> bool {
    true
}

impl<K, V, C> Tree<K, V, C>
where
    K: FixedSize + Ord + Clone,
    V: FixedSize + Clone,
    C: Cache<K, V>,
{
    /// Builds a tree over an existing cache. The tree starts without a root;
    /// call [`Tree::init`] before the first insert.
    pub fn new(degree: usize, cache: C) -> Result<Self> {
        if degree < 3 {
            return Err(Error::Config("degree must be >= 3".into()));
        }
        Ok(Tree {
            degree,
            root: RwLock::new(None),
            cache,
            _marker: std::marker::PhantomData,
        })
    }

    /// Builds a tree from a validated [`TreeConfig`].
    pub fn from_config(config: TreeConfig, cache: C) -> Result<Self> {
        config.validate()?;
        Self::new(config.degree, cache)
    }

    /// Creates the initial empty root, a leaf node. A no-op if the tree
    /// already has a root.
    pub fn init(&self) -> Result<()> {
        let mut root = self.root.write();
        if root.is_some() {
            return Ok(());
        }
        let (nid, _handle) = self.cache.create(Node::Leaf(LeafNode::new()))?;
        *root = Some(nid);
        Ok(())
    }

    /// Descends from the root to a leaf, applying lock coupling with
    /// `safe` deciding when ancestor locks can be released. Returns the
    /// captured access path (innermost frame last, always a leaf) plus the
    /// full descent order for the cache's reorder hint.
    fn descend(
        &self,
        key: &K,
        safe: fn(&IndexNode<K, NodeId>, usize) -> bool,
    ) -> Result<(Vec<Frame<K, V>>, Vec<NodeId>)> {
        let mut root_guard = self.root.write();
        let root_nid = root_guard.ok_or(Error::Corrupt("tree has no root; call Tree::init first"))?;
        let (handle, maybe_new) = self.cache.fetch(root_nid)?;
        let guard = handle.write();
        let mut current_nid = root_nid;
        if let Some(new_nid) = maybe_new {
            *root_guard = Some(new_nid);
            current_nid = new_nid;
        }
        drop(root_guard);

        let mut access_list = vec![current_nid];
        let mut path = vec![Frame {
            nid: current_nid,
            handle,
            guard,
            child_slot: None,
        }];

        loop {
            if path.last().unwrap().guard.is_leaf() {
                break;
            }

            let (child_i, child_nid) = {
                let frame = path.last_mut().unwrap();
                match &mut *frame.guard {
                    Node::Index(idx_node) => {
                        let i = idx_node.child_index_for(key);
                        (i, idx_node.child_at_index(i))
                    }
                    Node::Leaf(_) => unreachable_corruption("expected index node mid-descent"),
                }
            };

            let (child_handle, maybe_new_child) = self.cache.fetch(child_nid)?;
            let child_guard = child_handle.write();
            let mut resolved_nid = child_nid;
            if let Some(new_nid) = maybe_new_child {
                let frame = path.last_mut().unwrap();
                match &mut *frame.guard {
                    Node::Index(idx_node) => idx_node.set_child_at(child_i, new_nid),
                    Node::Leaf(_) => unreachable_corruption("expected index node mid-descent"),
                }
                frame.handle.mark_dirty();
                resolved_nid = new_nid;
                trace!("descend: rewrote parent slot {child_i} to {resolved_nid}");
            }

            access_list.push(resolved_nid);
            path.push(Frame {
                nid: resolved_nid,
                handle: child_handle,
                guard: child_guard,
                child_slot: Some(child_i),
            });

            let is_safe = match &*path.last().unwrap().guard {
                Node::Index(idx_node) => safe(idx_node, self.degree),
                Node::Leaf(_) => false,
            };
            if is_safe {
                let last = path.pop().unwrap();
                path = vec![last];
            }
        }

        Ok((path, access_list))
    }

    /// Inserts `(key, value)`. Rejects duplicate keys (DESIGN.md, Open
    /// Question 1). The leaf is mutated first and a sibling allocated
    /// afterward on overflow, best-effort rather than pre-checked: a failed
    /// sibling allocation can leave the leaf over-full until the next
    /// successful split (DESIGN.md, Open Question 2).
    pub fn insert(&self, key: K, value: V) -> Result<()> {
        let (mut path, access_list) = self.descend(&key, insert_safe)?;

        let leaf_frame = path.last_mut().expect("descent always yields a leaf frame");
        match &mut *leaf_frame.guard {
            Node::Leaf(leaf) => leaf.insert(key, value)?,
            Node::Index(_) => unreachable_corruption("descent ended at a non-leaf"),
        }
        leaf_frame.handle.mark_dirty();

        let mut pending = {
            let requires_split = match &*leaf_frame.guard {
                Node::Leaf(leaf) => leaf.requires_split(self.degree),
                Node::Index(_) => false,
            };
            if requires_split {
                let (right_leaf, pivot) = match &mut *leaf_frame.guard {
                    Node::Leaf(leaf) => leaf.split(),
                    Node::Index(_) => unreachable_corruption("descent ended at a non-leaf"),
                };
                let (right_nid, _right_handle) = self.cache.create(Node::Leaf(right_leaf))?;
                self.cache.reorder(&[leaf_frame.nid, right_nid]);
                Some((leaf_frame.nid, right_nid, pivot))
            } else {
                None
            }
        };

        path.pop();
        while let Some((lhs, rhs, pivot)) = pending.take() {
            let Some(frame) = path.pop() else {
                let new_root = IndexNode::new(vec![pivot], vec![lhs, rhs]);
                let (new_root_nid, _handle) = self.cache.create(Node::Index(new_root))?;
                *self.root.write() = Some(new_root_nid);
                self.cache.reorder(&[new_root_nid]);
                break;
            };
            match &mut *frame.guard {
                Node::Index(idx_node) => {
                    idx_node.insert(pivot, rhs);
                    frame.handle.mark_dirty();
                    if idx_node.requires_split(self.degree) {
                        let (right_idx, up_pivot) = idx_node.split();
                        let (right_nid, _handle) = self.cache.create(Node::Index(right_idx))?;
                        self.cache.reorder(&[frame.nid, right_nid]);
                        pending = Some((frame.nid, right_nid, up_pivot));
                    }
                }
                Node::Leaf(_) => unreachable_corruption("unwind hit a leaf above the insert point"),
            }
        }

        self.cache.reorder(&access_list);
        Ok(())
    }

    /// Looks up `key`. The descent's NID rewrites are still applied to
    /// parents; no leaf mutation occurs.
    pub fn search(&self, key: &K) -> Result<V> {
        let (mut path, access_list) = self.descend(key, always_safe)?;
        let leaf_frame = path.last_mut().expect("descent always yields a leaf frame");
        let result = match &*leaf_frame.guard {
            Node::Leaf(leaf) => leaf.get(key).cloned().ok_or(Error::KeyDoesNotExist),
            Node::Index(_) => unreachable_corruption("descent ended at a non-leaf"),
        };
        self.cache.reorder(&access_list);
        result
    }

    /// Removes `key`. On `Error::KeyDoesNotExist` the tree is left
    /// unmodified — no I/O or structural mutation occurred.
    pub fn remove(&self, key: K) -> Result<V> {
        let (mut path, access_list) = self.descend(&key, remove_safe)?;

        let leaf_frame = path.last_mut().expect("descent always yields a leaf frame");
        let removed = match &mut *leaf_frame.guard {
            Node::Leaf(leaf) => leaf.remove(&key)?,
            Node::Index(_) => unreachable_corruption("descent ended at a non-leaf"),
        };
        leaf_frame.handle.mark_dirty();

        let requires_merge = match &*leaf_frame.guard {
            Node::Leaf(leaf) => leaf.requires_merge(self.degree),
            Node::Index(_) => false,
        };
        let Frame {
            nid: leaf_nid,
            handle: leaf_handle,
            guard: leaf_guard,
            child_slot: leaf_slot,
        } = path.pop().expect("descent always yields a leaf frame");

        // `to_delete` carries the NID of a sibling consumed by a merge one
        // level down, so the parent loop can both erase its own slot for
        // that sibling and decide whether IT now requires a merge.
        let mut to_delete: Option<NodeId> = None;
        if requires_merge {
            if let (Some(parent), Some(i)) = (path.last_mut(), leaf_slot) {
                match &mut *parent.guard {
                    Node::Index(parent_idx) => {
                        to_delete =
                            self.rebalance_leaf(parent_idx, i, leaf_nid, &leaf_handle, leaf_guard)?;
                        parent.handle.mark_dirty();
                    }
                    Node::Leaf(_) => unreachable_corruption("parent frame held a leaf"),
                }
            }
        }
        if let Some(dead) = to_delete {
            self.cache.remove(dead)?;
        }

        while let Some(frame) = path.pop() {
            let child_requires_merge = match &*frame.guard {
                Node::Index(idx_node) => idx_node.requires_merge(self.degree),
                Node::Leaf(_) => false,
            };
            if !child_requires_merge {
                break;
            }
            let Frame {
                nid: child_nid,
                handle: child_handle,
                guard: child_guard,
                child_slot,
            } = frame;
            let Some(parent) = path.last_mut() else {
                break;
            };
            let Some(i) = child_slot else { break };
            let dead = match &mut *parent.guard {
                Node::Index(parent_idx) => {
                    let merged_away =
                        self.rebalance_index(parent_idx, i, child_nid, &child_handle, child_guard)?;
                    parent.handle.mark_dirty();
                    merged_away
                }
                Node::Leaf(_) => unreachable_corruption("parent frame held a leaf"),
            };
            if let Some(dead) = dead {
                self.cache.remove(dead)?;
            }
        }

        // The unwind loop above breaks as soon as a popped frame doesn't
        // require a merge, which leaves every frame still above it in
        // `path` (possibly including the root) holding its write guard.
        // `maybe_collapse_root` re-fetches and locks the root itself, so
        // those guards must be released first or a non-cascading remove
        // would deadlock on its own root lock.
        drop(path);
        self.maybe_collapse_root()?;

        self.cache.reorder(&access_list);
        Ok(removed)
    }

    /// Rebalances a leaf that dropped under-fill against a sibling chosen by
    /// its slot in `parent`. Returns the sibling's NID if
    /// it was consumed by a merge.
    fn rebalance_leaf(
        &self,
        parent: &mut IndexNode<K, NodeId>,
        i: usize,
        child_nid: NodeId,
        child_handle: &Handle<K, V>,
        mut child_guard: ArcRwLockWriteGuard<RawRwLock, Node<K, V>>,
    ) -> Result<Option<NodeId>> {
        if i > 0 {
            let sib_nid = parent.child_at_index(i - 1);
            let (sib_handle, maybe_new) = self.cache.fetch(sib_nid)?;
            let mut sib_guard = sib_handle.write();
            let sib_nid = if let Some(new_nid) = maybe_new {
                parent.set_child_at(i - 1, new_nid);
                new_nid
            } else {
                sib_nid
            };
            let requires_redistribute = match &*sib_guard {
                Node::Leaf(l) => l.len() > self.degree.div_ceil(2),
                Node::Index(_) => unreachable_corruption("leaf sibling was an index node"),
            };
            if requires_redistribute {
                let new_pivot = match (&mut *child_guard, &mut *sib_guard) {
                    (Node::Leaf(child), Node::Leaf(left)) => child.take_from_left(left),
                    _ => unreachable_corruption("rebalance_leaf given a non-leaf"),
                };
                parent.set_pivot(i - 1, new_pivot);
                child_handle.mark_dirty();
                sib_handle.mark_dirty();
                Ok(None)
            } else {
                let taken = std::mem::replace(&mut *child_guard, Node::Leaf(LeafNode::new()));
                match (taken, &mut *sib_guard) {
                    (Node::Leaf(taken_leaf), Node::Leaf(left)) => left.merge(taken_leaf),
                    _ => unreachable_corruption("rebalance_leaf given a non-leaf"),
                }
                sib_handle.mark_dirty();
                parent.remove_slot(i - 1, i);
                Ok(Some(child_nid))
            }
        } else {
            let sib_nid = parent.child_at_index(i + 1);
            let (sib_handle, maybe_new) = self.cache.fetch(sib_nid)?;
            let mut sib_guard = sib_handle.write();
            let sib_nid = if let Some(new_nid) = maybe_new {
                parent.set_child_at(i + 1, new_nid);
                new_nid
            } else {
                sib_nid
            };
            let requires_redistribute = match &*sib_guard {
                Node::Leaf(l) => l.len() > self.degree.div_ceil(2),
                Node::Index(_) => unreachable_corruption("leaf sibling was an index node"),
            };
            if requires_redistribute {
                let new_pivot = match (&mut *child_guard, &mut *sib_guard) {
                    (Node::Leaf(child), Node::Leaf(right)) => child.take_from_right(right),
                    _ => unreachable_corruption("rebalance_leaf given a non-leaf"),
                };
                parent.set_pivot(i, new_pivot);
                child_handle.mark_dirty();
                sib_handle.mark_dirty();
                Ok(None)
            } else {
                let taken = std::mem::replace(&mut *sib_guard, Node::Leaf(LeafNode::new()));
                match (&mut *child_guard, taken) {
                    (Node::Leaf(child), Node::Leaf(taken_leaf)) => child.merge(taken_leaf),
                    _ => unreachable_corruption("rebalance_leaf given a non-leaf"),
                }
                child_handle.mark_dirty();
                parent.remove_slot(i, i + 1);
                Ok(Some(sib_nid))
            }
        }
    }

    /// Same shape as [`Self::rebalance_leaf`] but over index-node children,
    /// rotating a pivot through `parent` instead of moving a bare key,
    /// following the classic B+-tree rebalance rules.
    fn rebalance_index(
        &self,
        parent: &mut IndexNode<K, NodeId>,
        i: usize,
        child_nid: NodeId,
        child_handle: &Handle<K, V>,
        mut child_guard: ArcRwLockWriteGuard<RawRwLock, Node<K, V>>,
    ) -> Result<Option<NodeId>> {
        if i > 0 {
            let sib_nid = parent.child_at_index(i - 1);
            let (sib_handle, maybe_new) = self.cache.fetch(sib_nid)?;
            let mut sib_guard = sib_handle.write();
            let sib_nid = if let Some(new_nid) = maybe_new {
                parent.set_child_at(i - 1, new_nid);
                new_nid
            } else {
                sib_nid
            };
            let requires_redistribute = match &*sib_guard {
                Node::Index(idx) => idx.n_pivots() > self.degree.div_ceil(2),
                Node::Leaf(_) => unreachable_corruption("index sibling was a leaf"),
            };
            if requires_redistribute {
                let parent_pivot = parent.pivot_at_index(i - 1);
                let new_pivot = match (&mut *child_guard, &mut *sib_guard) {
                    (Node::Index(child), Node::Index(left)) => child.take_from_left(left, parent_pivot),
                    _ => unreachable_corruption("rebalance_index given a leaf"),
                };
                parent.set_pivot(i - 1, new_pivot);
                child_handle.mark_dirty();
                sib_handle.mark_dirty();
                Ok(None)
            } else {
                let parent_pivot = parent.pivot_at_index(i - 1);
                let taken = std::mem::replace(&mut *child_guard, Node::Index(IndexNode::new(vec![], vec![])));
                match (taken, &mut *sib_guard) {
                    (Node::Index(taken_idx), Node::Index(left)) => left.merge(parent_pivot, taken_idx),
                    _ => unreachable_corruption("rebalance_index given a leaf"),
                }
                sib_handle.mark_dirty();
                parent.remove_slot(i - 1, i);
                Ok(Some(child_nid))
            }
        } else {
            let sib_nid = parent.child_at_index(i + 1);
            let (sib_handle, maybe_new) = self.cache.fetch(sib_nid)?;
            let mut sib_guard = sib_handle.write();
            let sib_nid = if let Some(new_nid) = maybe_new {
                parent.set_child_at(i + 1, new_nid);
                new_nid
            } else {
                sib_nid
            };
            let requires_redistribute = match &*sib_guard {
                Node::Index(idx) => idx.n_pivots() > self.degree.div_ceil(2),
                Node::Leaf(_) => unreachable_corruption("index sibling was a leaf"),
            };
            if requires_redistribute {
                let parent_pivot = parent.pivot_at_index(i);
                let new_pivot = match (&mut *child_guard, &mut *sib_guard) {
                    (Node::Index(child), Node::Index(right)) => child.take_from_right(right, parent_pivot),
                    _ => unreachable_corruption("rebalance_index given a leaf"),
                };
                parent.set_pivot(i, new_pivot);
                child_handle.mark_dirty();
                sib_handle.mark_dirty();
                Ok(None)
            } else {
                let parent_pivot = parent.pivot_at_index(i);
                let taken = std::mem::replace(&mut *sib_guard, Node::Index(IndexNode::new(vec![], vec![])));
                match (&mut *child_guard, taken) {
                    (Node::Index(child), Node::Index(taken_idx)) => child.merge(parent_pivot, taken_idx),
                    _ => unreachable_corruption("rebalance_index given a leaf"),
                }
                child_handle.mark_dirty();
                parent.remove_slot(i, i + 1);
                Ok(Some(sib_nid))
            }
        }
    }

    /// Replaces the root with its sole child if the root index node was
    /// merged down to zero pivots.
    fn maybe_collapse_root(&self) -> Result<()> {
        let mut root_guard = self.root.write();
        let Some(root_nid) = *root_guard else { return Ok(()) };
        let (handle, maybe_new) = self.cache.fetch(root_nid)?;
        let guard = handle.write();
        let root_nid = maybe_new.unwrap_or(root_nid);
        let sole_child = match &*guard {
            Node::Index(idx) if idx.n_pivots() == 0 => Some(idx.child_at_index(0)),
            _ => None,
        };
        drop(guard);
        if let Some(child_nid) = sole_child {
            *root_guard = Some(child_nid);
            drop(root_guard);
            self.cache.remove(root_nid)?;
        }
        Ok(())
    }

    /// Persists every dirty node.
    pub fn flush(&self) -> Result<()> {
        self.cache.flush()
    }

    /// `(resident, mapped)` node counts.
    pub fn cache_state(&self) -> (usize, usize) {
        self.cache.cache_state()
    }

    /// Debug-only tree dump, not a stable interface.
    pub fn print<W: std::fmt::Write>(&self, w: &mut W) -> Result<()> {
        let root_guard = self.root.read();
        match *root_guard {
            None => writeln!(w, "<empty tree>").map_err(|_| Error::Corrupt("print failed")),
            Some(root_nid) => {
                drop(root_guard);
                self.print_node(w, root_nid, 0)
            }
        }
    }

    fn print_node<W: std::fmt::Write>(&self, w: &mut W, nid: NodeId, depth: usize) -> Result<()> {
        let (handle, _maybe_new) = self.cache.fetch(nid)?;
        let guard = handle.read();
        let indent = "  ".repeat(depth);
        match &*guard {
            Node::Leaf(leaf) => {
                let _ = writeln!(w, "{indent}leaf {nid} keys={:?}", leaf.keys());
                Ok(())
            }
            Node::Index(idx) => {
                let _ = writeln!(w, "{indent}index {nid} pivots={}", idx.n_pivots());
                let n = idx.n_pivots();
                let children: Vec<NodeId> = (0..=n).map(|i| idx.child_at_index(i)).collect();
                drop(guard);
                for child in children {
                    self.print_node(w, child, depth + 1)?;
                }
                Ok(())
            }
        }
    }
}
