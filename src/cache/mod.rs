//! The cache contract the tree engine depends on.
//!
//! The tree never touches node memory directly; every access to a node's
//! data goes through a [`Handle`] obtained from [`Cache::fetch`] or
//! [`Cache::create`]: `create`/`fetch` play the role a DML layer's
//! `insert_and_get_mut`/`get_mut` would, `reorder` plays the role of the
//! implicit LRU bump a `get` performs, and `flush` plays `write_back`. The
//! handle's inner lock shape (a per-node `RwLock` plus dirty flag) is pinned
//! here rather than left to an associated type, since there is exactly one
//! implementor pair in this crate (`MemoryCache`/`FileStore`).

pub mod file_store;
pub mod memory;

use crate::{error::Result, nid::NodeId, node::Node, size::FixedSize};
use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock, RwLock};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// A resident node's lock plus its dirty flag, owned as two `Arc`s so that
/// descent's lock coupling can hold an owned write guard in a `Vec`
/// across loop iterations instead of borrowing from a handle that lives
/// alongside it — the classic self-referential-struct trap. `Slot` is the
/// arena-table-internal name for exactly the same pair [`Handle`] clones.
pub struct Slot<K, V> {
    lock: Arc<RwLock<Node<K, V>>>,
    dirty: Arc<AtomicBool>,
}

impl<K, V> Clone for Slot<K, V> {
    fn clone(&self) -> Self {
        Slot {
            lock: self.lock.clone(),
            dirty: self.dirty.clone(),
        }
    }
}

impl<K: FixedSize + Ord + Clone, V: FixedSize + Clone> Slot<K, V> {
    pub fn new(node: Node<K, V>, dirty: bool) -> Self {
        Slot {
            lock: Arc::new(RwLock::new(node)),
            dirty: Arc::new(AtomicBool::new(dirty)),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, Node<K, V>> {
        self.lock.read()
    }

    /// Write access without touching the dirty flag. Used by the cache
    /// itself for bookkeeping (flush's batch NID rewrite, eviction) where
    /// dirty state is managed explicitly around the call, unlike
    /// [`Handle::write`] which always implies a caller-initiated mutation.
    pub fn write_raw(&self) -> parking_lot::RwLockWriteGuard<'_, Node<K, V>> {
        self.lock.write()
    }

    pub fn handle(&self) -> Handle<K, V> {
        Handle {
            lock: self.lock.clone(),
            dirty: self.dirty.clone(),
        }
    }
}

/// A handle to a resident node. Dropping it releases any guard taken from it
/// but does not evict the node; eviction is the cache's own business.
pub struct Handle<K, V> {
    lock: Arc<RwLock<Node<K, V>>>,
    dirty: Arc<AtomicBool>,
}

impl<K: FixedSize + Ord + Clone, V: FixedSize + Clone> Handle<K, V> {
    pub fn read(&self) -> ArcRwLockReadGuard<RawRwLock, Node<K, V>> {
        parking_lot::RwLock::read_arc(&self.lock)
    }

    /// Acquires the node's exclusive lock — taken even by pure search,
    /// because descent may need to rewrite a parent's child slot. Returns
    /// an owned guard so the tree's descent can keep it alive in the
    /// access-path stack. Does NOT by itself mark the node dirty — only an
    /// actual content change
    /// (insert, split, merge, NID rewrite) should do that, via
    /// [`Handle::mark_dirty`].
    pub fn write(&self) -> ArcRwLockWriteGuard<RawRwLock, Node<K, V>> {
        parking_lot::RwLock::write_arc(&self.lock)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }
}

impl<K, V> Clone for Handle<K, V> {
    fn clone(&self) -> Self {
        Handle {
            lock: self.lock.clone(),
            dirty: self.dirty.clone(),
        }
    }
}

/// The cache contract the tree engine depends on. The tree owns the
/// configured degree and the root NID; everything else about node residency
/// belongs to the cache.
pub trait Cache<K, V>
where
    K: FixedSize + Ord + Clone,
    V: FixedSize + Clone,
{
    /// Allocates a fresh node of the given kind, returning its identifier
    /// and a handle to it. The returned node starts dirty: it exists only
    /// in-cache until flushed.
    fn create(&self, node: Node<K, V>) -> Result<(NodeId, Handle<K, V>)>;

    /// Returns a handle to the node named by `nid`. If the cache has
    /// re-identified the node since the last fetch (e.g. paged it in from
    /// disk under a new NID), also returns the new NID; the caller MUST
    /// rewrite the parent's child slot while still holding the parent lock.
    fn fetch(&self, nid: NodeId) -> Result<(Handle<K, V>, Option<NodeId>)>;

    /// Releases the node and reclaims its storage slot. Callers MUST hold no
    /// other handle to it.
    fn remove(&self, nid: NodeId) -> Result<()>;

    /// Hints that the listed NIDs were just accessed, in descent order, so
    /// the replacement policy can keep newly created nodes adjacent to their
    /// originator.
    fn reorder(&self, access_list: &[NodeId]);

    /// Persists dirty nodes. Rewrites every outgoing child NID reference
    /// within the flushed batch using the old -> new NID map produced by
    /// assigning persistent NIDs, so cross-references stay consistent
    /// between flushed and not-yet-flushed nodes.
    fn flush(&self) -> Result<()>;

    /// Observability: `(resident, mapped)` node counts, surfaced by
    /// `Tree::cache_state`.
    fn cache_state(&self) -> (usize, usize);
}
