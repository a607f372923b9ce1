//! Index node: `pivots` (K·n) and `children` (NID·(n+1)), with a dual
//! raw/materialized representation (see DESIGN.md, "Dual representation of
//! index nodes").

use crate::{
    error::{unreachable_corruption, Error, Result},
    size::FixedSize,
    sorted::{lower_bound, upper_bound},
};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::{
    io::{self, Read, Write},
    sync::Arc,
    time::{Duration, Instant},
};

pub(crate) const INDEX_KIND_TAG: u8 = 2;

/// Elapsed-time window under which consecutive reads count toward the
/// materialization heuristic.
pub const HOT_ACCESS_WINDOW: Duration = Duration::from_micros(100);
/// Number of hot-window reads that forces materialization.
pub const HOT_ACCESS_LIMIT: u32 = 10;

struct RawView<K> {
    buf: Arc<[u8]>,
    n: usize,
    access_count: u32,
    last_access: Instant,
    _marker: std::marker::PhantomData<K>,
}

impl<K> RawView<K> {
    fn pivot_offset(n: usize, i: usize, k_size: usize) -> usize {
        let _ = n;
        3 + i * k_size
    }

    fn child_offset(n: usize, i: usize, k_size: usize, nid_size: usize) -> usize {
        3 + n * k_size + i * nid_size
    }
}

enum Repr<K, N> {
    Raw(RawView<K>),
    Materialized { pivots: Vec<K>, children: Vec<N> },
}

/// `pivots` (K·n) and `children` (NID·(n+1)).
pub struct IndexNode<K, N> {
    repr: Repr<K, N>,
}

impl<K: FixedSize + Ord + Clone, N: FixedSize + Clone> IndexNode<K, N> {
    pub fn new(pivots: Vec<K>, children: Vec<N>) -> Self {
        debug_assert_eq!(children.len(), pivots.len() + 1);
        IndexNode {
            repr: Repr::Materialized { pivots, children },
        }
    }

    /// Wrap an encoded buffer as a zero-copy raw view: the alternate form
    /// for a node just read from storage, deferring the byte-by-byte parse
    /// until something actually needs the pivots/children as values.
    pub fn from_raw_buffer(buf: Arc<[u8]>) -> io::Result<Self> {
        if buf.len() < 3 || buf[0] != INDEX_KIND_TAG {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "index node kind tag mismatch",
            ));
        }
        let n = LittleEndian::read_u16(&buf[1..3]) as usize;
        let expected = 3 + n * K::SIZE + (n + 1) * N::SIZE;
        if buf.len() < expected {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated index node buffer",
            ));
        }
        Ok(IndexNode {
            repr: Repr::Raw(RawView {
                buf,
                n,
                access_count: 0,
                last_access: Instant::now(),
                _marker: std::marker::PhantomData,
            }),
        })
    }

    pub fn is_materialized(&self) -> bool {
        matches!(self.repr, Repr::Materialized { .. })
    }

    pub fn n_pivots(&self) -> usize {
        match &self.repr {
            Repr::Raw(r) => r.n,
            Repr::Materialized { pivots, .. } => pivots.len(),
        }
    }

    fn pivot_at(&self, i: usize) -> K {
        match &self.repr {
            Repr::Raw(r) => {
                let off = RawView::<K>::pivot_offset(r.n, i, K::SIZE);
                K::from_bytes(&r.buf[off..off + K::SIZE])
            }
            Repr::Materialized { pivots, .. } => pivots[i].clone(),
        }
    }

    fn child_at(&self, i: usize) -> N {
        match &self.repr {
            Repr::Raw(r) => {
                let off = RawView::<K>::child_offset(r.n, i, K::SIZE, N::SIZE);
                N::from_bytes(&r.buf[off..off + N::SIZE])
            }
            Repr::Materialized { children, .. } => children[i].clone(),
        }
    }

    /// Transition raw -> materialized, one-way for this node's lifetime.
    /// Any mutating operation must call this first.
    pub fn materialize(&mut self) {
        if let Repr::Raw(r) = &self.repr {
            let mut pivots = Vec::with_capacity(r.n);
            let mut children = Vec::with_capacity(r.n + 1);
            for i in 0..r.n {
                pivots.push(self.pivot_at(i));
            }
            for i in 0..=r.n {
                children.push(self.child_at(i));
            }
            self.repr = Repr::Materialized { pivots, children };
        }
    }

    /// Record a read against the hot-access heuristic (design default: a
    /// 100µs window, materializing after 10 accesses inside that window);
    /// materializes if the threshold is reached. A no-op once materialized.
    fn record_access(&mut self) {
        let should_materialize = if let Repr::Raw(r) = &mut self.repr {
            let now = Instant::now();
            if now.duration_since(r.last_access) < HOT_ACCESS_WINDOW {
                r.access_count += 1;
            } else {
                r.access_count = 1;
            }
            r.last_access = now;
            r.access_count >= HOT_ACCESS_LIMIT
        } else {
            false
        };
        if should_materialize {
            self.materialize();
        }
    }

    fn pivots_materialized(&self) -> &[K] {
        match &self.repr {
            Repr::Materialized { pivots, .. } => pivots,
            Repr::Raw(_) => unreachable_corruption("pivots accessed before materialization"),
        }
    }

    /// `upper_bound(pivots, k)`: index of the first pivot strictly greater
    /// than `k`, or `pivots.len()` if none.
    pub fn child_index_for(&mut self, key: &K) -> usize {
        self.record_access();
        match &self.repr {
            Repr::Materialized { pivots, .. } => upper_bound(pivots, key),
            Repr::Raw(r) => {
                // Binary search directly over the raw buffer; avoids a copy
                // for the common read-only descent path.
                let mut lo = 0usize;
                let mut hi = r.n;
                while lo < hi {
                    let mid = (lo + hi) / 2;
                    if self.pivot_at(mid) <= *key {
                        lo = mid + 1;
                    } else {
                        hi = mid;
                    }
                }
                lo
            }
        }
    }

    pub fn child_for(&mut self, key: &K) -> N {
        let i = self.child_index_for(key);
        self.child_at(i)
    }

    pub fn child_at_index(&self, i: usize) -> N {
        self.child_at(i)
    }

    /// Rewrites `children[i]` directly. Used when the caller already knows
    /// the slot index (e.g. flush's batch rewrite, which iterates every
    /// slot) and doesn't need the key-probing lookup `update_child_nid`
    /// performs.
    pub fn set_child_at(&mut self, i: usize, new: N) {
        self.materialize();
        if let Repr::Materialized { children, .. } = &mut self.repr {
            children[i] = new;
        }
    }

    pub fn pivot_at_index(&self, i: usize) -> K {
        self.pivot_at(i)
    }

    /// `i = lower_bound(pivots, pivot_k)`; insert pivot at `pivots[i]`,
    /// insert child at `children[i+1]`. `new_child` is the right sibling
    /// produced by splitting `children[i]`.
    pub fn insert(&mut self, pivot_key: K, new_child: N) {
        self.materialize();
        let i = match &self.repr {
            Repr::Materialized { pivots, .. } => lower_bound(pivots, &pivot_key),
            Repr::Raw(_) => unreachable!(),
        };
        if let Repr::Materialized { pivots, children } = &mut self.repr {
            pivots.insert(i, pivot_key);
            children.insert(i + 1, new_child);
        }
    }

    pub fn requires_split(&self, degree: usize) -> bool {
        self.n_pivots() > degree
    }

    pub fn requires_merge(&self, degree: usize) -> bool {
        self.n_pivots() <= degree.div_ceil(2)
    }

    /// `let m = pivots.len() / 2`; truncates self to pivots `[0,m)` and
    /// children `[0,m+1)`. Returns `pivots[m]` to promote to the parent; it
    /// is kept in neither child.
    pub fn split(&mut self) -> (IndexNode<K, N>, K) {
        self.materialize();
        let (pivots, children) = match &mut self.repr {
            Repr::Materialized { pivots, children } => (pivots, children),
            Repr::Raw(_) => unreachable!(),
        };
        let m = pivots.len() / 2;
        let pivot_up = pivots[m].clone();
        let right_pivots = pivots.split_off(m + 1);
        pivots.truncate(m);
        let right_children = children.split_off(m + 1);
        (IndexNode::new(right_pivots, right_children), pivot_up)
    }

    /// Locate the slot via `upper_bound(pivots, first_key_of(child))`;
    /// assert the found slot equals `old`, rewrite to `new`. Used after
    /// cache-driven NID rewrites: the caller supplies the first reachable
    /// key of the rewritten child so the slot can be located without
    /// trusting the (possibly stale) NID itself.
    pub fn update_child_nid(&mut self, first_key_of_child: &K, old: &N, new: N) -> Result<()>
    where
        N: PartialEq,
    {
        self.materialize();
        let idx = self.child_index_for(first_key_of_child);
        match &mut self.repr {
            Repr::Materialized { children, .. } => {
                if children[idx] != *old {
                    return Err(Error::Corrupt(
                        "update_child_nid: expected NID not found in parent's slot",
                    ));
                }
                children[idx] = new;
                Ok(())
            }
            Repr::Raw(_) => unreachable!(),
        }
    }

    /// Delete the pivot/child pair at the given slot (used after a
    /// left-sibling merge collapses `children[i]` into `children[i-1]`:
    /// erase `pivots[i-1]` and `children[i]`).
    pub fn remove_slot(&mut self, pivot_idx: usize, child_idx: usize) {
        self.materialize();
        if let Repr::Materialized { pivots, children } = &mut self.repr {
            pivots.remove(pivot_idx);
            children.remove(child_idx);
        }
    }

    pub fn set_pivot(&mut self, idx: usize, pivot: K) {
        self.materialize();
        if let Repr::Materialized { pivots, .. } = &mut self.repr {
            pivots[idx] = pivot;
        }
    }

    fn materialized_mut(&mut self) -> (&mut Vec<K>, &mut Vec<N>) {
        self.materialize();
        match &mut self.repr {
            Repr::Materialized { pivots, children } => (pivots, children),
            Repr::Raw(_) => unreachable!(),
        }
    }

    /// Borrow `left`'s last child into `self`'s front slot, pulling the old
    /// separating pivot down from the parent and handing back `left`'s
    /// former last pivot as the new separator. Mirrors
    /// `LeafNode::take_from_left`, but an index node also has to rotate a
    /// pivot through the parent rather than just moving a key/value pair.
    pub fn take_from_left(&mut self, left: &mut IndexNode<K, N>, parent_pivot: K) -> K {
        let (left_pivots, left_children) = left.materialized_mut();
        let borrowed_child = left_children.pop().expect("left sibling empty");
        let new_parent_pivot = left_pivots.pop().expect("left sibling empty");
        let (pivots, children) = self.materialized_mut();
        pivots.insert(0, parent_pivot);
        children.insert(0, borrowed_child);
        new_parent_pivot
    }

    /// Symmetric to [`Self::take_from_left`]: borrow `right`'s first child
    /// onto `self`'s back, pulling the parent pivot down and handing back
    /// `right`'s former first pivot as the new separator.
    pub fn take_from_right(&mut self, right: &mut IndexNode<K, N>, parent_pivot: K) -> K {
        let (right_pivots, right_children) = right.materialized_mut();
        let borrowed_child = right_children.remove(0);
        let new_parent_pivot = right_pivots.remove(0);
        let (pivots, children) = self.materialized_mut();
        pivots.push(parent_pivot);
        children.push(borrowed_child);
        new_parent_pivot
    }

    /// Absorb `other` into `self`, pulling the separating parent pivot down
    /// between the two runs of pivots. `other` is destroyed by the caller
    /// via `cache.remove` after this returns.
    pub fn merge(&mut self, parent_pivot: K, mut other: IndexNode<K, N>) {
        let (other_pivots, other_children) = other.materialized_mut();
        let (pivots, children) = self.materialized_mut();
        pivots.push(parent_pivot);
        pivots.append(other_pivots);
        children.append(other_children);
    }

    pub fn encoded_size(&self) -> usize {
        let n = self.n_pivots();
        3 + n * K::SIZE + (n + 1) * N::SIZE
    }

    pub fn pack<W: Write>(&self, mut w: W) -> io::Result<()> {
        w.write_all(&[INDEX_KIND_TAG])?;
        let n = self.n_pivots();
        w.write_u16::<LittleEndian>(n as u16)?;
        let mut kbuf = vec![0u8; K::SIZE];
        for i in 0..n {
            self.pivot_at(i).to_bytes(&mut kbuf);
            w.write_all(&kbuf)?;
        }
        let mut nbuf = vec![0u8; N::SIZE];
        for i in 0..=n {
            self.child_at(i).to_bytes(&mut nbuf);
            w.write_all(&nbuf)?;
        }
        Ok(())
    }

    pub fn unpack<R: Read>(mut r: R) -> io::Result<Self> {
        let mut tag = [0u8; 1];
        r.read_exact(&mut tag)?;
        if tag[0] != INDEX_KIND_TAG {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "index node kind tag mismatch",
            ));
        }
        let n = r.read_u16::<LittleEndian>()? as usize;

        let mut pivots = Vec::with_capacity(n);
        let mut kbuf = vec![0u8; K::SIZE];
        for _ in 0..n {
            r.read_exact(&mut kbuf)?;
            pivots.push(K::from_bytes(&kbuf));
        }
        let mut children = Vec::with_capacity(n + 1);
        let mut nbuf = vec![0u8; N::SIZE];
        for _ in 0..=n {
            r.read_exact(&mut nbuf)?;
            children.push(N::from_bytes(&nbuf));
        }
        Ok(IndexNode::new(pivots, children))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_index_for_boundaries() {
        let mut node: IndexNode<u32, u32> = IndexNode::new(vec![10, 20, 30], vec![0, 1, 2, 3]);
        assert_eq!(node.child_index_for(&5), 0);
        assert_eq!(node.child_index_for(&10), 1);
        assert_eq!(node.child_index_for(&15), 1);
        assert_eq!(node.child_index_for(&30), 3);
        assert_eq!(node.child_index_for(&31), 3);
    }

    #[test]
    fn split_promotes_middle_pivot() {
        let mut node: IndexNode<u32, u32> =
            IndexNode::new(vec![10, 20, 30, 40, 50], vec![0, 1, 2, 3, 4, 5]);
        let (right, pivot) = node.split();
        assert_eq!(pivot, 30);
        assert_eq!(node.n_pivots(), 2);
        assert_eq!(right.n_pivots(), 2);
    }

    #[test]
    fn pack_unpack_roundtrip() {
        let node: IndexNode<u32, u64> = IndexNode::new(vec![10, 20], vec![1, 2, 3]);
        let mut buf = Vec::new();
        node.pack(&mut buf).unwrap();
        assert_eq!(buf.len(), node.encoded_size());
        let back = IndexNode::<u32, u64>::unpack(&buf[..]).unwrap();
        assert_eq!(back.n_pivots(), 2);
        assert_eq!(back.pivot_at_index(0), 10);
        assert_eq!(back.child_at_index(2), 3);
    }

    #[test]
    fn raw_view_matches_materialized() {
        let node: IndexNode<u32, u64> = IndexNode::new(vec![5, 15, 25], vec![1, 2, 3, 4]);
        let mut buf = Vec::new();
        node.pack(&mut buf).unwrap();
        let mut raw = IndexNode::<u32, u64>::from_raw_buffer(Arc::from(buf.into_boxed_slice())).unwrap();
        assert!(!raw.is_materialized());
        assert_eq!(raw.child_index_for(&16), 2);
        assert_eq!(raw.child_at_index(2), 3);
    }

    #[test]
    fn redistribute_and_merge() {
        let mut left: IndexNode<u32, u32> = IndexNode::new(vec![1, 2, 3], vec![10, 11, 12, 13]);
        let mut mid: IndexNode<u32, u32> = IndexNode::new(vec![], vec![20]);
        let new_pivot = mid.take_from_left(&mut left, 5);
        assert_eq!(new_pivot, 3);
        assert_eq!(mid.n_pivots(), 1);
        assert_eq!(mid.pivot_at_index(0), 5);
        assert_eq!(mid.child_at_index(0), 13);
        assert_eq!(left.n_pivots(), 2);

        let mut right: IndexNode<u32, u32> = IndexNode::new(vec![40, 41], vec![30, 31, 32]);
        let new_pivot = mid.take_from_right(&mut right, 7);
        assert_eq!(new_pivot, 40);
        assert_eq!(mid.n_pivots(), 2);
        assert_eq!(mid.child_at_index(2), 30);
        assert_eq!(right.n_pivots(), 1);

        mid.merge(99, right);
        assert_eq!(mid.n_pivots(), 4);
        assert_eq!(mid.child_at_index(4), 32);
    }

    #[test]
    fn mutation_materializes_raw() {
        let node: IndexNode<u32, u64> = IndexNode::new(vec![5, 15], vec![1, 2, 3]);
        let mut buf = Vec::new();
        node.pack(&mut buf).unwrap();
        let mut raw = IndexNode::<u32, u64>::from_raw_buffer(Arc::from(buf.into_boxed_slice())).unwrap();
        raw.insert(25, 4);
        assert!(raw.is_materialized());
        assert_eq!(raw.n_pivots(), 3);
    }
}
