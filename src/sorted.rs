//! Binary-search helpers shared by leaf and index nodes: both keep a
//! strictly increasing run of keys/pivots and need the same "first element
//! not smaller than / strictly greater than" queries during descent, insert
//! and split.

/// Index of the first element `>= key`, or `slice.len()` if none.
pub(crate) fn lower_bound<K: Ord>(slice: &[K], key: &K) -> usize {
    slice.partition_point(|k| k < key)
}

/// Index of the first element `> key`, or `slice.len()` if none.
pub(crate) fn upper_bound<K: Ord>(slice: &[K], key: &K) -> usize {
    slice.partition_point(|k| k <= key)
}

/// Exact-match binary search, as used by `LeafNode::get`/`remove`.
pub(crate) fn find_exact<K: Ord>(slice: &[K], key: &K) -> Option<usize> {
    slice.binary_search(key).ok()
}
