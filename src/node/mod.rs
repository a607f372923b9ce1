//! The polymorphic node model: leaf vs. index, represented as a closed
//! tagged sum rather than dynamic dispatch on the tree's hot path.

pub mod index;
pub mod leaf;

use crate::{
    error::Result,
    nid::NodeId,
    size::FixedSize,
};
use index::IndexNode;
use leaf::LeafNode;
use std::io::{self, Read, Write};

/// Either node kind, downcast once at the consumer rather than dispatched
/// dynamically during descent.
pub enum Node<K, V> {
    Leaf(LeafNode<K, V>),
    Index(IndexNode<K, NodeId>),
}

impl<K: FixedSize + Ord + Clone, V: FixedSize + Clone> Node<K, V> {
    pub fn as_leaf(&self) -> Option<&LeafNode<K, V>> {
        match self {
            Node::Leaf(l) => Some(l),
            Node::Index(_) => None,
        }
    }

    pub fn as_leaf_mut(&mut self) -> Option<&mut LeafNode<K, V>> {
        match self {
            Node::Leaf(l) => Some(l),
            Node::Index(_) => None,
        }
    }

    pub fn as_index(&self) -> Option<&IndexNode<K, NodeId>> {
        match self {
            Node::Index(i) => Some(i),
            Node::Leaf(_) => None,
        }
    }

    pub fn as_index_mut(&mut self) -> Option<&mut IndexNode<K, NodeId>> {
        match self {
            Node::Index(i) => Some(i),
            Node::Leaf(_) => None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    pub fn kind(&self) -> crate::nid::NodeKind {
        match self {
            Node::Leaf(_) => crate::nid::NodeKind::Leaf,
            Node::Index(_) => crate::nid::NodeKind::Index,
        }
    }

    /// First key reachable in this node's subtree: `keys[0]` for a leaf,
    /// `pivots[0]` for an index node. Used by `update_child_nid`'s caller to
    /// locate the parent slot without trusting a possibly-stale NID.
    pub fn first_key(&self) -> Option<K> {
        match self {
            Node::Leaf(l) => l.first_key().cloned(),
            Node::Index(i) => {
                if i.n_pivots() == 0 {
                    None
                } else {
                    Some(i.pivot_at_index(0))
                }
            }
        }
    }

    pub fn encoded_size(&self) -> usize {
        match self {
            Node::Leaf(l) => l.encoded_size(),
            Node::Index(i) => i.encoded_size(),
        }
    }

    pub fn pack<W: Write>(&self, w: W) -> io::Result<()> {
        match self {
            Node::Leaf(l) => l.pack(w),
            Node::Index(i) => i.pack(w),
        }
    }

    pub fn unpack<R: Read>(mut r: R) -> Result<Self> {
        let mut tag = [0u8; 1];
        r.read_exact(&mut tag)?;
        match tag[0] {
            leaf::LEAF_KIND_TAG => {
                let l = LeafNode::unpack(io::Cursor::new(tag).chain(r))?;
                Ok(Node::Leaf(l))
            }
            index::INDEX_KIND_TAG => {
                let i = IndexNode::unpack(io::Cursor::new(tag).chain(r))?;
                Ok(Node::Index(i))
            }
            other => Err(crate::error::Error::Corrupt(
                if other == 0 { "zero node kind tag" } else { "unknown node kind tag" },
            )),
        }
    }
}
