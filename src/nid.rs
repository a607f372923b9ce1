//! Node identifiers.
//!
//! A [`NodeId`] is the opaque handle the tree uses to name a node. It
//! carries enough information to tell volatile (in-process) residency apart
//! from persistent (file-backed) residency, and which node kind it refers
//! to, without the tree ever dereferencing it directly — only the cache
//! turns a `NodeId` into a handle.

use crate::size::FixedSize;
use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

/// Which node variant a [`NodeId`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum NodeKind {
    Leaf,
    Index,
}

/// Addressing media for a [`NodeId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum Media {
    /// Resident in the process's volatile arena. `slot` is a generational
    /// index into [`crate::cache::memory::MemoryCache`]'s arena and MUST NOT
    /// be reused across processes or cache restarts.
    Volatile { slot: u32, generation: u32 },
    /// Resident in the backing file. `offset`/`size` address a byte run
    /// whose size is a multiple of the store's block size.
    File { offset: u64, size: u32 },
}

/// An opaque, totally ordered handle naming one node, independent of its
/// current residency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct NodeId {
    pub(crate) kind: NodeKind,
    pub(crate) media: Media,
}

impl NodeId {
    pub(crate) fn volatile(kind: NodeKind, slot: u32, generation: u32) -> Self {
        NodeId {
            kind,
            media: Media::Volatile { slot, generation },
        }
    }

    pub(crate) fn on_disk(kind: NodeKind, offset: u64, size: u32) -> Self {
        NodeId {
            kind,
            media: Media::File { offset, size },
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_volatile(&self) -> bool {
        matches!(self.media, Media::Volatile { .. })
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self.media, Media::File { .. })
    }
}

/// Fixed on-disk/in-memory encoding for a [`NodeId`] so that index nodes can
/// store child NIDs inline (`NID[n+1] children`, alongside `K[n]` pivots).
///
/// Layout: `kind(1) | media(1) | primary(8) | secondary(4)`. For volatile
/// media, `primary` packs `generation << 32 | slot` and `secondary` is
/// unused (zero). For file media, `primary` is the byte offset and
/// `secondary` is the block-rounded size.
impl FixedSize for NodeId {
    const SIZE: usize = 14;

    fn to_bytes(&self, buf: &mut [u8]) {
        let (kind_tag, media_tag, primary, secondary): (u8, u8, u64, u32) = match (self.kind, self.media) {
            (NodeKind::Leaf, Media::Volatile { slot, generation }) => {
                (0, 0, ((generation as u64) << 32) | slot as u64, 0)
            }
            (NodeKind::Index, Media::Volatile { slot, generation }) => {
                (1, 0, ((generation as u64) << 32) | slot as u64, 0)
            }
            (NodeKind::Leaf, Media::File { offset, size }) => (0, 1, offset, size),
            (NodeKind::Index, Media::File { offset, size }) => (1, 1, offset, size),
        };
        buf[0] = kind_tag;
        buf[1] = media_tag;
        LittleEndian::write_u64(&mut buf[2..10], primary);
        LittleEndian::write_u32(&mut buf[10..14], secondary);
    }

    fn from_bytes(buf: &[u8]) -> Self {
        let kind = if buf[0] == 0 { NodeKind::Leaf } else { NodeKind::Index };
        let primary = LittleEndian::read_u64(&buf[2..10]);
        let secondary = LittleEndian::read_u32(&buf[10..14]);
        let media = if buf[1] == 0 {
            Media::Volatile {
                slot: (primary & 0xFFFF_FFFF) as u32,
                generation: (primary >> 32) as u32,
            }
        } else {
            Media::File {
                offset: primary,
                size: secondary,
            }
        };
        NodeId { kind, media }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.media {
            Media::Volatile { slot, generation } => {
                write!(f, "{:?}@mem[{slot}#{generation}]", self.kind)
            }
            Media::File { offset, size } => {
                write!(f, "{:?}@file[{offset}+{size}]", self.kind)
            }
        }
    }
}
