//! An embeddable, cache-backed B+-tree index.
//!
//! The tree ([`Tree`]) never touches node bytes directly; every access goes
//! through a [`Cache`] implementation ([`MemoryCache`] by default), which
//! decouples node identity ([`NodeId`]) from residency (in-process vs.
//! file-backed). See `DESIGN.md` for how each module is put together.

pub mod cache;
pub mod config;
pub mod error;
pub mod nid;
pub mod node;
pub mod size;
pub mod sorted;
pub mod tree;

pub use cache::{
    file_store::FileStore,
    memory::{CacheConfig, MemoryCache},
    Cache, Handle,
};
pub use config::Config;
pub use error::{CacheError, Error, Result};
pub use nid::{Media, NodeId, NodeKind};
pub use node::{index::IndexNode, leaf::LeafNode, Node};
pub use size::FixedSize;
pub use tree::{Tree, TreeConfig};
