//! Error taxonomy.
//!
//! Two tiers, matching the design: *expected* outcomes that a caller is
//! meant to handle (`KeyDoesNotExist`, `InsertFailed`) and *structural*
//! violations that indicate cache corruption or a logic bug. The latter are
//! surfaced as `Error::Corrupt` rather than panicking, except where the
//! violation would otherwise require touching a handle that the cache
//! already told us doesn't exist — that class of bug cannot be recovered
//! from locally and is a `panic!` via `unreachable_corruption`.

use std::io;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Requested key is not present in the tree. Returned by `search` and
    /// `remove`; leaves the tree unmodified.
    #[error("key does not exist")]
    KeyDoesNotExist,

    /// The leaf rejected the insert before any structural mutation happened.
    #[error("insert failed: {0}")]
    InsertFailed(&'static str),

    /// The key was already present and the configured duplicate policy is
    /// `Reject` (see DESIGN.md, Open Question 1).
    #[error("duplicate key")]
    DuplicateKey,

    /// Keys must be non-empty.
    #[error("key must not be empty")]
    EmptyKey,

    /// The cache collaborator reported an error (I/O, allocation failure,
    /// capacity exhaustion, ...).
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// A structural invariant was violated: an expected NID was missing from
    /// a parent's slot, a handle the tree should hold came back null, or
    /// post-split bookkeeping failed to find the node it must insert. This
    /// indicates cache corruption or a logic error upstream of this crate.
    #[error("structural invariant violated: {0}")]
    Corrupt(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("backing store is full")]
    StoreFull,
    #[error("node {0:?} not found in cache")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("checksum mismatch reading node at offset {0}")]
    ChecksumMismatch(u64),
}

/// Panics with a message identifying a bug that cannot be a recoverable
/// `Error::Corrupt` because the cache has already told us the referenced
/// object cannot be reached — there is no handle left to hand back to the
/// caller, so propagating an `Error` value is not an option.
#[track_caller]
pub(crate) fn unreachable_corruption(msg: &'static str) -> ! {
    panic!("pagetree: unrecoverable structural corruption: {msg}")
}
