//! Allocation failures.
//!
//! Allocation is the only operation that can fail at runtime. Every failure
//! hands the caller's inputs back untouched, and the structure it was
//! aimed at is left exactly as it was before the call.

use std::fmt;

use thiserror::Error as ThisError;

/// Which allocation could not be made.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A per-bit-length bucket in the outer trie.
    Bucket,
    /// A key entry in an inner trie.
    Entry,
    /// A node of a single-level trie.
    Node,
    /// A byte length too large to express in bits.
    KeyLength,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeKind::Bucket => "length bucket",
            NodeKind::Entry => "key entry",
            NodeKind::Node => "trie node",
            NodeKind::KeyLength => "key length",
        })
    }
}

/// A refused allocation, carrying back whatever the caller handed in.
#[derive(Debug, ThisError)]
#[error("failed to allocate a {kind}")]
pub struct AllocError<T = ()> {
    /// What could not be allocated.
    pub kind: NodeKind,
    /// The rejected input.
    pub rejected: T,
}

impl AllocError {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Self { kind, rejected: () }
    }

    /// Attaches the input the failed operation was given.
    pub fn with<T>(self, rejected: T) -> AllocError<T> {
        AllocError {
            kind: self.kind,
            rejected,
        }
    }
}

/// A refused insertion into a variable-length store.
#[derive(Debug, ThisError)]
#[error("failed to insert a {bits}-bit key: could not allocate a {kind}")]
pub struct InsertError<'k, V> {
    /// What could not be allocated.
    pub kind: NodeKind,
    /// The key that was not stored.
    pub key: &'k [u8],
    /// Key length in bits as requested.
    pub bits: u64,
    /// The value that was not stored.
    pub value: V,
}

impl<'k, V> InsertError<'k, V> {
    /// Splits the error back into the caller's key and value.
    pub fn into_parts(self) -> (&'k [u8], V) {
        (self.key, self.value)
    }
}
