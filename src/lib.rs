//! # backtrie
//!
//! Binary PATRICIA tries with back-edges instead of null children.
//!
//! Every node of the trie is at once a branch point and a stored key. A
//! child edge either descends to a node testing a later bit or loops back to
//! a node whose key ends the search; there are no empty slots. The result is
//! one node per key and lookups that test at most one bit per node before a
//! single full-key comparison.
//!
//! ## Layers
//!
//! - [`trie`]: the engine. Generic over a bit [`Select`]or and a [`Nodes`]
//!   store, it allocates nothing and only rewrites links.
//! - [`DynTrie`]: a key/value store for bit strings of any length, built
//!   from two levels of engine tries.
//! - [`UintMap`]: an ordered `u64` map on a single engine trie.
//!
//! ## Example
//!
//! ```rust
//! use backtrie::DynTrie;
//!
//! let mut map = DynTrie::new();
//! map.insert(b"hello", 1).unwrap();
//! map.insert(b"world", 2).unwrap();
//!
//! assert_eq!(map.get(b"hello"), Some(&1));
//! assert_eq!(map.insert(b"world", 3).unwrap(), Some(2));
//! assert_eq!(map.remove(b"hello"), Some(1));
//! assert_eq!(map.len(), 1);
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod arena;
pub mod bits;
pub mod dynamic;
pub mod error;
pub mod trie;
pub mod uint;

pub use dynamic::DynTrie;
pub use error::{AllocError, InsertError, NodeKind};
pub use trie::{BitIndex, NodeId, Nodes, Select, Trie};
pub use uint::UintMap;

/// Construction-time tuning for [`DynTrie`] and [`UintMap`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Entries to allocate up front.
    pub initial_capacity: usize,
    /// Most distinct key lengths a [`DynTrie`] will hold.
    pub max_buckets: Option<usize>,
    /// Most keys the store will hold.
    pub max_entries: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_capacity: 64,
            max_buckets: None,
            max_entries: None,
        }
    }
}

/// Memory usage of a store's nodes.
#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    /// Bytes held by node slabs, free slots included
    pub node_bytes: usize,
    /// Number of keys stored
    pub num_keys: usize,
    /// Bytes per key (calculated)
    pub bytes_per_key: f64,
}


#[cfg(test)]
mod proptests;
