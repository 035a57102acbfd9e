//! Slab storage for trie nodes.
//!
//! Nodes live in one `Vec` and are addressed by [`NodeId`]; released slots
//! go on a free list and are handed out again before the vector grows.
//! Handles stay valid until the node they name is released, which is what
//! lets terminator edges refer to nodes by identity.
//!
//! Allocation is split in two steps so callers can make several
//! allocations all-or-nothing: [`Arena::reserve`] is fallible and mutates
//! nothing observable, [`Arena::insert`] after a successful reservation
//! cannot fail.

use std::mem;

use crate::error::{AllocError, NodeKind};
use crate::trie::{Links, NodeId, Nodes};

/// Handles are 32-bit.
const MAX_NODES: usize = u32::MAX as usize;

#[derive(Clone, Debug)]
struct Node<T> {
    links: Links,
    item: T,
}

/// Node slab with a free list.
#[derive(Clone, Debug)]
pub struct Arena<T> {
    nodes: Vec<Option<Node<T>>>,
    /// Released slots, reused last-in first-out.
    free: Vec<NodeId>,
    /// Upper bound on live nodes.
    limit: usize,
    kind: NodeKind,
}

impl<T> Arena<T> {
    /// An empty arena whose failures report `kind`.
    pub fn new(kind: NodeKind) -> Self {
        Self::with_capacity(kind, 0, None)
    }

    /// An empty arena with room for `capacity` nodes that refuses to hold
    /// more than `limit`.
    pub fn with_capacity(kind: NodeKind, capacity: usize, limit: Option<usize>) -> Self {
        let limit = limit.unwrap_or(MAX_NODES).min(MAX_NODES);
        Self {
            nodes: Vec::with_capacity(capacity.min(limit)),
            free: Vec::new(),
            limit,
            kind,
        }
    }

    /// Number of live nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Whether no node is live.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes room for one more node.
    pub fn reserve(&mut self) -> Result<(), AllocError> {
        if self.len() >= self.limit {
            tracing::debug!(kind = %self.kind, limit = self.limit, "node limit reached");
            return Err(AllocError::new(self.kind));
        }
        if !self.free.is_empty() {
            return Ok(());
        }
        self.nodes.try_reserve(1).map_err(|err| {
            tracing::debug!(kind = %self.kind, error = %err, "node allocation failed");
            AllocError::new(self.kind)
        })?;
        // Release must not allocate.
        let live = self.nodes.len() + 1;
        if self.free.capacity() < live {
            self.free
                .try_reserve(live - self.free.len())
                .map_err(|_| AllocError::new(self.kind))?;
        }
        Ok(())
    }

    /// Stores `item` as a standalone node (see [`crate::trie::init`]).
    ///
    /// Must follow a successful [`Arena::reserve`].
    pub fn insert(&mut self, item: T) -> NodeId {
        let id = match self.free.pop() {
            Some(id) => id,
            None => {
                let id = NodeId::from_index(self.nodes.len());
                self.nodes.push(None);
                id
            }
        };
        self.nodes[id.index()] = Some(Node {
            links: Links::singleton(id),
            item,
        });
        id
    }

    /// Frees `id` and returns its payload. The handle must no longer be
    /// linked into any trie.
    pub fn release(&mut self, id: NodeId) -> T {
        let node = self
            .nodes
            .get_mut(id.index())
            .and_then(Option::take)
            .unwrap_or_else(|| panic!("{id:?} is not a live node"));
        self.free.push(id);
        node.item
    }

    /// Frees every node at once.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
    }

    /// Mutable payload of `id`.
    #[inline]
    pub fn item_mut(&mut self, id: NodeId) -> &mut T {
        &mut self.node_mut(id).item
    }

    /// Bytes held by the slab, including free slots.
    pub fn memory_usage(&self) -> usize {
        self.nodes.capacity() * mem::size_of::<Option<Node<T>>>()
            + self.free.capacity() * mem::size_of::<NodeId>()
    }

    #[inline]
    fn node(&self, id: NodeId) -> &Node<T> {
        match self.nodes.get(id.index()) {
            Some(Some(node)) => node,
            _ => panic!("{id:?} is not a live node"),
        }
    }

    #[inline]
    fn node_mut(&mut self, id: NodeId) -> &mut Node<T> {
        match self.nodes.get_mut(id.index()) {
            Some(Some(node)) => node,
            _ => panic!("{id:?} is not a live node"),
        }
    }
}

impl<T> Nodes for Arena<T> {
    type Item = T;

    #[inline]
    fn links(&self, id: NodeId) -> &Links {
        &self.node(id).links
    }

    #[inline]
    fn links_mut(&mut self, id: NodeId) -> &mut Links {
        &mut self.node_mut(id).links
    }

    #[inline]
    fn item(&self, id: NodeId) -> &T {
        &self.node(id).item
    }
}
