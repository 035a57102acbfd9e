//! Binary PATRICIA trie with back-edges.
//!
//! Every node is both a branch point and a stored leaf. A node tests bit
//! `index` of the search key and follows `children[bit]`. An edge whose
//! target has a greater `index` than its source continues the search (a
//! *descendant* edge); any other edge is a *terminator*, and its target is
//! the answer. There are no null children: a slot with nothing below it
//! points back at some node whose key does not route through it.
//!
//! The engine owns no memory. Links live in a caller-supplied [`Nodes`]
//! store and nodes are addressed by [`NodeId`]; a [`Trie`] is only the root
//! handle. Terminator edges name their target by handle, so operations that
//! move a node to a different handle must repair every edge that named the
//! old one.
//!
//! Lookups are approximate: [`Trie::find_nearest`] returns the only stored
//! node that *could* hold the key, and the caller compares full keys.

/// Bit position tested by a node.
pub type BitIndex = u64;

/// Stable handle of a node in its store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    pub(crate) fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).expect("arena reservation bounds the handle space"))
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Structural links of one node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Links {
    /// Child per bit value, each a descendant or a terminator edge.
    pub children: [NodeId; 2],
    /// Bit position this node routes on.
    pub index: BitIndex,
}

impl Links {
    /// Links of a one-node tree: both children point back at `node`.
    #[inline]
    pub fn singleton(node: NodeId) -> Self {
        Self {
            children: [node; 2],
            index: 0,
        }
    }
}

/// Extracts bit `index` of a subject, returning `0` or `1`.
///
/// Must be pure and total: positions past the subject's length read as a
/// fixed bit, because the trie probes indices without knowing key lengths.
pub trait Select<S: ?Sized> {
    /// Bit `index` of `subject`.
    fn select(&self, subject: &S, index: BitIndex) -> usize;
}

impl<S: ?Sized, F> Select<S> for F
where
    F: Fn(&S, BitIndex) -> usize,
{
    #[inline]
    fn select(&self, subject: &S, index: BitIndex) -> usize {
        self(subject, index)
    }
}

/// Storage the engine reads and rewrites links through.
pub trait Nodes {
    /// Per-node payload the selector reads keys from.
    type Item: ?Sized;

    /// Links of `id`.
    fn links(&self, id: NodeId) -> &Links;
    /// Mutable links of `id`.
    fn links_mut(&mut self, id: NodeId) -> &mut Links;
    /// Payload of `id`.
    fn item(&self, id: NodeId) -> &Self::Item;
}

/// A structural reference slot: the root, or one child of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edge {
    /// The trie's root handle.
    Root,
    /// `children[slot]` of the node.
    Child(NodeId, usize),
}

/// Where a search path reaches a node: the edge and the node owning it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BranchPosition {
    /// Edge pointing at the node.
    pub edge: Edge,
    /// Owner of `edge`, `None` for the root.
    pub parent: Option<NodeId>,
}

impl BranchPosition {
    /// Start of every search.
    pub const ROOT: Self = Self {
        edge: Edge::Root,
        parent: None,
    };
}

/// Everything [`Trie::cut`] needs to excise the terminal node of a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeafPosition {
    /// Sibling of the terminator edge, promoted in place of the parent.
    pub cut: NodeId,
    /// Target of the terminator edge.
    pub leaf: NodeId,
    /// Edge holding the terminator's owner.
    pub parent_edge: Edge,
    /// Owner of `parent_edge`.
    pub grandparent: Option<NodeId>,
}

/// Makes `node` a standalone one-element tree.
pub fn init<N: Nodes + ?Sized>(nodes: &mut N, node: NodeId) {
    *nodes.links_mut(node) = Links::singleton(node);
}

#[inline]
fn node_bit<N, S>(nodes: &N, sel: &S, node: NodeId, index: BitIndex) -> usize
where
    N: Nodes + ?Sized,
    S: Select<N::Item> + ?Sized,
{
    sel.select(nodes.item(node), index)
}

/// Copies `src`'s links into `dst`, turning `src`'s self-references into
/// self-references of `dst`.
fn copy_links<N: Nodes + ?Sized>(nodes: &mut N, dst: NodeId, src: NodeId) {
    let mut links = *nodes.links(src);
    for child in &mut links.children {
        if *child == src {
            *child = dst;
        }
    }
    *nodes.links_mut(dst) = links;
}

/// Root handle of a trie whose nodes live elsewhere.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Trie {
    root: Option<NodeId>,
}

impl Trie {
    /// An empty trie.
    pub const fn new() -> Self {
        Self { root: None }
    }

    /// Root node, if any.
    #[inline]
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Whether the trie holds no nodes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Initialises `node` and makes it the whole trie.
    pub fn plant<N: Nodes + ?Sized>(&mut self, nodes: &mut N, node: NodeId) {
        init(nodes, node);
        self.root = Some(node);
    }

    #[inline]
    fn target<N: Nodes + ?Sized>(&self, nodes: &N, edge: Edge) -> Option<NodeId> {
        match edge {
            Edge::Root => self.root,
            Edge::Child(node, slot) => Some(nodes.links(node).children[slot]),
        }
    }

    #[inline]
    fn link<N: Nodes + ?Sized>(&mut self, nodes: &mut N, edge: Edge, target: NodeId) {
        match edge {
            Edge::Root => self.root = Some(target),
            Edge::Child(node, slot) => nodes.links_mut(node).children[slot] = target,
        }
    }

    /// Descends along `key` to the first terminator edge and returns its
    /// target. The result need not match `key`.
    pub fn find_nearest<N, K, S>(&self, nodes: &N, sel: &S, key: &K) -> Option<NodeId>
    where
        N: Nodes + ?Sized,
        K: ?Sized,
        S: Select<K> + ?Sized,
    {
        let mut node = self.root?;
        loop {
            let links = nodes.links(node);
            let next = links.children[sel.select(key, links.index)];
            if nodes.links(next).index <= links.index {
                return Some(next);
            }
            node = next;
        }
    }

    /// Splices `node` into a non-empty trie.
    ///
    /// `node`'s links must carry, as `index`, the first bit at which its key
    /// differs from the key of [`Trie::find_nearest`]'s result. Equal keys
    /// go through [`Trie::replace`] instead.
    pub fn insert<N, S>(&mut self, nodes: &mut N, sel: &S, node: NodeId)
    where
        N: Nodes + ?Sized,
        S: Select<N::Item> + ?Sized,
    {
        let Some(root) = self.root else {
            self.plant(nodes, node);
            return;
        };
        let divergence = nodes.links(node).index;

        // Stop above the first node testing a later bit, or at a terminator.
        let mut parent = root;
        let mut edge = Edge::Root;
        let mut next = root;
        let mut slot = node_bit(nodes, sel, root, nodes.links(root).index);
        loop {
            let parent_index = nodes.links(next).index;
            if parent_index > divergence {
                break;
            }
            parent = next;
            slot = node_bit(nodes, sel, node, parent_index);
            edge = Edge::Child(parent, slot);
            next = nodes.links(parent).children[slot];
            if nodes.links(next).index <= parent_index {
                break;
            }
        }

        let cut = next;
        nodes.links_mut(node).children = [node; 2];
        // A displaced edge into empty space is dropped rather than adopted.
        if node_bit(nodes, sel, cut, nodes.links(parent).index) == slot {
            let side = node_bit(nodes, sel, cut, divergence);
            nodes.links_mut(node).children[side] = cut;
        }
        self.link(nodes, edge, node);
    }

    /// Puts `node` in `matched`'s place. Both must carry the same key.
    pub fn replace<N, S>(&mut self, nodes: &mut N, sel: &S, matched: NodeId, node: NodeId)
    where
        N: Nodes + ?Sized,
        S: Select<N::Item> + ?Sized,
    {
        let branch = self.branch_position(nodes, sel, matched, nodes.item(matched));
        copy_links(nodes, node, matched);
        self.link(nodes, branch.edge, node);

        // The terminator naming `matched` sits further along the same path.
        let mut edge = branch.edge;
        loop {
            let Some(parent) = self.target(nodes, edge) else {
                return;
            };
            let parent_index = nodes.links(parent).index;
            let slot = node_bit(nodes, sel, node, parent_index);
            edge = Edge::Child(parent, slot);
            let child = nodes.links(parent).children[slot];
            if nodes.links(child).index <= parent_index {
                break;
            }
        }
        self.link(nodes, edge, node);
    }

    /// Descends along `key` from `from` to its terminator edge, recording
    /// what [`Trie::cut`] needs. `from.parent` is reported as the
    /// grandparent when the terminator hangs directly off `from.edge`.
    pub fn leaf_position<N, K, S>(
        &self,
        nodes: &N,
        sel: &S,
        key: &K,
        from: BranchPosition,
    ) -> Option<LeafPosition>
    where
        N: Nodes + ?Sized,
        K: ?Sized,
        S: Select<K> + ?Sized,
    {
        let mut edge = from.edge;
        let mut parent = from.parent;
        loop {
            let parent_edge = edge;
            let grandparent = parent;
            let node = self.target(nodes, parent_edge)?;
            parent = Some(node);
            let links = *nodes.links(node);
            let slot = sel.select(key, links.index);
            edge = Edge::Child(node, slot);
            let leaf = links.children[slot];
            if nodes.links(leaf).index <= links.index {
                return Some(LeafPosition {
                    cut: links.children[slot ^ 1],
                    leaf,
                    parent_edge,
                    grandparent,
                });
            }
        }
    }

    /// Finds the first edge on `key`'s path that points at `node`.
    ///
    /// # Panics
    ///
    /// If `node` is not on `key`'s path.
    pub fn branch_position<N, K, S>(
        &self,
        nodes: &N,
        sel: &S,
        node: NodeId,
        key: &K,
    ) -> BranchPosition
    where
        N: Nodes + ?Sized,
        K: ?Sized,
        S: Select<K> + ?Sized,
    {
        let mut pos = BranchPosition::ROOT;
        let mut current = self.root;
        while let Some(parent) = current {
            if parent == node {
                return pos;
            }
            let links = nodes.links(parent);
            let slot = sel.select(key, links.index);
            let next = links.children[slot];
            if next != node && nodes.links(next).index <= links.index {
                break;
            }
            pos = BranchPosition {
                edge: Edge::Child(parent, slot),
                parent: Some(parent),
            };
            current = Some(next);
        }
        panic!("{node:?} is not on the search path of its key");
    }

    /// Excises `leaf.leaf`, given the edge [`Trie::branch_position`] found
    /// for it.
    pub fn cut<N: Nodes + ?Sized>(&mut self, nodes: &mut N, branch: Edge, leaf: LeafPosition) {
        let Some(leaf_parent) = self.target(nodes, leaf.parent_edge) else {
            return;
        };
        if leaf.cut != leaf.leaf {
            self.link(nodes, leaf.parent_edge, leaf.cut);
            // The parent survives as a stored node; move it into the leaf's
            // structural position.
            if leaf_parent != leaf.leaf {
                copy_links(nodes, leaf_parent, leaf.leaf);
                self.link(nodes, branch, leaf_parent);
            }
        } else {
            match (leaf.parent_edge, leaf.grandparent) {
                (Edge::Root, grandparent) => self.root = grandparent,
                (edge, Some(grandparent)) => self.link(nodes, edge, grandparent),
                (Edge::Child(..), None) => unreachable!("child edges always have an owner"),
            }
        }
    }

    /// Removes the node stored under `key` and returns it.
    ///
    /// The key must be present; nothing is verified, and removing an absent
    /// key unlinks whichever node the search ends at.
    pub fn remove_key<N, K, S>(&mut self, nodes: &mut N, sel: &S, key: &K) -> Option<NodeId>
    where
        N: Nodes + ?Sized,
        K: ?Sized,
        S: Select<K> + ?Sized,
    {
        let leaf = self.leaf_position(nodes, sel, key, BranchPosition::ROOT)?;
        let branch = self.branch_position(nodes, sel, leaf.leaf, key);
        self.cut(nodes, branch.edge, leaf);
        Some(leaf.leaf)
    }

    /// Removes `node`, routing on its own key.
    pub fn remove_node<N, S>(&mut self, nodes: &mut N, sel: &S, node: NodeId)
    where
        N: Nodes + ?Sized,
        S: Select<N::Item> + ?Sized,
    {
        let branch = self.branch_position(nodes, sel, node, nodes.item(node));
        if let Some(leaf) = self.leaf_position(nodes, sel, nodes.item(node), branch) {
            self.cut(nodes, branch.edge, leaf);
        }
    }

    /// Calls `action` on every node, depth-first with child `0` first,
    /// stopping at the first `Some` it returns.
    pub fn walk<N, S, R, F>(&self, nodes: &N, sel: &S, mut action: F) -> Option<R>
    where
        N: Nodes + ?Sized,
        S: Select<N::Item> + ?Sized,
        F: FnMut(NodeId) -> Option<R>,
    {
        let mut cursor = self.cursor();
        while let Some(node) = cursor.next(nodes, sel) {
            if let Some(result) = action(node) {
                return Some(result);
            }
        }
        None
    }

    /// [`Trie::walk`] with mutable access to the store between visits.
    ///
    /// `action` may change payloads but not the bits the selector reads.
    pub fn walk_mut<N, S, R, F>(&self, nodes: &mut N, sel: &S, mut action: F) -> Option<R>
    where
        N: Nodes + ?Sized,
        S: Select<N::Item> + ?Sized,
        F: FnMut(&mut N, NodeId) -> Option<R>,
    {
        let mut cursor = self.cursor();
        while let Some(node) = cursor.next(nodes, sel) {
            if let Some(result) = action(nodes, node) {
                return Some(result);
            }
        }
        None
    }

    /// Incremental form of [`Trie::walk`].
    pub fn cursor(&self) -> Cursor {
        Cursor {
            stack: self.root.map(Step::Expand).into_iter().collect(),
        }
    }

    /// Checks that the walk visits each node once and that every visited
    /// node is found by its own key. Returns the node count.
    #[cfg(test)]
    pub(crate) fn validate<N, S>(&self, nodes: &N, sel: &S) -> usize
    where
        N: Nodes + ?Sized,
        S: Select<N::Item> + ?Sized,
    {
        let mut seen = std::collections::HashSet::new();
        self.walk(nodes, sel, |node| {
            assert!(seen.insert(node), "{node:?} visited twice");
            assert_eq!(
                self.find_nearest(nodes, sel, nodes.item(node)),
                Some(node),
                "{node:?} is not reachable by its key"
            );
            None::<()>
        });
        seen.len()
    }
}

#[derive(Clone, Copy, Debug)]
enum Step {
    Expand(NodeId),
    Visit(NodeId),
}

/// Walk position that can be advanced one node at a time.
///
/// The cursor holds no borrow of the store; it must be advanced against the
/// same trie, unmodified, that created it.
#[derive(Clone, Debug, Default)]
pub struct Cursor {
    stack: Vec<Step>,
}

impl Cursor {
    /// Next node in walk order.
    pub fn next<N, S>(&mut self, nodes: &N, sel: &S) -> Option<NodeId>
    where
        N: Nodes + ?Sized,
        S: Select<N::Item> + ?Sized,
    {
        while let Some(step) = self.stack.pop() {
            let node = match step {
                Step::Visit(node) => return Some(node),
                Step::Expand(node) => node,
            };
            let links = *nodes.links(node);
            // Pushed in reverse so child 0 is handled first.
            for slot in (0..2).rev() {
                let child = links.children[slot];
                // An edge whose target does not route through it points into
                // empty space.
                if node_bit(nodes, sel, child, links.index) != slot {
                    continue;
                }
                self.stack.push(if nodes.links(child).index > links.index {
                    Step::Expand(child)
                } else {
                    Step::Visit(child)
                });
            }
        }
        None
    }
}
