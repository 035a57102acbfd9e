//! Map from `u64` keys, one trie node per key.
//!
//! Keys route MSB-first, so traversal is in ascending key order. Unlike
//! [`crate::DynTrie`], an overwrite swaps in a freshly allocated node and
//! retires the old one, and [`UintMap::retain`] removes nodes by handle
//! rather than by key.

use std::iter::FusedIterator;

use crate::arena::Arena;
use crate::bits::{word_bit, word_divergence};
use crate::error::{AllocError, NodeKind};
use crate::trie::{BitIndex, Cursor, NodeId, Nodes, Select, Trie};
use crate::Config;

#[derive(Debug)]
struct Slot<V> {
    key: u64,
    value: V,
}

#[derive(Clone, Copy, Debug, Default)]
struct WordBits;

impl Select<u64> for WordBits {
    #[inline]
    fn select(&self, key: &u64, index: BitIndex) -> usize {
        word_bit(*key, index)
    }
}

impl<V> Select<Slot<V>> for WordBits {
    #[inline]
    fn select(&self, slot: &Slot<V>, index: BitIndex) -> usize {
        word_bit(slot.key, index)
    }
}

/// Ordered map from `u64` to `V`.
///
/// ```
/// use backtrie::UintMap;
///
/// let mut map = UintMap::new();
/// for key in [30, 10, 20] {
///     map.insert(key, key * 2).unwrap();
/// }
/// assert_eq!(map.insert(10, 0).unwrap(), Some(20));
/// map.retain(|key, _| key != 20);
/// assert_eq!(map.iter().collect::<Vec<_>>(), vec![(10, &0), (30, &60)]);
/// ```
#[derive(Debug)]
pub struct UintMap<V> {
    trie: Trie,
    nodes: Arena<Slot<V>>,
}

impl<V> UintMap<V> {
    /// An empty map.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// An empty map sized by `config.initial_capacity` and limited to
    /// `config.max_entries` nodes.
    pub fn with_config(config: Config) -> Self {
        Self {
            trie: Trie::new(),
            nodes: Arena::with_capacity(
                NodeKind::Node,
                config.initial_capacity,
                config.max_entries,
            ),
        }
    }

    /// Number of keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the map is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }

    /// Stores `value` under `key` and returns the value it replaced.
    ///
    /// Every insertion, overwrites included, takes a new node; an overwrite
    /// releases the old one afterwards. A refused allocation returns
    /// `value` inside the error and leaves the map unchanged.
    pub fn insert(&mut self, key: u64, value: V) -> Result<Option<V>, AllocError<V>> {
        let nearest = self.trie.find_nearest(&self.nodes, &WordBits, &key);
        if let Err(err) = self.nodes.reserve() {
            return Err(err.with(value));
        }
        let node = self.nodes.insert(Slot { key, value });
        let Some(nearest) = nearest else {
            self.trie.plant(&mut self.nodes, node);
            return Ok(None);
        };
        match word_divergence(key, self.nodes.item(nearest).key) {
            None => {
                self.trie.replace(&mut self.nodes, &WordBits, nearest, node);
                Ok(Some(self.nodes.release(nearest).value))
            }
            Some(index) => {
                self.nodes.links_mut(node).index = index;
                self.trie.insert(&mut self.nodes, &WordBits, node);
                Ok(None)
            }
        }
    }

    fn find(&self, key: u64) -> Option<NodeId> {
        let node = self.trie.find_nearest(&self.nodes, &WordBits, &key)?;
        (self.nodes.item(node).key == key).then_some(node)
    }

    /// Value stored under `key`.
    pub fn get(&self, key: u64) -> Option<&V> {
        self.find(key).map(|node| &self.nodes.item(node).value)
    }

    /// Mutable value stored under `key`.
    pub fn get_mut(&mut self, key: u64) -> Option<&mut V> {
        let node = self.find(key)?;
        Some(&mut self.nodes.item_mut(node).value)
    }

    /// Whether `key` is stored.
    pub fn contains_key(&self, key: u64) -> bool {
        self.find(key).is_some()
    }

    /// Removes `key` and returns its value.
    pub fn remove(&mut self, key: u64) -> Option<V> {
        self.find(key)?;
        let node = self.trie.remove_key(&mut self.nodes, &WordBits, &key)?;
        Some(self.nodes.release(node).value)
    }

    /// Keeps only the entries for which `keep` returns `true`.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(u64, &mut V) -> bool,
    {
        let mut rejected = Vec::new();
        self.trie.walk_mut(&mut self.nodes, &WordBits, |nodes, node| {
            let slot = nodes.item_mut(node);
            if !keep(slot.key, &mut slot.value) {
                rejected.push(node);
            }
            None::<()>
        });
        for node in rejected {
            self.trie.remove_node(&mut self.nodes, &WordBits, node);
            self.nodes.release(node);
        }
    }

    /// Calls `action` on each entry in ascending key order until it returns
    /// `Some`.
    pub fn walk<R, F>(&self, mut action: F) -> Option<R>
    where
        F: FnMut(u64, &V) -> Option<R>,
    {
        self.trie.walk(&self.nodes, &WordBits, |node| {
            let slot = self.nodes.item(node);
            action(slot.key, &slot.value)
        })
    }

    /// Entries in ascending key order.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            map: self,
            cursor: self.trie.cursor(),
            remaining: self.len(),
        }
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.trie = Trie::new();
        self.nodes.clear();
    }
}

#[cfg(test)]
impl<V> UintMap<V> {
    pub(crate) fn check_structure(&self) {
        assert_eq!(self.trie.validate(&self.nodes, &WordBits), self.nodes.len());
    }
}

impl<V> Default for UintMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, V> IntoIterator for &'a UintMap<V> {
    type Item = (u64, &'a V);
    type IntoIter = Iter<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a [`UintMap`].
pub struct Iter<'a, V> {
    map: &'a UintMap<V>,
    cursor: Cursor,
    remaining: usize,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (u64, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let map = self.map;
        let slot = map.nodes.item(self.cursor.next(&map.nodes, &WordBits)?);
        self.remaining -= 1;
        Some((slot.key, &slot.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<V> ExactSizeIterator for Iter<'_, V> {}

impl<V> FusedIterator for Iter<'_, V> {}
