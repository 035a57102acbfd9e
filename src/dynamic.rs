//! Variable-length key/value store.
//!
//! A two-level instantiation of the trie engine. The outer trie holds one
//! bucket per distinct key length (in bits), routed on the length itself.
//! Each bucket owns an inner trie of entries routed on key content. Only the
//! first `bits` bits of a key are significant; padding bits in a final
//! partial byte are ignored, and bytes missing from a short slice read as
//! zero.
//!
//! A zero-length bucket holds at most one entry: with no bits to route on,
//! its inner trie is that entry alone.
//!
//! Keys are borrowed, never copied. Values are owned by the store.

use std::fmt;
use std::iter::FusedIterator;
use std::mem;

use crate::arena::Arena;
use crate::bits::{self, byte_bit, word_bit, word_divergence};
use crate::error::{AllocError, InsertError, NodeKind};
use crate::trie::{BitIndex, BranchPosition, Cursor, NodeId, Nodes, Select, Trie};
use crate::{Config, MemoryStats};

/// All entries of one key length.
#[derive(Clone, Copy, Debug)]
struct Bucket {
    bits: u64,
    keys: Trie,
}

#[derive(Debug)]
struct Entry<'k, V> {
    key: &'k [u8],
    value: V,
}

/// Routes buckets and length queries on the big-endian bits of the length.
#[derive(Clone, Copy, Debug, Default)]
struct LengthBits;

impl Select<u64> for LengthBits {
    #[inline]
    fn select(&self, bits: &u64, index: BitIndex) -> usize {
        word_bit(*bits, index)
    }
}

impl Select<Bucket> for LengthBits {
    #[inline]
    fn select(&self, bucket: &Bucket, index: BitIndex) -> usize {
        word_bit(bucket.bits, index)
    }
}

/// Routes entries and key queries on key content.
#[derive(Clone, Copy, Debug, Default)]
struct KeyBits;

impl Select<[u8]> for KeyBits {
    #[inline]
    fn select(&self, key: &[u8], index: BitIndex) -> usize {
        byte_bit(key, index)
    }
}

impl<V> Select<Entry<'_, V>> for KeyBits {
    #[inline]
    fn select(&self, entry: &Entry<'_, V>, index: BitIndex) -> usize {
        byte_bit(entry.key, index)
    }
}

/// Map from bit strings of any length to values.
///
/// # Example
///
/// ```
/// use backtrie::DynTrie;
///
/// let keys = [b"pear".as_slice(), b"fig", b"plum"];
/// let mut map = DynTrie::new();
/// for (i, key) in keys.iter().enumerate() {
///     map.insert(key, i).unwrap();
/// }
/// assert_eq!(map.get(b"fig"), Some(&1));
/// // Only the top 12 bits of the key count.
/// map.insert_bits(&[0xAB, 0xC0], 12, 9).unwrap();
/// assert_eq!(map.get_bits(&[0xAB, 0xCF], 12), Some(&9));
/// ```
pub struct DynTrie<'k, V> {
    lengths: Trie,
    buckets: Arena<Bucket>,
    entries: Arena<Entry<'k, V>>,
    len: usize,
}

impl<'k, V> DynTrie<'k, V> {
    /// An empty store.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// An empty store with preallocated entries and optional node limits.
    pub fn with_config(config: Config) -> Self {
        Self {
            lengths: Trie::new(),
            buckets: Arena::with_capacity(NodeKind::Bucket, 0, config.max_buckets),
            entries: Arena::with_capacity(
                NodeKind::Entry,
                config.initial_capacity,
                config.max_entries,
            ),
            len: 0,
        }
    }

    /// Number of stored keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the store is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of distinct key lengths.
    pub fn lengths(&self) -> usize {
        self.buckets.len()
    }

    /// Stores `value` under the first `bits` bits of `key`, returning the
    /// value it replaced.
    ///
    /// On a key that is already present, the stored key reference is
    /// replaced by `key` as well. On failure nothing is changed and the
    /// error hands `key` and `value` back.
    pub fn insert_bits(
        &mut self,
        key: &'k [u8],
        bits: u64,
        value: V,
    ) -> Result<Option<V>, InsertError<'k, V>> {
        let nearest = self
            .lengths
            .find_nearest(&self.buckets, &LengthBits, &bits);
        match nearest {
            Some(bucket) if self.buckets.item(bucket).bits == bits => {
                self.insert_entry(bucket, key, bits, value)
            }
            _ => self.insert_bucket(nearest, key, bits, value).map(|()| None),
        }
    }

    fn insert_entry(
        &mut self,
        bucket: NodeId,
        key: &'k [u8],
        bits: u64,
        value: V,
    ) -> Result<Option<V>, InsertError<'k, V>> {
        let mut keys = self.buckets.item(bucket).keys;
        if let Some(nearest) = keys.find_nearest(&self.entries, &KeyBits, key) {
            let entry = self.entries.item_mut(nearest);
            match bits::first_difference(key, entry.key, bits) {
                None => {
                    entry.key = key;
                    return Ok(Some(mem::replace(&mut entry.value, value)));
                }
                Some(index) => {
                    if let Err(err) = self.entries.reserve() {
                        return Err(refused(err, key, bits, value));
                    }
                    let node = self.entries.insert(Entry { key, value });
                    self.entries.links_mut(node).index = index;
                    keys.insert(&mut self.entries, &KeyBits, node);
                }
            }
        } else {
            // Buckets are released with their last entry, so this is only
            // reached if that invariant was broken; recover by planting.
            if let Err(err) = self.entries.reserve() {
                return Err(refused(err, key, bits, value));
            }
            let node = self.entries.insert(Entry { key, value });
            keys.plant(&mut self.entries, node);
        }
        self.buckets.item_mut(bucket).keys = keys;
        self.len += 1;
        Ok(None)
    }

    fn insert_bucket(
        &mut self,
        nearest: Option<NodeId>,
        key: &'k [u8],
        bits: u64,
        value: V,
    ) -> Result<(), InsertError<'k, V>> {
        // Both nodes are reserved before either is linked.
        if let Err(err) = self.buckets.reserve() {
            return Err(refused(err, key, bits, value));
        }
        if let Err(err) = self.entries.reserve() {
            return Err(refused(err, key, bits, value));
        }

        let divergence = nearest.and_then(|n| word_divergence(bits, self.buckets.item(n).bits));
        let entry = self.entries.insert(Entry { key, value });
        let mut keys = Trie::new();
        keys.plant(&mut self.entries, entry);

        let bucket = self.buckets.insert(Bucket { bits, keys });
        if let Some(index) = divergence {
            self.buckets.links_mut(bucket).index = index;
        }
        self.lengths.insert(&mut self.buckets, &LengthBits, bucket);
        self.len += 1;
        tracing::trace!(bits, buckets = self.buckets.len(), "created length bucket");
        Ok(())
    }

    /// Stores `value` under the whole of `key`.
    pub fn insert(&mut self, key: &'k [u8], value: V) -> Result<Option<V>, InsertError<'k, V>> {
        match byte_len_bits(key) {
            Some(bits) => self.insert_bits(key, bits, value),
            None => {
                tracing::debug!(len = key.len(), "key length overflows bit count");
                Err(refused(AllocError::new(NodeKind::KeyLength), key, u64::MAX, value))
            }
        }
    }

    fn find(&self, key: &[u8], bits: u64) -> Option<NodeId> {
        let bucket = self.lengths.find_nearest(&self.buckets, &LengthBits, &bits)?;
        let bucket = self.buckets.item(bucket);
        if bucket.bits != bits {
            return None;
        }
        let entry = bucket.keys.find_nearest(&self.entries, &KeyBits, key)?;
        bits::matches(key, self.entries.item(entry).key, bits).then_some(entry)
    }

    /// Value stored under the first `bits` bits of `key`.
    pub fn get_bits(&self, key: &[u8], bits: u64) -> Option<&V> {
        self.find(key, bits).map(|entry| &self.entries.item(entry).value)
    }

    /// Mutable value stored under the first `bits` bits of `key`.
    pub fn get_bits_mut(&mut self, key: &[u8], bits: u64) -> Option<&mut V> {
        let entry = self.find(key, bits)?;
        Some(&mut self.entries.item_mut(entry).value)
    }

    /// Stored key reference and value for the first `bits` bits of `key`.
    pub fn get_key_value_bits(&self, key: &[u8], bits: u64) -> Option<(&'k [u8], &V)> {
        let entry = self.entries.item(self.find(key, bits)?);
        Some((entry.key, &entry.value))
    }

    /// Whether the first `bits` bits of `key` are stored.
    pub fn contains_key_bits(&self, key: &[u8], bits: u64) -> bool {
        self.find(key, bits).is_some()
    }

    /// Value stored under the whole of `key`.
    pub fn get(&self, key: &[u8]) -> Option<&V> {
        self.get_bits(key, byte_len_bits(key)?)
    }

    /// Mutable value stored under the whole of `key`.
    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        self.get_bits_mut(key, byte_len_bits(key)?)
    }

    /// Whether the whole of `key` is stored.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        byte_len_bits(key).is_some_and(|bits| self.contains_key_bits(key, bits))
    }

    /// Removes the first `bits` bits of `key` and returns its value.
    ///
    /// The bucket goes with its last entry.
    pub fn remove_bits(&mut self, key: &[u8], bits: u64) -> Option<V> {
        let outer =
            self.lengths
                .leaf_position(&self.buckets, &LengthBits, &bits, BranchPosition::ROOT)?;
        let bucket = *self.buckets.item(outer.leaf);
        if bucket.bits != bits {
            return None;
        }

        let mut keys = bucket.keys;
        let inner = keys.leaf_position(&self.entries, &KeyBits, key, BranchPosition::ROOT)?;
        if !bits::matches(key, self.entries.item(inner.leaf).key, bits) {
            return None;
        }
        let branch = keys.branch_position(&self.entries, &KeyBits, inner.leaf, key);
        keys.cut(&mut self.entries, branch.edge, inner);
        let entry = self.entries.release(inner.leaf);
        self.len -= 1;

        if keys.is_empty() {
            let branch = self
                .lengths
                .branch_position(&self.buckets, &LengthBits, outer.leaf, &bits);
            self.lengths.cut(&mut self.buckets, branch.edge, outer);
            self.buckets.release(outer.leaf);
            tracing::trace!(bits, buckets = self.buckets.len(), "released length bucket");
        } else {
            self.buckets.item_mut(outer.leaf).keys = keys;
        }
        Some(entry.value)
    }

    /// Removes the whole of `key` and returns its value.
    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        self.remove_bits(key, byte_len_bits(key)?)
    }

    /// Calls `action(key, bits, value)` on every entry until it returns
    /// `Some`.
    ///
    /// Lengths are visited in ascending order, and keys of one length in
    /// ascending order of their significant bits.
    pub fn walk<R, F>(&self, mut action: F) -> Option<R>
    where
        F: FnMut(&'k [u8], u64, &V) -> Option<R>,
    {
        self.lengths.walk(&self.buckets, &LengthBits, |bucket| {
            let bucket = self.buckets.item(bucket);
            bucket.keys.walk(&self.entries, &KeyBits, |entry| {
                let entry = self.entries.item(entry);
                action(entry.key, bucket.bits, &entry.value)
            })
        })
    }

    /// [`DynTrie::walk`] with mutable values.
    pub fn walk_mut<R, F>(&mut self, mut action: F) -> Option<R>
    where
        F: FnMut(&'k [u8], u64, &mut V) -> Option<R>,
    {
        let Self {
            lengths,
            buckets,
            entries,
            ..
        } = self;
        lengths.walk(&*buckets, &LengthBits, |bucket| {
            let bucket = buckets.item(bucket);
            bucket.keys.walk_mut(&mut *entries, &KeyBits, |store, entry| {
                let entry = store.item_mut(entry);
                action(entry.key, bucket.bits, &mut entry.value)
            })
        })
    }

    /// Entries as `(key, bits, value)`, in [`DynTrie::walk`] order.
    pub fn iter(&self) -> Iter<'_, 'k, V> {
        Iter {
            store: self,
            lengths: self.lengths.cursor(),
            keys: None,
            remaining: self.len,
        }
    }

    /// Drops every entry and bucket.
    pub fn clear(&mut self) {
        tracing::trace!(
            keys = self.len,
            buckets = self.buckets.len(),
            "clearing store"
        );
        self.lengths = Trie::new();
        self.entries.clear();
        self.buckets.clear();
        self.len = 0;
    }

    /// Memory held by the store's nodes. Key bytes are borrowed and not
    /// counted.
    pub fn memory_usage(&self) -> MemoryStats {
        let node_bytes = self.buckets.memory_usage() + self.entries.memory_usage();
        MemoryStats {
            node_bytes,
            num_keys: self.len,
            bytes_per_key: if self.len == 0 {
                0.0
            } else {
                node_bytes as f64 / self.len as f64
            },
        }
    }
}

#[cfg(test)]
impl<V> DynTrie<'_, V> {
    /// Structural checks over both levels.
    pub(crate) fn check_structure(&self) {
        let buckets = self.lengths.validate(&self.buckets, &LengthBits);
        assert_eq!(buckets, self.buckets.len(), "unreachable bucket");
        let mut keys = 0;
        self.lengths.walk(&self.buckets, &LengthBits, |bucket| {
            let bucket = self.buckets.item(bucket);
            assert!(!bucket.keys.is_empty(), "empty bucket for {} bits", bucket.bits);
            keys += bucket.keys.validate(&self.entries, &KeyBits);
            bucket.keys.walk(&self.entries, &KeyBits, |entry| {
                let key = self.entries.item(entry).key;
                assert_eq!(self.find(key, bucket.bits), Some(entry));
                None::<()>
            });
            None::<()>
        });
        assert_eq!(keys, self.len);
        assert_eq!(self.entries.len(), self.len);
        assert_eq!(self.iter().count(), self.len);
    }
}

#[inline]
fn byte_len_bits(key: &[u8]) -> Option<u64> {
    u64::try_from(key.len()).ok()?.checked_mul(8)
}

fn refused<'k, V>(err: AllocError, key: &'k [u8], bits: u64, value: V) -> InsertError<'k, V> {
    InsertError {
        kind: err.kind,
        key,
        bits,
        value,
    }
}

impl<V> Default for DynTrie<'_, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: fmt::Debug> fmt::Debug for DynTrie<'_, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(key, bits, value)| ((key, bits), value)))
            .finish()
    }
}

impl<'a, 'k, V> IntoIterator for &'a DynTrie<'k, V> {
    type Item = (&'k [u8], u64, &'a V);
    type IntoIter = Iter<'a, 'k, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a [`DynTrie`].
pub struct Iter<'a, 'k, V> {
    store: &'a DynTrie<'k, V>,
    lengths: Cursor,
    /// Length and position within the current bucket.
    keys: Option<(u64, Cursor)>,
    remaining: usize,
}

impl<'a, 'k, V> Iterator for Iter<'a, 'k, V> {
    type Item = (&'k [u8], u64, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let store = self.store;
        loop {
            if let Some((bits, keys)) = &mut self.keys {
                if let Some(entry) = keys.next(&store.entries, &KeyBits) {
                    self.remaining -= 1;
                    let entry = store.entries.item(entry);
                    return Some((entry.key, *bits, &entry.value));
                }
            }
            let bucket = store.buckets.item(self.lengths.next(&store.buckets, &LengthBits)?);
            self.keys = Some((bucket.bits, bucket.keys.cursor()));
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<V> ExactSizeIterator for Iter<'_, '_, V> {}

impl<V> FusedIterator for Iter<'_, '_, V> {}
