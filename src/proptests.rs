use super::*;

use crate::arena::Arena;
use crate::bits::{byte_bit, byte_len, first_difference, word_bit, word_divergence};
use proptest::prelude::*;
use proptest_derive::Arbitrary;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

/// A key as handed to the store: `bytes` may be shorter than `bits` needs,
/// or carry junk past it.
#[derive(Clone, Debug)]
struct BitKey {
    bytes: Vec<u8>,
    bits: u64,
}

impl BitKey {
    /// The significant bits only, zero padded to whole bytes.
    fn canonical(&self) -> (u64, Vec<u8>) {
        let len = byte_len(self.bits) as usize;
        let mut bytes = self.bytes.clone();
        bytes.resize(len, 0);
        let spare = (len as u64 * 8 - self.bits) as u32;
        if let Some(last) = bytes.last_mut() {
            *last &= 0xFFu8.checked_shl(spare).unwrap_or(0);
        }
        (self.bits, bytes)
    }

    /// Same significant bits, different padding.
    fn with_junk(&self) -> Self {
        let (bits, mut bytes) = self.canonical();
        let spare = (bytes.len() as u64 * 8 - bits) as u32;
        if let Some(last) = bytes.last_mut() {
            *last |= 0xFFu8.checked_shr(8 - spare).unwrap_or(0);
        }
        bytes.push(0xA5);
        Self { bytes, bits }
    }
}

fn bit_key_strategy() -> impl Strategy<Value = BitKey> {
    (0u64..=20, prop::collection::vec(0u8..4, 0..=3))
        .prop_map(|(bits, bytes)| BitKey { bytes, bits })
}

/// Keys are borrowed by the store, so each case draws its key pool up front
/// and operations refer to it by position.
fn pool_strategy() -> impl Strategy<Value = Vec<BitKey>> {
    prop::collection::vec(bit_key_strategy(), 1..=48).prop_map(|keys| {
        let junk: Vec<BitKey> = keys.iter().map(BitKey::with_junk).collect();
        keys.into_iter().chain(junk).collect()
    })
}

#[derive(Clone, Debug)]
enum Op {
    Insert(prop::sample::Index, u16),
    Remove(prop::sample::Index),
    Get(prop::sample::Index),
    Clear,
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        50 => (any::<prop::sample::Index>(), any::<u16>()).prop_map(|(i, v)| Op::Insert(i, v)),
        25 => any::<prop::sample::Index>().prop_map(Op::Remove),
        24 => any::<prop::sample::Index>().prop_map(Op::Get),
        1 => Just(Op::Clear),
    ];
    prop::collection::vec(op, 0..=400)
}

fn uint_key() -> impl Strategy<Value = u64> {
    prop_oneof![
        0u64..32,
        (0u32..64).prop_map(|shift| 1u64 << shift),
        any::<u64>(),
    ]
}

#[derive(Clone, Debug, Arbitrary)]
enum UintOp {
    Insert(#[proptest(strategy = "uint_key()")] u64, u32),
    Remove(#[proptest(strategy = "uint_key()")] u64),
    Get(#[proptest(strategy = "uint_key()")] u64),
    /// Drops keys divisible by `modulus + 2`.
    Retain(#[proptest(strategy = "0u64..6")] u64),
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence_dyn((pool, ops) in (pool_strategy(), ops_strategy())) {
        let mut t: DynTrie<'_, u16> = DynTrie::new();
        let mut m: BTreeMap<(u64, Vec<u8>), u16> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(i, value) => {
                    let key = i.get(&pool);
                    let old_t = t.insert_bits(&key.bytes, key.bits, value).unwrap();
                    let old_m = m.insert(key.canonical(), value);
                    prop_assert_eq!(old_t, old_m);
                }
                Op::Remove(i) => {
                    let key = i.get(&pool);
                    let old_t = t.remove_bits(&key.bytes, key.bits);
                    let old_m = m.remove(&key.canonical());
                    prop_assert_eq!(old_t, old_m);
                }
                Op::Get(i) => {
                    let key = i.get(&pool);
                    let got_t = t.get_bits(&key.bytes, key.bits).copied();
                    let got_m = m.get(&key.canonical()).copied();
                    prop_assert_eq!(got_t, got_m);
                    prop_assert_eq!(t.contains_key_bits(&key.bytes, key.bits), got_m.is_some());
                }
                Op::Clear => {
                    t.clear();
                    m.clear();
                }
            }

            prop_assert_eq!(t.len(), m.len());
        }

        t.check_structure();
        let got: Vec<((u64, Vec<u8>), u16)> = t
            .iter()
            .map(|(key, bits, value)| (BitKey { bytes: key.to_vec(), bits }.canonical(), *value))
            .collect();
        let expected: Vec<((u64, Vec<u8>), u16)> =
            m.iter().map(|(k, v)| (k.clone(), *v)).collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_equivalence_uint(ops in prop::collection::vec(any::<UintOp>(), 0..=400)) {
        let mut t: UintMap<u32> = UintMap::new();
        let mut m: BTreeMap<u64, u32> = BTreeMap::new();

        for op in ops {
            match op {
                UintOp::Insert(key, value) => {
                    prop_assert_eq!(t.insert(key, value).unwrap(), m.insert(key, value));
                }
                UintOp::Remove(key) => {
                    prop_assert_eq!(t.remove(key), m.remove(&key));
                }
                UintOp::Get(key) => {
                    prop_assert_eq!(t.get(key), m.get(&key));
                }
                UintOp::Retain(modulus) => {
                    t.retain(|key, _| key % (modulus + 2) != 0);
                    m.retain(|key, _| key % (modulus + 2) != 0);
                }
            }

            prop_assert_eq!(t.len(), m.len());
        }

        t.check_structure();
        let got: Vec<(u64, u32)> = t.iter().map(|(k, v)| (k, *v)).collect();
        let expected: Vec<(u64, u32)> = m.iter().map(|(k, v)| (*k, *v)).collect();
        prop_assert_eq!(got, expected);
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

fn small_set() -> Vec<Vec<u8>> {
    vec![
        b"".to_vec(),
        b"a".to_vec(),
        b"b".to_vec(),
        b"aa".to_vec(),
        b"ab".to_vec(),
        b"a\0".to_vec(),
    ]
}

#[test]
fn exhaustive_insert_order_small_set() {
    let keys = small_set();

    for_each_permutation(&keys, |perm| {
        let mut t: DynTrie<'_, u64> = DynTrie::new();
        let mut m: BTreeMap<(usize, Vec<u8>), u64> = BTreeMap::new();

        for (i, k) in perm.iter().enumerate() {
            let v = i as u64;
            assert_eq!(t.insert(k, v).unwrap(), m.insert((k.len(), k.clone()), v));
            t.check_structure();
        }

        let got: Vec<(Vec<u8>, u64)> = t.iter().map(|(k, _, v)| (k.to_vec(), *v)).collect();
        let expected: Vec<(Vec<u8>, u64)> = m.iter().map(|((_, k), v)| (k.clone(), *v)).collect();
        assert_eq!(got, expected);
    });
}

#[test]
fn exhaustive_remove_order_small_set() {
    let keys = small_set();

    for_each_permutation(&keys, |perm| {
        // Insert in a fixed order, then remove in every order.
        let mut t: DynTrie<'_, u64> = DynTrie::new();
        for (i, k) in keys.iter().enumerate() {
            t.insert(k, i as u64).unwrap();
        }

        for k in &perm {
            let i = keys.iter().position(|key| key == k).unwrap() as u64;
            assert_eq!(t.remove(k), Some(i));
            assert_eq!(t.remove(k), None);
            t.check_structure();
        }
        assert_eq!(t.len(), 0);
        assert_eq!(t.lengths(), 0);
    });
}

#[test]
fn exhaustive_uint_remove_order() {
    let keys = [0u64, 1, 2, 3, 1 << 62, 1 << 63, u64::MAX];

    for_each_permutation(&keys, |perm| {
        let mut t = UintMap::new();
        for k in keys {
            t.insert(k, k).unwrap();
        }
        for (i, k) in perm.iter().enumerate() {
            assert_eq!(t.remove(*k), Some(*k));
            assert_eq!(t.len(), keys.len() - i - 1);
            t.check_structure();
        }
        assert!(t.is_empty());
    });
}

// ---------------------------------------------------------------------------
// Seeded add/lookup/remove schedule
// ---------------------------------------------------------------------------

const SEED: u64 = 16;
const RUNS: usize = 4;
const MAX_SIZE: usize = 512;
const MAX_KEY_BYTES: usize = 8;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Order {
    Random,
    Ascending,
    Descending,
}

fn random_keys(rng: &mut StdRng, count: usize, order: Order) -> Vec<Vec<u8>> {
    let mut keys: Vec<Vec<u8>> = (0..count)
        .map(|_| {
            let len = rng.gen_range(0..=MAX_KEY_BYTES);
            // A narrow alphabet so that equal keys recur.
            (0..len).map(|_| rng.gen_range(0..3)).collect()
        })
        .collect();
    let by_len_then_bytes = |a: &Vec<u8>, b: &Vec<u8>| a.len().cmp(&b.len()).then_with(|| a.cmp(b));
    match order {
        Order::Random => {}
        Order::Ascending => keys.sort_by(by_len_then_bytes),
        Order::Descending => keys.sort_by(|a, b| by_len_then_bytes(b, a)),
    }
    keys
}

/// A structure under test, driven by position in a shared key pool.
trait Subject {
    /// Adds key `id`, returning the id of an equal key it replaced.
    fn add(&mut self, id: usize) -> Option<usize>;
    /// Id stored under a key equal to key `id`.
    fn lookup(&self, id: usize) -> Option<usize>;
    fn remove(&mut self, id: usize);
    fn walk(&self, action: &mut dyn FnMut(usize));
    fn check(&self);
}

/// Starts certain to add, then shifts probability towards removal until
/// the structure has been emptied.
fn run_schedule(rng: &mut StdRng, keys: &[Vec<u8>], subject: &mut dyn Subject) {
    let mut active = vec![false; keys.len()];
    let mut next = 0;
    let mut size = 0;
    loop {
        if next < keys.len() && rng.gen_range(0..keys.len()) >= next {
            if let Some(replaced) = subject.add(next) {
                assert_eq!(keys[replaced], keys[next]);
                assert!(active[replaced]);
                active[replaced] = false;
            } else {
                size += 1;
            }
            active[next] = true;
            next += 1;
        } else if size != 0 {
            for (id, is_active) in active[..next].iter().enumerate() {
                match subject.lookup(id) {
                    None => assert!(!is_active, "key {id} lost"),
                    Some(found) if *is_active => assert_eq!(found, id),
                    Some(found) => assert_eq!(keys[found], keys[id]),
                }
            }
            let mut id = rng.gen_range(0..size);
            while !active[id] {
                id = (id + 1) % next;
            }
            subject.remove(id);
            active[id] = false;
            size -= 1;
            subject.check();
        } else {
            break;
        }
    }
    assert!(active.iter().all(|a| !a));
}

/// Builds a structure from a random prefix of the pool and checks that a
/// walk reports each live id exactly once.
fn run_walk(rng: &mut StdRng, len: usize, subject: &mut dyn Subject) {
    let size = rng.gen_range(0..len);
    let mut pending = vec![0i32; size];
    for id in 0..size {
        if let Some(replaced) = subject.add(id) {
            pending[replaced] = 0;
        }
        pending[id] = 1;
    }
    subject.check();
    subject.walk(&mut |id| pending[id] -= 1);
    assert!(pending.iter().all(|p| *p == 0), "walk missed or repeated an entry");
}

struct Store<'k> {
    keys: &'k [Vec<u8>],
    map: DynTrie<'k, usize>,
}

impl Subject for Store<'_> {
    fn add(&mut self, id: usize) -> Option<usize> {
        self.map.insert(&self.keys[id], id).unwrap()
    }

    fn lookup(&self, id: usize) -> Option<usize> {
        self.map.get(&self.keys[id]).copied()
    }

    fn remove(&mut self, id: usize) {
        assert_eq!(self.map.remove(&self.keys[id]), Some(id));
    }

    fn walk(&self, action: &mut dyn FnMut(usize)) {
        self.map.walk(|_, _, id| {
            action(*id);
            None::<()>
        });
    }

    fn check(&self) {
        self.map.check_structure();
    }
}

/// Routes node ids on their pool key, prefixed by its 64-bit length so keys
/// of different lengths share one trie.
#[derive(Clone, Copy)]
struct SizedBits<'k>(&'k [Vec<u8>]);

fn sized_bit(key: &[u8], index: BitIndex) -> usize {
    if index < bits::WORD_BITS {
        word_bit(key.len() as u64, index)
    } else {
        byte_bit(key, index - bits::WORD_BITS)
    }
}

impl Select<[u8]> for SizedBits<'_> {
    fn select(&self, key: &[u8], index: BitIndex) -> usize {
        sized_bit(key, index)
    }
}

impl Select<usize> for SizedBits<'_> {
    fn select(&self, id: &usize, index: BitIndex) -> usize {
        sized_bit(&self.0[*id], index)
    }
}

/// The bare engine: one node per added key, removal by node identity.
struct Engine<'k> {
    keys: &'k [Vec<u8>],
    nodes: Arena<usize>,
    trie: Trie,
    handles: Vec<Option<NodeId>>,
}

impl<'k> Engine<'k> {
    fn new(keys: &'k [Vec<u8>]) -> Self {
        Self {
            keys,
            nodes: Arena::new(NodeKind::Node),
            trie: Trie::new(),
            handles: vec![None; keys.len()],
        }
    }

    fn divergence(a: &[u8], b: &[u8]) -> Option<BitIndex> {
        word_divergence(a.len() as u64, b.len() as u64).or_else(|| {
            first_difference(a, b, a.len() as u64 * 8).map(|index| index + bits::WORD_BITS)
        })
    }
}

impl Subject for Engine<'_> {
    fn add(&mut self, id: usize) -> Option<usize> {
        let keys = self.keys;
        let sel = SizedBits(keys);
        let key = keys[id].as_slice();
        self.nodes.reserve().unwrap();
        let node = self.nodes.insert(id);
        self.handles[id] = Some(node);
        let Some(nearest) = self.trie.find_nearest(&self.nodes, &sel, key) else {
            self.trie.plant(&mut self.nodes, node);
            return None;
        };
        let other = *self.nodes.item(nearest);
        match Self::divergence(key, &keys[other]) {
            None => {
                self.trie.replace(&mut self.nodes, &sel, nearest, node);
                self.nodes.release(nearest);
                self.handles[other] = None;
                Some(other)
            }
            Some(index) => {
                self.nodes.links_mut(node).index = index;
                self.trie.insert(&mut self.nodes, &sel, node);
                None
            }
        }
    }

    fn lookup(&self, id: usize) -> Option<usize> {
        let keys = self.keys;
        let node = self.trie.find_nearest(&self.nodes, &SizedBits(keys), keys[id].as_slice())?;
        let found = *self.nodes.item(node);
        (keys[found] == keys[id]).then_some(found)
    }

    fn remove(&mut self, id: usize) {
        let node = self.handles[id].take().unwrap();
        self.trie.remove_node(&mut self.nodes, &SizedBits(self.keys), node);
        assert_eq!(self.nodes.release(node), id);
    }

    fn walk(&self, action: &mut dyn FnMut(usize)) {
        self.trie.walk(&self.nodes, &SizedBits(self.keys), |node| {
            action(*self.nodes.item(node));
            None::<()>
        });
    }

    fn check(&self) {
        let count = self.trie.validate(&self.nodes, &SizedBits(self.keys));
        assert_eq!(count, self.nodes.len());
    }
}

const ORDERS: [Order; 3] = [Order::Random, Order::Ascending, Order::Descending];

#[test]
fn seeded_schedule_store() {
    let mut rng = StdRng::seed_from_u64(SEED);
    for order in ORDERS {
        for _ in 0..RUNS {
            let keys = random_keys(&mut rng, MAX_SIZE, order);
            let mut subject = Store {
                keys: &keys,
                map: DynTrie::new(),
            };
            run_schedule(&mut rng, &keys, &mut subject);
            assert!(subject.map.is_empty());
            assert_eq!(subject.map.lengths(), 0);
        }
    }
}

#[test]
fn seeded_schedule_engine() {
    let mut rng = StdRng::seed_from_u64(SEED);
    for order in ORDERS {
        for _ in 0..RUNS {
            let keys = random_keys(&mut rng, MAX_SIZE, order);
            let mut subject = Engine::new(&keys);
            run_schedule(&mut rng, &keys, &mut subject);
            assert!(subject.trie.is_empty());
            assert!(subject.nodes.is_empty());
        }
    }
}

#[test]
fn seeded_walk_counts() {
    let mut rng = StdRng::seed_from_u64(SEED);
    for _ in 0..RUNS * 4 {
        let keys = random_keys(&mut rng, MAX_SIZE, Order::Random);
        run_walk(
            &mut rng,
            keys.len(),
            &mut Store {
                keys: &keys,
                map: DynTrie::new(),
            },
        );
        run_walk(&mut rng, keys.len(), &mut Engine::new(&keys));
    }
}

#[test]
fn seeded_wide_lengths() {
    // Bit lengths across the whole 0..=64 range, with junk padding.
    let mut rng = StdRng::seed_from_u64(SEED);
    let pool: Vec<BitKey> = (0..2000)
        .map(|_| {
            let bits = rng.gen_range(0..=64);
            let bytes = (0..byte_len(bits)).map(|_| rng.gen_range(0..4)).collect();
            BitKey { bytes, bits }
        })
        .collect();

    let mut t = DynTrie::new();
    let mut m: BTreeMap<(u64, Vec<u8>), usize> = BTreeMap::new();
    for step in 0..20_000 {
        let i = rng.gen_range(0..pool.len());
        let key = &pool[i];
        if rng.gen_bool(0.6) {
            assert_eq!(
                t.insert_bits(&key.bytes, key.bits, i).unwrap(),
                m.insert(key.canonical(), i)
            );
        } else {
            assert_eq!(t.remove_bits(&key.bytes, key.bits), m.remove(&key.canonical()));
        }
        if step % 1000 == 0 {
            t.check_structure();
        }
    }
    t.check_structure();
    assert_eq!(t.len(), m.len());
    for key in &pool {
        assert_eq!(t.get_bits(&key.bytes, key.bits), m.get(&key.canonical()));
    }
}
