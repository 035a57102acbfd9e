//! Bit selection over byte strings and 64-bit words.
//!
//! Bits are numbered MSB-first: bit `0` is the most significant bit of byte
//! `0`, bit `8` the most significant bit of byte `1`, and so on. With this
//! numbering a depth-first walk that visits child `0` before child `1`
//! yields keys in ascending order.
//!
//! Every selector here is total: positions past the end of the key read as
//! `0`, since the trie probes indices without knowing a key's length.

use crate::trie::BitIndex;

/// Number of bits in a word key.
pub const WORD_BITS: BitIndex = u64::BITS as BitIndex;

#[inline]
fn byte_index(bit: BitIndex) -> BitIndex {
    bit / 8
}

/// Bit index within its byte, where `0` is the MSB and `7` is the LSB.
#[inline]
fn bit_in_byte_msb0(bit: BitIndex) -> u32 {
    (bit % 8) as u32
}

/// Byte `index` of `key`, or `0` past its end.
#[inline]
pub fn byte_at(key: &[u8], index: BitIndex) -> u8 {
    usize::try_from(index)
        .ok()
        .and_then(|i| key.get(i))
        .copied()
        .unwrap_or(0)
}

/// Number of bytes needed to hold `bits` bits.
#[inline]
pub fn byte_len(bits: BitIndex) -> BitIndex {
    bits.div_ceil(8)
}

/// Bit `index` of `key`.
#[inline]
pub fn byte_bit(key: &[u8], index: BitIndex) -> usize {
    let byte = byte_at(key, byte_index(index));
    usize::from((byte >> (7 - bit_in_byte_msb0(index))) & 1)
}

/// First bit below `bits` at which `a` and `b` differ.
///
/// Whole bytes are compared first; the first differing byte is then refined
/// to its leading differing bit. A difference at or past `bits` only touches
/// padding in the final partial byte, so the keys are equal.
pub fn first_difference(a: &[u8], b: &[u8], bits: BitIndex) -> Option<BitIndex> {
    let stored = a.len().max(b.len()) as BitIndex;
    let bytes = byte_len(bits).min(stored);
    for i in 0..bytes {
        let diff = byte_at(a, i) ^ byte_at(b, i);
        if diff != 0 {
            let index = i * 8 + BitIndex::from(diff.leading_zeros());
            return (index < bits).then_some(index);
        }
    }
    None
}

/// Whether the first `bits` bits of `a` and `b` agree.
#[inline]
pub fn matches(a: &[u8], b: &[u8], bits: BitIndex) -> bool {
    first_difference(a, b, bits).is_none()
}

/// Bit `index` of `word`, read as its big-endian bytes.
#[inline]
pub fn word_bit(word: u64, index: BitIndex) -> usize {
    if index >= WORD_BITS {
        return 0;
    }
    ((word >> (WORD_BITS - 1 - index)) & 1) as usize
}

/// First bit at which two words differ.
#[inline]
pub fn word_divergence(a: u64, b: u64) -> Option<BitIndex> {
    let diff = a ^ b;
    (diff != 0).then(|| BitIndex::from(diff.leading_zeros()))
}
