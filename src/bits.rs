//! Growable, MSB-first bit buffer that need not be byte-aligned.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raised when bytes cannot hold the requested number of bits.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{bit_length} bits do not fit in {byte_length} bytes")]
pub struct BitLengthError {
    /// Requested bit length.
    pub bit_length: usize,
    /// Available bytes.
    pub byte_length: usize,
}

/// Bit buffer stored in big-endian bit order within each byte.
///
/// Bits past `len` in the last byte are always zero, so two arrays holding the
/// same bits compare equal.
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BitArray {
    bytes: Vec<u8>,
    len: usize,
}

impl BitArray {
    /// Creates an empty array.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty array with room for `bits` bits.
    pub fn with_capacity(bits: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(bits.div_ceil(8)),
            len: 0,
        }
    }

    /// Takes the first `bit_length` bits of `bytes`.
    ///
    /// Extra trailing bytes and the unused low bits of the last byte are
    /// discarded.
    pub fn from_bytes(bytes: &[u8], bit_length: usize) -> Result<Self, BitLengthError> {
        if bit_length > bytes.len() * 8 {
            return Err(BitLengthError {
                bit_length,
                byte_length: bytes.len(),
            });
        }
        let mut out = bytes[..bit_length.div_ceil(8)].to_vec();
        let tail = bit_length % 8;
        if tail != 0 {
            if let Some(last) = out.last_mut() {
                *last &= 0xFFu8 << (8 - tail);
            }
        }
        Ok(Self {
            bytes: out,
            len: bit_length,
        })
    }

    /// Number of bits.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true when no bits are stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Backing bytes, zero-padded to a byte boundary.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Copies the backing bytes out.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    /// Reads the bit at `index`.
    #[inline]
    pub fn get(&self, index: usize) -> Option<bool> {
        if index >= self.len {
            return None;
        }
        Some(self.bytes[index / 8] & (0x80 >> (index % 8)) != 0)
    }

    /// Appends one bit.
    #[inline]
    pub fn push(&mut self, bit: bool) {
        let index = self.len;
        if index % 8 == 0 {
            self.bytes.push(0);
        }
        if bit {
            self.bytes[index / 8] |= 0x80 >> (index % 8);
        }
        self.len += 1;
    }

    /// Appends the low `width` bits of `value`, most significant first.
    pub fn push_bits(&mut self, value: u64, width: u32) {
        debug_assert!(width <= 64);
        for shift in (0..width).rev() {
            self.push((value >> shift) & 1 == 1);
        }
    }

    /// Reads `width` bits starting at `offset` as an unsigned integer.
    pub fn read_bits(&self, offset: usize, width: u32) -> Option<u64> {
        if width > 64 || offset.checked_add(width as usize)? > self.len {
            return None;
        }
        let mut value = 0u64;
        for index in offset..offset + width as usize {
            value = (value << 1) | u64::from(self.get(index)?);
        }
        Some(value)
    }

    /// Appends all bits of `other`.
    pub fn extend(&mut self, other: &BitArray) {
        if self.len % 8 == 0 {
            self.bytes.extend_from_slice(&other.bytes);
            self.len += other.len;
            return;
        }
        for index in 0..other.len {
            self.push(other.bytes[index / 8] & (0x80 >> (index % 8)) != 0);
        }
    }

    /// Copies bits `[start, end)` into a new array. The range is clamped to `len`.
    pub fn slice(&self, start: usize, end: usize) -> BitArray {
        let end = end.min(self.len);
        let start = start.min(end);
        if start % 8 == 0 {
            if let Ok(out) = Self::from_bytes(&self.bytes[start / 8..], end - start) {
                return out;
            }
        }
        let mut out = Self::with_capacity(end - start);
        for index in start..end {
            out.push(self.bytes[index / 8] & (0x80 >> (index % 8)) != 0);
        }
        out
    }

    /// Splits into consecutive runs of at most `chunk_bits` bits.
    ///
    /// An empty array yields no runs. `chunk_bits` must be positive.
    pub fn split(&self, chunk_bits: usize) -> Vec<BitArray> {
        assert!(chunk_bits > 0, "chunk size must be positive");
        (0..self.len)
            .step_by(chunk_bits)
            .map(|start| self.slice(start, start + chunk_bits))
            .collect()
    }

    /// Concatenates runs in order.
    pub fn concat<'a>(runs: impl IntoIterator<Item = &'a BitArray>) -> BitArray {
        let mut out = BitArray::new();
        for run in runs {
            out.extend(run);
        }
        out
    }
}

impl fmt::Debug for BitArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitArray({} bits: ", self.len)?;
        for index in 0..self.len.min(64) {
            f.write_str(if self.get(index) == Some(true) { "1" } else { "0" })?;
        }
        if self.len > 64 {
            f.write_str("...")?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(len: usize) -> BitArray {
        let mut bits = BitArray::new();
        for i in 0..len {
            bits.push(i % 3 == 0 || i % 7 == 1);
        }
        bits
    }

    #[test]
    fn push_and_read_fields() {
        let mut bits = BitArray::new();
        bits.push_bits(0x5A, 8);
        bits.push_bits(0b101, 3);
        bits.push_bits(0xBEEF, 16);
        assert_eq!(bits.len(), 27);
        assert_eq!(bits.read_bits(0, 8), Some(0x5A));
        assert_eq!(bits.read_bits(8, 3), Some(0b101));
        assert_eq!(bits.read_bits(11, 16), Some(0xBEEF));
        assert_eq!(bits.read_bits(20, 8), None);
    }

    #[test]
    fn from_bytes_masks_trailing_bits() {
        let bits = BitArray::from_bytes(&[0xFF, 0xFF, 0xAA], 12).unwrap();
        assert_eq!(bits.len(), 12);
        assert_eq!(bits.as_bytes(), &[0xFF, 0xF0]);
        assert_eq!(
            BitArray::from_bytes(&[0x00], 9),
            Err(BitLengthError {
                bit_length: 9,
                byte_length: 1
            })
        );
    }

    #[test]
    fn split_keeps_short_final_run() {
        let bits = pattern(140);
        let runs = bits.split(64);
        let lengths: Vec<usize> = runs.iter().map(BitArray::len).collect();
        assert_eq!(lengths, vec![64, 64, 12]);
        assert_eq!(BitArray::concat(&runs), bits);
    }

    #[test]
    fn unaligned_extend_matches_bitwise_push() {
        let a = pattern(13);
        let b = pattern(29);
        let mut joined = a.clone();
        joined.extend(&b);

        let mut expected = BitArray::new();
        for i in 0..a.len() {
            expected.push(a.get(i).unwrap());
        }
        for i in 0..b.len() {
            expected.push(b.get(i).unwrap());
        }
        assert_eq!(joined, expected);
        assert_eq!(joined.slice(13, 42), b);
    }

    #[test]
    fn empty_array_splits_into_nothing() {
        assert!(BitArray::new().split(8).is_empty());
    }
}
