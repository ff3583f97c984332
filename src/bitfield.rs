//! Piece availability bitfield
//!
//! Bit `i` (counted from the high bit of the first byte) is set when piece `i`
//! is held. Spare bits past the piece count are always kept clear.

/// Fixed-size bit-vector over piece indices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
    piece_count: usize,
}

impl Bitfield {
    /// Create an empty bitfield for `piece_count` pieces
    pub fn new(piece_count: usize) -> Self {
        Self {
            bits: vec![0; piece_count.div_ceil(8)],
            piece_count,
        }
    }

    /// Create a bitfield with every piece set
    pub fn full(piece_count: usize) -> Self {
        let mut bf = Self {
            bits: vec![0xFF; piece_count.div_ceil(8)],
            piece_count,
        };
        bf.clear_spare_bits();
        bf
    }

    /// Build a bitfield from wire bytes, padding or truncating to the expected size
    pub fn from_bytes(bytes: &[u8], piece_count: usize) -> Self {
        let mut bits = bytes.to_vec();
        bits.resize(piece_count.div_ceil(8), 0);
        let mut bf = Self { bits, piece_count };
        bf.clear_spare_bits();
        bf
    }

    /// Whether piece `index` is held
    pub fn has(&self, index: usize) -> bool {
        if index >= self.piece_count {
            return false;
        }
        let byte_index = index / 8;
        let bit_index = 7 - (index % 8);
        (self.bits[byte_index] >> bit_index) & 1 == 1
    }

    /// Mark piece `index` as held. Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize) {
        if index >= self.piece_count {
            return;
        }
        let byte_index = index / 8;
        let bit_index = 7 - (index % 8);
        self.bits[byte_index] |= 1 << bit_index;
    }

    /// Number of pieces held
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Whether every piece is held
    pub fn is_complete(&self) -> bool {
        self.count() == self.piece_count
    }

    pub fn piece_count(&self) -> usize {
        self.piece_count
    }

    /// Raw bytes, as sent in a `bitfield` message
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// First piece (ascending) that `self` holds and `local` lacks
    pub fn first_wanted_by(&self, local: &Bitfield) -> Option<usize> {
        (0..self.piece_count).find(|&i| self.has(i) && !local.has(i))
    }

    fn clear_spare_bits(&mut self) {
        let spare = self.bits.len() * 8 - self.piece_count;
        if spare > 0 {
            if let Some(last) = self.bits.last_mut() {
                *last &= 0xFFu8 << spare;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_empty() {
        let bf = Bitfield::new(10);
        assert_eq!(bf.as_bytes().len(), 2);
        assert_eq!(bf.count(), 0);
        assert!(!bf.is_complete());
    }

    #[test]
    fn test_set_matches_subset() {
        for piece_count in [1usize, 7, 8, 9, 23, 64] {
            let subset: Vec<usize> = (0..piece_count).filter(|i| i % 3 == 0 || i % 5 == 1).collect();
            let mut bf = Bitfield::new(piece_count);
            for &i in &subset {
                bf.set(i);
            }
            for i in 0..piece_count {
                assert_eq!(bf.has(i), subset.contains(&i), "piece {} of {}", i, piece_count);
            }
            assert_eq!(bf.count(), subset.len());
        }
    }

    #[test]
    fn test_msb_first_layout() {
        let mut bf = Bitfield::new(3);
        bf.set(0);
        bf.set(2);
        assert_eq!(bf.as_bytes(), &[0b1010_0000]);
    }

    #[test]
    fn test_full_clears_spare_bits() {
        let bf = Bitfield::full(10);
        assert_eq!(bf.as_bytes(), &[0xFF, 0b1100_0000]);
        assert!(bf.is_complete());
        assert!(!bf.has(10));
    }

    #[test]
    fn test_from_bytes_normalizes_length() {
        let bf = Bitfield::from_bytes(&[0xFF, 0xFF, 0xFF], 9);
        assert_eq!(bf.as_bytes(), &[0xFF, 0b1000_0000]);

        let short = Bitfield::from_bytes(&[], 9);
        assert_eq!(short.as_bytes(), &[0, 0]);
    }

    #[test]
    fn test_out_of_range_ignored() {
        let mut bf = Bitfield::new(4);
        bf.set(4);
        bf.set(100);
        assert_eq!(bf.count(), 0);
        assert!(!bf.has(100));
    }

    #[test]
    fn test_first_wanted_by() {
        let remote = Bitfield::full(4);
        let mut local = Bitfield::new(4);
        local.set(0);
        local.set(1);
        assert_eq!(remote.first_wanted_by(&local), Some(2));

        local.set(2);
        local.set(3);
        assert_eq!(remote.first_wanted_by(&local), None);
    }
}
