//! Piece assembly module
//!
//! Block layout of a piece and the record of which blocks have arrived.

use std::collections::HashMap;

/// Block boundaries of a piece as `(begin, length)` pairs
///
/// Every block is `block_size` bytes except the last, which covers the
/// remainder of the piece.
pub fn block_layout(piece_size: u64, block_size: u32) -> Vec<(u32, u32)> {
    let mut blocks = Vec::new();
    let mut begin = 0u64;
    while begin < piece_size {
        let length = std::cmp::min(block_size as u64, piece_size - begin);
        blocks.push((begin as u32, length as u32));
        begin += length;
    }
    blocks
}

/// Received-block record for one piece
#[derive(Debug, Clone)]
pub struct PieceProgress {
    piece_size: u64,
    block_size: u32,
    received: Vec<bool>,
}

impl PieceProgress {
    pub fn new(piece_size: u64, block_size: u32) -> Self {
        let block_count = piece_size.div_ceil(block_size as u64) as usize;
        Self {
            piece_size,
            block_size,
            received: vec![false; block_count],
        }
    }

    /// Record the block at `begin`; returns false for offsets outside the layout
    pub fn mark(&mut self, begin: u32, length: usize) -> bool {
        if begin % self.block_size != 0 || begin as u64 >= self.piece_size {
            return false;
        }
        let index = (begin / self.block_size) as usize;
        let expected = std::cmp::min(self.block_size as u64, self.piece_size - begin as u64);
        if length as u64 != expected {
            return false;
        }
        self.received[index] = true;
        true
    }

    /// Check if all blocks are downloaded
    pub fn is_complete(&self) -> bool {
        self.received.iter().all(|&b| b)
    }

    pub fn received_blocks(&self) -> usize {
        self.received.iter().filter(|&&b| b).count()
    }

    pub fn block_count(&self) -> usize {
        self.received.len()
    }
}

/// Block records for every piece currently being assembled
#[derive(Debug, Default)]
pub struct PieceTracker {
    pieces: HashMap<u32, PieceProgress>,
}

impl PieceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a block; returns true once the piece has every block
    pub fn record(&mut self, index: u32, begin: u32, length: usize, piece_size: u64, block_size: u32) -> bool {
        let progress = self.pieces
            .entry(index)
            .or_insert_with(|| PieceProgress::new(piece_size, block_size));
        progress.mark(begin, length) && progress.is_complete()
    }

    /// Drop the record for a piece
    pub fn clear(&mut self, index: u32) {
        self.pieces.remove(&index);
    }

    pub fn get(&self, index: u32) -> Option<&PieceProgress> {
        self.pieces.get(&index)
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }
}
