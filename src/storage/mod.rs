//! Storage module
//!
//! Destination file access, block bookkeeping and resume capability.

pub mod file;
pub mod piece;
pub mod resume;

pub use file::PieceStore;
pub use piece::{block_layout, PieceProgress, PieceTracker};
pub use resume::{ProgressRecord, ProgressStore};
