//! Resume data module
//!
//! Persists which pieces are already on disk so an interrupted download can
//! pick up where it left off.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::bitfield::Bitfield;
use crate::error::TorrentError;
use crate::protocol::InfoHash;

/// Persisted download progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Info hash as hex string
    pub info_hash: String,
    /// Number of pieces the bitfield covers
    pub piece_count: usize,
    /// Downloaded pieces, MSB-first
    pub bitfield: Vec<u8>,
}

impl ProgressRecord {
    pub fn new(info_hash: &InfoHash, bitfield: &Bitfield) -> Self {
        Self {
            info_hash: hex::encode(info_hash),
            piece_count: bitfield.piece_count(),
            bitfield: bitfield.as_bytes().to_vec(),
        }
    }

    /// Check the record belongs to this content
    pub fn matches(&self, info_hash: &InfoHash, piece_count: usize) -> bool {
        self.info_hash == hex::encode(info_hash)
            && self.piece_count == piece_count
            && self.bitfield.len() == piece_count.div_ceil(8)
    }

    pub fn to_bitfield(&self) -> Bitfield {
        Bitfield::from_bytes(&self.bitfield, self.piece_count)
    }

    /// Serialize to bytes
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self).map_err(TorrentError::from)?)
    }

    /// Deserialize from bytes
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data).map_err(TorrentError::from)?)
    }
}

/// Progress record file for one destination
#[derive(Debug, Clone)]
pub struct ProgressStore {
    path: PathBuf,
}

impl ProgressStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save a record, creating parent directories as needed
    pub async fn save(&self, record: &ProgressRecord) -> Result<()> {
        let data = record.serialize()?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        fs::write(&self.path, data).await
            .map_err(|e| TorrentError::storage_error_full("Failed to write progress record", self.path.display().to_string(), e.to_string()))?;
        debug!("Saved progress to {}", self.path.display());
        Ok(())
    }

    /// Load the raw record; `Ok(None)` when no record exists
    pub async fn load(&self) -> Result<Option<ProgressRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = fs::read(&self.path).await
            .map_err(|e| TorrentError::state_error_with_source("Failed to read progress record", e.to_string()))?;
        Ok(Some(ProgressRecord::deserialize(&data)?))
    }

    /// Restore the bitfield for this content, or a fresh one
    ///
    /// An unreadable or mismatched record is reported and ignored.
    pub async fn restore(&self, info_hash: &InfoHash, piece_count: usize) -> Bitfield {
        match self.load().await {
            Ok(Some(record)) if record.matches(info_hash, piece_count) => {
                let bitfield = record.to_bitfield();
                info!("Resuming with {}/{} pieces from {}", bitfield.count(), piece_count, self.path.display());
                bitfield
            }
            Ok(Some(record)) => {
                warn!(
                    "Progress record {} does not match this content (info hash {}, {} pieces); starting fresh",
                    self.path.display(), record.info_hash, record.piece_count
                );
                Bitfield::new(piece_count)
            }
            Ok(None) => {
                debug!("No progress record at {}", self.path.display());
                Bitfield::new(piece_count)
            }
            Err(e) => {
                warn!("Ignoring unreadable progress record {}: {}", self.path.display(), e);
                Bitfield::new(piece_count)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits(n: usize, set: &[usize]) -> Bitfield {
        let mut b = Bitfield::new(n);
        for &i in set {
            b.set(i);
        }
        b
    }

    #[test]
    fn test_record_serialize_deserialize() {
        let record = ProgressRecord::new(&[0xAB; 20], &bits(10, &[2, 5]));
        let decoded = ProgressRecord::deserialize(&record.serialize().unwrap()).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.info_hash, "ab".repeat(20));
        let restored = decoded.to_bitfield();
        assert!(restored.has(2) && restored.has(5) && !restored.has(0));
    }

    #[test]
    fn test_record_matches() {
        let record = ProgressRecord::new(&[1; 20], &bits(3, &[0]));
        assert!(record.matches(&[1; 20], 3));
        assert!(!record.matches(&[2; 20], 3));
        assert!(!record.matches(&[1; 20], 4));
    }

    #[tokio::test]
    async fn test_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::new(dir.path().join("sub").join("data.bin.progress"));
        store.save(&ProgressRecord::new(&[7; 20], &bits(3, &[0, 2]))).await.unwrap();

        let restored = store.restore(&[7; 20], 3).await;
        assert_eq!(restored.count(), 2);
        assert!(restored.has(0) && !restored.has(1) && restored.has(2));
    }

    #[tokio::test]
    async fn test_restore_mismatch_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::new(dir.path().join("p.progress"));
        store.save(&ProgressRecord::new(&[7; 20], &bits(3, &[0, 1, 2]))).await.unwrap();

        assert_eq!(store.restore(&[8; 20], 3).await.count(), 0);
    }

    #[tokio::test]
    async fn test_restore_corrupt_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.progress");
        std::fs::write(&path, b"not json").unwrap();
        let store = ProgressStore::new(path);

        assert!(store.load().await.is_err());
        assert_eq!(store.restore(&[7; 20], 5).await.count(), 0);
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::new(dir.path().join("none.progress"));
        assert!(store.load().await.unwrap().is_none());
    }
}
