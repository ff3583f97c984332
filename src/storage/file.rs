//! File storage module
//!
//! Reads and writes piece data against a single destination file. Multi-file
//! content is stored as one concatenated file.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use anyhow::Result;
use sha1::{Digest, Sha1};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, error, info, trace, warn};

use crate::error::TorrentError;

/// Piece-addressed view of the destination file
#[derive(Debug, Clone)]
pub struct PieceStore {
    path: PathBuf,
    piece_length: u64,
    total_length: u64,
}

impl PieceStore {
    pub fn new(path: PathBuf, piece_length: u64, total_length: u64) -> Self {
        Self { path, piece_length, total_length }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn piece_length(&self) -> u64 {
        self.piece_length
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Actual length of piece `index`; zero past the end
    pub fn piece_size(&self, index: u32) -> u64 {
        let start = index as u64 * self.piece_length;
        if start >= self.total_length {
            return 0;
        }
        std::cmp::min(self.piece_length, self.total_length - start)
    }

    /// Create the destination if missing and grow it to the content length
    ///
    /// A longer existing file is left as it is.
    pub async fn ensure_file(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!("Creating directory: {}", parent.display());
                fs::create_dir_all(parent).await
                    .map_err(|e| {
                        error!("Failed to create directory '{}': {}", parent.display(), e);
                        TorrentError::storage_error_full("Failed to create directory", parent.display().to_string(), e.to_string())
                    })?;
            }
        }

        let existed = self.path.exists();
        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                error!("Failed to create file '{}': {}", self.path.display(), e);
                TorrentError::storage_error_full("Failed to create file", self.path.display().to_string(), e.to_string())
            })?;

        let current = file.metadata().await?.len();
        if current > self.total_length {
            warn!("'{}' is {} bytes, longer than the {} bytes expected; leaving it", self.path.display(), current, self.total_length);
        } else if current < self.total_length {
            if existed {
                warn!("Growing '{}' from {} to {} bytes", self.path.display(), current, self.total_length);
            }
            file.set_len(self.total_length).await
                .map_err(|e| {
                    error!("Failed to set file length for '{}': {}", self.path.display(), e);
                    TorrentError::storage_error_full("Failed to set file length", self.path.display().to_string(), e.to_string())
                })?;
        }

        info!("Destination ready: {} ({} bytes)", self.path.display(), self.total_length);
        Ok(())
    }

    /// Write `data` at an absolute byte offset
    pub async fn write_block(&self, offset: u64, data: &[u8]) -> Result<()> {
        trace!("Writing {} bytes at offset {}", data.len(), offset);
        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                error!("Failed to open file '{}': {}", self.path.display(), e);
                TorrentError::storage_error_full("Failed to open file for writing", self.path.display().to_string(), e.to_string())
            })?;

        file.seek(SeekFrom::Start(offset)).await
            .map_err(|e| TorrentError::storage_error_full("Failed to seek in file", self.path.display().to_string(), e.to_string()))?;
        file.write_all(data).await
            .map_err(|e| {
                error!("Failed to write to file '{}': {}", self.path.display(), e);
                TorrentError::storage_error_full("Failed to write to file", self.path.display().to_string(), e.to_string())
            })?;
        file.flush().await?;
        Ok(())
    }

    /// Read a whole piece; short if the file ends early
    pub async fn read_piece(&self, index: u32) -> Result<Vec<u8>> {
        let offset = index as u64 * self.piece_length;
        self.read_at(offset, self.piece_length as usize).await
    }

    /// Read a block, clamped to the piece's actual length
    pub async fn read_block(&self, index: u32, begin: u32, length: u32) -> Result<Vec<u8>> {
        let piece_size = self.piece_size(index);
        let begin = begin as u64;
        if begin >= piece_size {
            return Ok(Vec::new());
        }
        let length = std::cmp::min(length as u64, piece_size - begin);
        let offset = index as u64 * self.piece_length + begin;
        self.read_at(offset, length as usize).await
    }

    async fn read_at(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        let mut file = fs::File::open(&self.path).await
            .map_err(|e| {
                error!("Failed to open file '{}': {}", self.path.display(), e);
                TorrentError::storage_error_full("Failed to open file for reading", self.path.display().to_string(), e.to_string())
            })?;
        file.seek(SeekFrom::Start(offset)).await
            .map_err(|e| TorrentError::storage_error_full("Failed to seek in file", self.path.display().to_string(), e.to_string()))?;

        let mut buffer = Vec::with_capacity(length);
        (&mut file).take(length as u64).read_to_end(&mut buffer).await
            .map_err(|e| TorrentError::storage_error_full("Failed to read from file", self.path.display().to_string(), e.to_string()))?;
        trace!("Read {} of {} bytes at offset {}", buffer.len(), length, offset);
        Ok(buffer)
    }

    /// Compare the stored piece against its expected digest
    pub async fn verify_piece(&self, index: u32, expected: &[u8; 20]) -> Result<bool> {
        let data = self.read_piece(index).await?;
        let valid = Sha1::digest(&data).as_slice() == expected;
        if valid {
            debug!("Piece {} verification: PASSED", index);
        } else {
            warn!("Piece {} verification: FAILED (hash mismatch)", index);
        }
        Ok(valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_file_presizes() {
        let dir = tempfile::tempdir().unwrap();
        let store = PieceStore::new(dir.path().join("nested").join("out.bin"), 4, 10);
        store.ensure_file().await.unwrap();

        let data = std::fs::read(store.path()).unwrap();
        assert_eq!(data, vec![0u8; 10]);
    }

    #[tokio::test]
    async fn test_ensure_file_keeps_longer_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("existing.bin");
        std::fs::write(&path, vec![7u8; 5000]).unwrap();

        let store = PieceStore::new(path.clone(), 1024, 3000);
        store.ensure_file().await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![7u8; 5000]);

        // a shorter file is grown, keeping its bytes
        std::fs::write(&path, vec![7u8; 100]).unwrap();
        store.ensure_file().await.unwrap();
        let data = std::fs::read(&path).unwrap();
        assert_eq!(data.len(), 3000);
        assert!(data[..100].iter().all(|&b| b == 7));
        assert!(data[100..].iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_write_and_read_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let store = PieceStore::new(dir.path().join("out.bin"), 4, 10);
        store.ensure_file().await.unwrap();

        store.write_block(4, &[1, 2, 3, 4]).await.unwrap();
        store.write_block(8, &[9, 9]).await.unwrap();

        assert_eq!(store.read_piece(1).await.unwrap(), vec![1, 2, 3, 4]);
        // last piece is short at EOF
        assert_eq!(store.read_piece(2).await.unwrap(), vec![9, 9]);
        assert_eq!(store.read_block(1, 1, 2).await.unwrap(), vec![2, 3]);
        // clamped to the piece length
        assert_eq!(store.read_block(2, 0, 16384).await.unwrap(), vec![9, 9]);
        assert!(store.read_block(2, 5, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_verify_piece() {
        let dir = tempfile::tempdir().unwrap();
        let store = PieceStore::new(dir.path().join("out.bin"), 4, 8);
        store.ensure_file().await.unwrap();
        store.write_block(0, b"abcd").await.unwrap();

        let good: [u8; 20] = Sha1::digest(b"abcd").into();
        assert!(store.verify_piece(0, &good).await.unwrap());
        assert!(!store.verify_piece(1, &good).await.unwrap());
    }

    #[test]
    fn test_piece_size() {
        let store = PieceStore::new(PathBuf::from("x"), 262144, 600000);
        assert_eq!(store.piece_size(0), 262144);
        assert_eq!(store.piece_size(2), 75712);
        assert_eq!(store.piece_size(3), 0);
    }

    #[tokio::test]
    async fn test_write_without_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = PieceStore::new(dir.path().join("missing.bin"), 4, 8);
        assert!(store.write_block(0, b"ab").await.is_err());
    }
}
