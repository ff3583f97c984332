//! Torrent information structures
//!
//! Typed view over a decoded descriptor: piece layout, file list and the
//! info hash that identifies the transfer.

use anyhow::Result;
use serde_bencode::value::Value;
use tracing::{debug, warn};

use crate::error::TorrentError;
use crate::protocol::InfoHash;
use super::descriptor::{as_bytes, as_dict, as_int, as_list, dict_get, Descriptor};

/// Represents a file in a multi-file torrent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFile {
    /// File path components (e.g., ["folder", "subfolder", "file.txt"])
    pub path: Vec<String>,
    /// File size in bytes
    pub length: u64,
}

/// High-level torrent information
#[derive(Debug, Clone)]
pub struct TorrentInfo {
    /// Tracker announce URL
    pub announce: String,
    /// SHA1 hash of info dictionary
    pub info_hash: InfoHash,
    /// Size of each piece in bytes
    pub piece_length: u64,
    /// List of piece hashes (each is a 20-byte SHA1 hash)
    pub pieces: Vec<[u8; 20]>,
    /// Torrent name
    pub name: String,
    /// Single file size (None for multi-file torrents)
    pub length: Option<u64>,
    /// Files in multi-file torrents (None for single-file torrents)
    pub files: Option<Vec<TorrentFile>>,
    /// Creation time, seconds since the epoch
    pub creation_date: Option<i64>,
    /// Creating client
    pub created_by: Option<String>,
}

impl TorrentInfo {
    /// Extract torrent information from a decoded descriptor
    pub fn from_descriptor(descriptor: &Descriptor) -> Result<Self> {
        let root = descriptor.dict();
        let info_hash = descriptor.info_hash()?;
        let info = as_dict(descriptor.info()?)
            .ok_or_else(|| TorrentError::parse_error("Missing info dictionary"))?;

        let announce = dict_get(root, "announce")
            .and_then(as_bytes)
            .map(|b| String::from_utf8_lossy(b).to_string())
            .ok_or_else(|| TorrentError::parse_error("Missing announce field"))?;

        let name = dict_get(info, "name")
            .and_then(as_bytes)
            .map(|b| String::from_utf8_lossy(b).to_string())
            .ok_or_else(|| TorrentError::parse_error("Missing name field"))?;

        let piece_length = non_negative(dict_get(info, "piece length"), "piece length")?
            .ok_or_else(|| TorrentError::parse_error("Missing piece length"))?;
        if piece_length == 0 {
            return Err(TorrentError::validation_error_with_field("Piece length must be positive", "piece length").into());
        }

        let pieces_bytes = dict_get(info, "pieces")
            .and_then(as_bytes)
            .ok_or_else(|| TorrentError::parse_error("Missing pieces field"))?;
        let pieces = Self::parse_piece_hashes(pieces_bytes)?;

        let (length, files) = if let Some(len) = non_negative(dict_get(info, "length"), "length")? {
            (Some(len), None)
        } else if let Some(file_list) = dict_get(info, "files").and_then(as_list) {
            (None, Some(Self::parse_files(file_list)?))
        } else {
            return Err(TorrentError::parse_error("Neither length nor files found in info dict").into());
        };

        let total_size = match (&length, &files) {
            (Some(len), _) => *len,
            (None, Some(files)) => files.iter().map(|f| f.length).sum(),
            (None, None) => 0,
        };
        let expected = total_size.div_ceil(piece_length) as usize;
        if pieces.len() != expected {
            return Err(TorrentError::validation_error_with_field(
                format!("{} piece hashes listed, {} bytes need {}", pieces.len(), total_size, expected),
                "pieces",
            ).into());
        }

        let creation_date = dict_get(root, "creation date").and_then(as_int);
        let created_by = dict_get(root, "created by")
            .and_then(as_bytes)
            .map(|b| String::from_utf8_lossy(b).to_string());

        debug!("Parsed descriptor '{}' with {} pieces", name, pieces.len());
        Ok(Self {
            announce,
            info_hash,
            piece_length,
            pieces,
            name,
            length,
            files,
            creation_date,
            created_by,
        })
    }

    fn parse_files(file_list: &[Value]) -> Result<Vec<TorrentFile>> {
        let mut torrent_files = Vec::with_capacity(file_list.len());
        for entry in file_list {
            let file_dict = as_dict(entry)
                .ok_or_else(|| TorrentError::parse_error("File entry must be a dictionary"))?;
            let length = non_negative(dict_get(file_dict, "length"), "files.length")?
                .ok_or_else(|| TorrentError::parse_error("Missing file length"))?;
            let path_list = dict_get(file_dict, "path")
                .and_then(as_list)
                .ok_or_else(|| TorrentError::parse_error("Missing file path"))?;

            let path: Vec<String> = path_list
                .iter()
                .filter_map(as_bytes)
                .map(|b| String::from_utf8_lossy(b).to_string())
                .collect();
            if path.is_empty() {
                return Err(TorrentError::parse_error("Empty file path").into());
            }

            torrent_files.push(TorrentFile { path, length });
        }
        Ok(torrent_files)
    }

    /// Calculate total size of all files in torrent
    pub fn total_size(&self) -> u64 {
        if let Some(length) = self.length {
            length
        } else if let Some(files) = &self.files {
            files.iter().map(|f| f.length).sum()
        } else {
            0
        }
    }

    /// Get number of pieces in torrent
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Check if this is a multi-file torrent
    pub fn is_multi_file(&self) -> bool {
        self.files.is_some()
    }

    /// Get info hash as a hex string
    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    /// Parse piece hashes from concatenated bytes in the descriptor
    pub fn parse_piece_hashes(pieces_bytes: &[u8]) -> Result<Vec<[u8; 20]>> {
        if pieces_bytes.len() % 20 != 0 {
            return Err(TorrentError::parse_error_with_source(
                "Pieces field length must be a multiple of 20",
                format!("got {}", pieces_bytes.len())
            ).into());
        }

        let mut pieces = Vec::with_capacity(pieces_bytes.len() / 20);
        for chunk in pieces_bytes.chunks_exact(20) {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            pieces.push(hash);
        }

        Ok(pieces)
    }

    /// Get piece hash for a specific piece index
    pub fn piece_hash(&self, index: usize) -> Option<[u8; 20]> {
        self.pieces.get(index).copied()
    }

    /// Actual length of a piece; the final piece may be short
    pub fn piece_size(&self, index: usize) -> Option<u64> {
        self.piece_range(index).map(|(start, end)| end - start)
    }

    /// Get byte range for a specific piece
    pub fn piece_range(&self, index: usize) -> Option<(u64, u64)> {
        if index >= self.pieces.len() {
            return None;
        }

        let start = (index as u64) * self.piece_length;
        let total = self.total_size();
        let end = std::cmp::min(start + self.piece_length, total);
        if start > end {
            warn!("Piece {} starts past the end of the content", index);
            return Some((end, end));
        }

        Some((start, end))
    }
}

fn non_negative(value: Option<&Value>, field: &str) -> Result<Option<u64>> {
    match value {
        None => Ok(None),
        Some(v) => {
            let n = as_int(v)
                .ok_or_else(|| TorrentError::parse_error_with_source("Expected integer", field.to_string()))?;
            u64::try_from(n)
                .map(Some)
                .map_err(|_| TorrentError::validation_error_with_field("Negative value", field.to_string()).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::descriptor::dict_value;

    fn single_file(length: i64, piece_length: i64, piece_count: usize) -> Descriptor {
        Descriptor::from_value(dict_value([
            ("announce", Value::Bytes(b"http://tracker.example.com/announce".to_vec())),
            ("created by", Value::Bytes(b"tests".to_vec())),
            ("info", dict_value([
                ("name", Value::Bytes(b"data.bin".to_vec())),
                ("piece length", Value::Int(piece_length)),
                ("pieces", Value::Bytes(vec![0xAB; piece_count * 20])),
                ("length", Value::Int(length)),
            ])),
        ]))
        .unwrap()
    }

    #[test]
    fn test_single_file_layout() {
        let info = TorrentInfo::from_descriptor(&single_file(600000, 262144, 3)).unwrap();

        assert_eq!(info.name, "data.bin");
        assert_eq!(info.total_size(), 600000);
        assert_eq!(info.piece_count(), 3);
        assert!(!info.is_multi_file());
        assert_eq!(info.piece_size(0), Some(262144));
        assert_eq!(info.piece_size(1), Some(262144));
        assert_eq!(info.piece_size(2), Some(75712));
        assert_eq!(info.piece_size(3), None);
        assert_eq!(info.created_by.as_deref(), Some("tests"));
    }

    #[test]
    fn test_multi_file_total() {
        let descriptor = Descriptor::from_value(dict_value([
            ("announce", Value::Bytes(b"http://tracker.example.com/announce".to_vec())),
            ("info", dict_value([
                ("name", Value::Bytes(b"dir".to_vec())),
                ("piece length", Value::Int(1024)),
                ("pieces", Value::Bytes(vec![0; 20])),
                ("files", Value::List(vec![
                    dict_value([
                        ("length", Value::Int(500)),
                        ("path", Value::List(vec![Value::Bytes(b"a.txt".to_vec())])),
                    ]),
                    dict_value([
                        ("length", Value::Int(524)),
                        ("path", Value::List(vec![
                            Value::Bytes(b"sub".to_vec()),
                            Value::Bytes(b"b.txt".to_vec()),
                        ])),
                    ]),
                ])),
            ])),
        ]))
        .unwrap();

        let info = TorrentInfo::from_descriptor(&descriptor).unwrap();
        assert!(info.is_multi_file());
        assert_eq!(info.total_size(), 1024);
        let files = info.files.unwrap();
        assert_eq!(files[1].path, vec!["sub".to_string(), "b.txt".to_string()]);
    }

    #[test]
    fn test_info_hash_matches_descriptor() {
        let descriptor = single_file(2048, 1024, 2);
        let info = TorrentInfo::from_descriptor(&descriptor).unwrap();
        assert_eq!(info.info_hash, descriptor.info_hash().unwrap());
        assert_eq!(info.info_hash_hex().len(), 40);
    }

    #[test]
    fn test_parse_piece_hashes_invalid() {
        assert!(TorrentInfo::parse_piece_hashes(&[1u8; 21]).is_err());
        assert_eq!(TorrentInfo::parse_piece_hashes(&[1u8; 40]).unwrap().len(), 2);
    }

    #[test]
    fn test_negative_length_rejected() {
        assert!(TorrentInfo::from_descriptor(&single_file(-5, 1024, 1)).is_err());
    }

    #[test]
    fn test_piece_count_must_match_length() {
        let err = TorrentInfo::from_descriptor(&single_file(600000, 262144, 4)).unwrap_err();
        assert_eq!(TorrentError::kind_of(&err), Some(crate::error::ErrorKind::Invalid));
        assert!(TorrentInfo::from_descriptor(&single_file(600000, 262144, 2)).is_err());
        assert_eq!(TorrentInfo::from_descriptor(&single_file(0, 1024, 0)).unwrap().piece_count(), 0);
    }

    #[test]
    fn test_zero_piece_length_rejected() {
        assert!(TorrentInfo::from_descriptor(&single_file(100, 0, 1)).is_err());
    }
}
