//! Descriptor creation
//!
//! Hashes local content into piece digests and writes a new descriptor.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use serde_bencode::value::Value;
use sha1::{Digest, Sha1};
use tracing::{debug, info};

use crate::config::CreateOptions;
use crate::error::TorrentError;
use crate::protocol::InfoHash;
use super::descriptor::{dict_value, Descriptor};

/// Summary of a freshly written descriptor
#[derive(Debug, Clone)]
pub struct CreatedTorrent {
    pub info_hash: InfoHash,
    pub piece_length: u64,
    pub piece_count: usize,
    pub total_size: u64,
    /// Number of files described; 1 for single-file descriptors
    pub file_count: usize,
    pub torrent_path: PathBuf,
}

impl CreatedTorrent {
    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }
}

/// Accumulates a byte stream into fixed-length piece digests
struct PieceHasher {
    piece_length: usize,
    hasher: Sha1,
    filled: usize,
    digests: Vec<u8>,
}

impl PieceHasher {
    fn new(piece_length: usize) -> Self {
        Self {
            piece_length,
            hasher: Sha1::new(),
            filled: 0,
            digests: Vec::new(),
        }
    }

    fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let take = std::cmp::min(self.piece_length - self.filled, data.len());
            self.hasher.update(&data[..take]);
            self.filled += take;
            data = &data[take..];

            if self.filled == self.piece_length {
                let digest = std::mem::replace(&mut self.hasher, Sha1::new()).finalize();
                self.digests.extend_from_slice(&digest);
                self.filled = 0;
            }
        }
    }

    /// Flush the trailing short piece, if any
    fn finish(mut self) -> Vec<u8> {
        if self.filled > 0 {
            self.digests.extend_from_slice(&self.hasher.finalize());
        }
        self.digests
    }
}

fn hash_file_into(path: &Path, hasher: &mut PieceHasher) -> Result<u64> {
    let mut file = File::open(path)
        .map_err(|e| TorrentError::storage_error_full("Failed to open file for hashing", path.display().to_string(), e.to_string()))?;
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok(total)
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn wrap_descriptor(info: Value, options: &CreateOptions) -> Result<Descriptor> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    Descriptor::from_value(dict_value([
        ("info", info),
        ("announce", Value::Bytes(options.tracker_url.as_bytes().to_vec())),
        ("creation date", Value::Int(now)),
        ("created by", Value::Bytes(options.created_by.as_bytes().to_vec())),
    ]))
}

/// Create a descriptor for a single file
pub fn create_single_file_descriptor(file: &Path, output: &Path, options: &CreateOptions) -> Result<CreatedTorrent> {
    options.validate()?;
    if !file.is_file() {
        return Err(TorrentError::resource_missing("File not found", file.display().to_string()).into());
    }

    info!("Creating descriptor for {}", file.display());
    let mut hasher = PieceHasher::new(options.piece_length as usize);
    let total_size = hash_file_into(file, &mut hasher)?;
    let pieces = hasher.finish();
    let piece_count = pieces.len() / 20;

    let info = dict_value([
        ("name", Value::Bytes(base_name(file).into_bytes())),
        ("piece length", Value::Int(options.piece_length as i64)),
        ("pieces", Value::Bytes(pieces)),
        ("length", Value::Int(total_size as i64)),
    ]);

    let descriptor = wrap_descriptor(info, options)?;
    let info_hash = descriptor.info_hash()?;
    descriptor.save(output)?;

    info!("Created descriptor {} ({} pieces, info hash {})", output.display(), piece_count, hex::encode(info_hash));
    Ok(CreatedTorrent {
        info_hash,
        piece_length: options.piece_length,
        piece_count,
        total_size,
        file_count: 1,
        torrent_path: output.to_path_buf(),
    })
}

/// Collect regular files below `dir`, sorted, as (absolute path, path segments)
fn walk_sorted(root: &Path, dir: &Path, out: &mut Vec<(PathBuf, Vec<String>)>) -> Result<()> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    entries.sort();

    for path in entries {
        if path.is_dir() {
            walk_sorted(root, &path, out)?;
        } else if path.is_file() {
            let relative = path.strip_prefix(root)
                .map_err(|e| TorrentError::storage_error_full("Path outside of content root", path.display().to_string(), e.to_string()))?;
            let segments = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect();
            out.push((path.clone(), segments));
        }
    }
    Ok(())
}

/// Create a descriptor for every file under a directory
///
/// Pieces are hashed over the concatenation of all files in walk order, so a
/// piece may span a file boundary.
pub fn create_multi_file_descriptor(dir: &Path, output: &Path, options: &CreateOptions) -> Result<CreatedTorrent> {
    options.validate()?;
    if !dir.is_dir() {
        return Err(TorrentError::resource_missing("Directory not found", dir.display().to_string()).into());
    }

    info!("Creating multi-file descriptor for {}", dir.display());
    let mut files = Vec::new();
    walk_sorted(dir, dir, &mut files)?;
    debug!("Found {} files", files.len());

    let mut hasher = PieceHasher::new(options.piece_length as usize);
    let mut entries = Vec::with_capacity(files.len());
    let mut total_size = 0u64;
    for (path, segments) in &files {
        let length = hash_file_into(path, &mut hasher)?;
        total_size += length;
        entries.push(dict_value([
            ("length", Value::Int(length as i64)),
            ("path", Value::List(segments.iter().map(|s| Value::Bytes(s.as_bytes().to_vec())).collect())),
        ]));
    }
    let pieces = hasher.finish();
    let piece_count = pieces.len() / 20;

    let info = dict_value([
        ("name", Value::Bytes(base_name(dir).into_bytes())),
        ("piece length", Value::Int(options.piece_length as i64)),
        ("pieces", Value::Bytes(pieces)),
        ("files", Value::List(entries)),
    ]);

    let descriptor = wrap_descriptor(info, options)?;
    let info_hash = descriptor.info_hash()?;
    descriptor.save(output)?;

    info!("Created descriptor {} ({} files, {} pieces)", output.display(), files.len(), piece_count);
    Ok(CreatedTorrent {
        info_hash,
        piece_length: options.piece_length,
        piece_count,
        total_size,
        file_count: files.len(),
        torrent_path: output.to_path_buf(),
    })
}
