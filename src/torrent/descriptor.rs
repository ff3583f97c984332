//! Descriptor codec boundary
//!
//! Descriptors are bencoded value trees. Decoding and encoding are delegated to
//! `serde_bencode`; this module only knows how to find the `info` dictionary,
//! hash it, and move trees between bytes and disk.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use serde_bencode::value::Value;
use sha1::{Digest, Sha1};
use tracing::{debug, error, info};

use crate::error::TorrentError;
use crate::protocol::InfoHash;

/// A decoded descriptor value tree
#[derive(Debug, Clone)]
pub struct Descriptor {
    root: Value,
}

impl Descriptor {
    /// Wrap a value tree; the root must be a dictionary
    pub fn from_value(root: Value) -> Result<Self> {
        if !matches!(root, Value::Dict(_)) {
            return Err(TorrentError::parse_error("Descriptor root must be a dictionary").into());
        }
        Ok(Self { root })
    }

    /// Decode a descriptor from bencoded bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let root: Value = serde_bencode::from_bytes(data).map_err(TorrentError::from)?;
        Self::from_value(root)
    }

    /// Read and decode a descriptor file
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading descriptor from: {}", path.display());
        if !path.exists() {
            error!("Descriptor not found: {}", path.display());
            return Err(TorrentError::resource_missing("Descriptor file not found", path.display().to_string()).into());
        }

        let data = std::fs::read(path)
            .map_err(|e| {
                error!("Failed to read descriptor '{}': {}", path.display(), e);
                TorrentError::resource_missing(format!("Descriptor file unreadable: {}", e), path.display().to_string())
            })?;
        debug!("Read {} bytes from descriptor", data.len());

        Self::from_bytes(&data)
    }

    /// Encode the tree; dictionary keys come out sorted
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_bencode::to_bytes(&self.root).map_err(TorrentError::from)?)
    }

    /// Encode and write the descriptor to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = self.to_bytes()?;
        std::fs::write(path, &data)
            .map_err(|e| {
                error!("Failed to write descriptor '{}': {}", path.display(), e);
                TorrentError::storage_error_full("Failed to write descriptor", path.display().to_string(), e.to_string())
            })?;
        info!("Wrote descriptor to {} ({} bytes)", path.display(), data.len());
        Ok(())
    }

    /// Top-level dictionary
    pub fn dict(&self) -> &HashMap<Vec<u8>, Value> {
        match &self.root {
            Value::Dict(d) => d,
            // from_value only admits dictionaries
            _ => unreachable!("descriptor root is always a dictionary"),
        }
    }

    /// The `info` dictionary value
    pub fn info(&self) -> Result<&Value> {
        self.dict()
            .get(b"info".as_slice())
            .filter(|v| matches!(v, Value::Dict(_)))
            .ok_or_else(|| TorrentError::parse_error("Missing info dictionary").into())
    }

    /// SHA-1 over the canonical encoding of the `info` dictionary
    pub fn info_hash(&self) -> Result<InfoHash> {
        let encoded = serde_bencode::to_bytes(self.info()?).map_err(TorrentError::from)?;
        Ok(Sha1::digest(&encoded).into())
    }
}

/// Look up `key` in a dictionary value
pub fn dict_get<'a>(dict: &'a HashMap<Vec<u8>, Value>, key: &str) -> Option<&'a Value> {
    dict.get(key.as_bytes())
}

/// Byte-string payload of a value
pub fn as_bytes(value: &Value) -> Option<&[u8]> {
    match value {
        Value::Bytes(b) => Some(b),
        _ => None,
    }
}

/// Integer payload of a value
pub fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        _ => None,
    }
}

/// List payload of a value
pub fn as_list(value: &Value) -> Option<&[Value]> {
    match value {
        Value::List(l) => Some(l),
        _ => None,
    }
}

/// Dictionary payload of a value
pub fn as_dict(value: &Value) -> Option<&HashMap<Vec<u8>, Value>> {
    match value {
        Value::Dict(d) => Some(d),
        _ => None,
    }
}

/// Build a dictionary value from string keys
pub fn dict_value<I>(entries: I) -> Value
where
    I: IntoIterator<Item = (&'static str, Value)>,
{
    Value::Dict(entries.into_iter().map(|(k, v)| (k.as_bytes().to_vec(), v)).collect())
}
