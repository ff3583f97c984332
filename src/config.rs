//! Session configuration
//!
//! Settings for download and seed sessions and for descriptor creation.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

use crate::error::TorrentError;

/// Default TCP connect timeout for outbound peers
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default cap on simultaneous outbound connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 5;
/// Default number of pieces requested at once per connection
pub const DEFAULT_MAX_IN_FLIGHT: usize = 5;
/// Block size used for requests
pub const DEFAULT_BLOCK_SIZE: u32 = 16384;
/// Default seeding port
pub const DEFAULT_LISTEN_PORT: u16 = 6881;
/// Default announce URL written into new descriptors
pub const DEFAULT_TRACKER_URL: &str = "http://example.tracker.com:6969/announce";
/// Default piece length for new descriptors (256 KiB)
pub const DEFAULT_PIECE_LENGTH: u64 = 262144;
/// Default `created by` string for new descriptors
pub const DEFAULT_CREATED_BY: &str = "Mini Torrent Client";

/// Configuration for a download session
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Path to the descriptor file
    pub torrent_path: PathBuf,
    /// Destination file for the content
    pub destination: PathBuf,
    /// Peers to connect to
    pub peers: Vec<SocketAddr>,
    /// Outbound connect timeout
    pub connect_timeout: Duration,
    /// Maximum number of peer connections
    pub max_connections: usize,
    /// Maximum pieces in flight per connection
    pub max_in_flight: usize,
    /// Request block size
    pub block_size: u32,
    /// Check completed pieces against their SHA-1 digest
    pub verify_pieces: bool,
}

impl DownloadConfig {
    pub fn new(torrent_path: impl Into<PathBuf>, destination: impl Into<PathBuf>, peers: Vec<SocketAddr>) -> Self {
        Self {
            torrent_path: torrent_path.into(),
            destination: destination.into(),
            peers,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            block_size: DEFAULT_BLOCK_SIZE,
            verify_pieces: false,
        }
    }

    /// Path of the persisted progress record, `<destination>.progress`
    pub fn progress_path(&self) -> PathBuf {
        let mut name = self.destination.clone().into_os_string();
        name.push(".progress");
        PathBuf::from(name)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(TorrentError::config_error_with_field("max_connections must be at least 1", "max_connections").into());
        }

        if self.max_in_flight == 0 {
            return Err(TorrentError::config_error_with_field("max_in_flight must be at least 1", "max_in_flight").into());
        }

        if self.block_size == 0 {
            return Err(TorrentError::config_error_with_field("block_size must be positive", "block_size").into());
        }

        if self.connect_timeout.is_zero() {
            return Err(TorrentError::config_error_with_field("connect_timeout must be positive", "connect_timeout").into());
        }

        if self.destination.as_os_str().is_empty() {
            return Err(TorrentError::config_error_with_field("destination cannot be empty", "destination").into());
        }

        Ok(())
    }
}

/// Configuration for a seed session
#[derive(Debug, Clone)]
pub struct SeedConfig {
    /// Path to the descriptor file
    pub torrent_path: PathBuf,
    /// Complete content to serve
    pub source: PathBuf,
    /// Listening port; 0 picks an ephemeral port
    pub port: u16,
}

impl SeedConfig {
    pub fn new(torrent_path: impl Into<PathBuf>, source: impl Into<PathBuf>) -> Self {
        Self {
            torrent_path: torrent_path.into(),
            source: source.into(),
            port: DEFAULT_LISTEN_PORT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Get the listen address for incoming connections
    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.as_os_str().is_empty() {
            return Err(TorrentError::config_error_with_field("source cannot be empty", "source").into());
        }
        Ok(())
    }
}

/// Options for descriptor creation
#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub tracker_url: String,
    pub piece_length: u64,
    pub created_by: String,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            tracker_url: DEFAULT_TRACKER_URL.to_string(),
            piece_length: DEFAULT_PIECE_LENGTH,
            created_by: DEFAULT_CREATED_BY.to_string(),
        }
    }
}

impl CreateOptions {
    pub fn validate(&self) -> Result<()> {
        if self.piece_length == 0 {
            return Err(TorrentError::config_error_with_field("piece_length must be positive", "piece_length").into());
        }
        if self.tracker_url.is_empty() {
            return Err(TorrentError::config_error_with_field("tracker_url cannot be empty", "tracker_url").into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_defaults() {
        let config = DownloadConfig::new("a.torrent", "out/data.bin", vec![]);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.max_in_flight, 5);
        assert_eq!(config.block_size, 16384);
        assert!(!config.verify_pieces);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_progress_path() {
        let config = DownloadConfig::new("a.torrent", "out/data.bin", vec![]);
        assert_eq!(config.progress_path(), PathBuf::from("out/data.bin.progress"));
    }

    #[test]
    fn test_invalid_download_config() {
        let mut config = DownloadConfig::new("a.torrent", "data.bin", vec![]);
        config.max_in_flight = 0;
        assert!(config.validate().is_err());

        let mut config = DownloadConfig::new("a.torrent", "data.bin", vec![]);
        config.block_size = 0;
        assert!(config.validate().is_err());

        let config = DownloadConfig::new("a.torrent", "", vec![]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_seed_config() {
        let config = SeedConfig::new("a.torrent", "data.bin");
        assert_eq!(config.port, 6881);
        assert_eq!(config.with_port(0).listen_addr(), "0.0.0.0:0");
    }

    #[test]
    fn test_create_options_default() {
        let options = CreateOptions::default();
        assert_eq!(options.tracker_url, "http://example.tracker.com:6969/announce");
        assert_eq!(options.piece_length, 262144);
        assert!(options.validate().is_ok());
        assert!(CreateOptions { piece_length: 0, ..options }.validate().is_err());
    }
}
