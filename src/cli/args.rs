//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{
    CreateOptions, DownloadConfig, SeedConfig, DEFAULT_CREATED_BY, DEFAULT_LISTEN_PORT,
    DEFAULT_MAX_CONNECTIONS, DEFAULT_PIECE_LENGTH, DEFAULT_TRACKER_URL,
};

/// CLI arguments for mini-torrent
#[derive(Debug, Parser)]
#[command(name = "mini-torrent")]
#[command(about = "Create, seed and download torrents between known peers", long_about = None)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a descriptor for a file or directory
    Create {
        /// File or directory to describe
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// Output descriptor path (defaults to <PATH>.torrent)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Announce URL written into the descriptor
        #[arg(long, default_value = DEFAULT_TRACKER_URL)]
        tracker: String,

        /// Piece length in bytes
        #[arg(long, default_value_t = DEFAULT_PIECE_LENGTH)]
        piece_length: u64,
    },

    /// Serve a complete file to incoming peers
    Seed {
        #[arg(value_name = "TORRENT_FILE")]
        torrent: PathBuf,

        /// The complete content
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Listening port for incoming connections
        #[arg(short, long, default_value_t = DEFAULT_LISTEN_PORT)]
        port: u16,
    },

    /// Download content from known peers
    Download {
        #[arg(value_name = "TORRENT_FILE")]
        torrent: PathBuf,

        /// Destination file
        #[arg(value_name = "DEST")]
        destination: PathBuf,

        /// Peer address (repeatable)
        #[arg(long = "peer", value_name = "ADDR", required = true)]
        peers: Vec<SocketAddr>,

        /// Maximum number of peer connections
        #[arg(short, long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
        max_connections: usize,

        /// Check each completed piece against its digest
        #[arg(long)]
        verify: bool,
    },
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }
}

impl Command {
    /// Descriptor creation options, for `create`
    pub fn create_options(&self) -> Option<CreateOptions> {
        match self {
            Command::Create { tracker, piece_length, .. } => Some(CreateOptions {
                tracker_url: tracker.clone(),
                piece_length: *piece_length,
                created_by: DEFAULT_CREATED_BY.to_string(),
            }),
            _ => None,
        }
    }

    /// Seed configuration, for `seed`
    pub fn seed_config(&self) -> Option<SeedConfig> {
        match self {
            Command::Seed { torrent, file, port } => Some(SeedConfig::new(torrent, file).with_port(*port)),
            _ => None,
        }
    }

    /// Download configuration, for `download`
    pub fn download_config(&self) -> Option<DownloadConfig> {
        match self {
            Command::Download { torrent, destination, peers, max_connections, verify } => {
                let mut config = DownloadConfig::new(torrent, destination, peers.clone());
                config.max_connections = *max_connections;
                config.verify_pieces = *verify;
                Some(config)
            }
            _ => None,
        }
    }
}
