//! mini-torrent
//!
//! A small peer-wire client: create descriptors, seed a complete file and
//! download from a fixed list of peers with resumable progress.

pub mod bitfield;
pub mod cli;
pub mod config;
pub mod error;
pub mod peer;
pub mod protocol;
pub mod session;
pub mod storage;
pub mod torrent;

pub use error::{ErrorKind, TorrentError};

pub use bitfield::Bitfield;
pub use config::{CreateOptions, DownloadConfig, SeedConfig};
pub use protocol::{Handshake, InfoHash, Message, MessageId, PeerId};
pub use session::{DownloadStatus, Downloader, SeedStatus, Seeder, SessionState};
pub use storage::{PieceStore, ProgressStore};
pub use torrent::{
    create_multi_file_descriptor, create_single_file_descriptor, CreatedTorrent, Descriptor,
    TorrentInfo,
};
pub use cli::{CliArgs, Command, ProgressDisplay};
