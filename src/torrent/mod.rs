//! Torrent descriptor handling module
//!
//! Decoding, inspecting and creating descriptor files.

pub mod creator;
pub mod descriptor;
pub mod info;

pub use creator::{create_multi_file_descriptor, create_single_file_descriptor, CreatedTorrent};
pub use descriptor::Descriptor;
pub use info::{TorrentFile, TorrentInfo};
