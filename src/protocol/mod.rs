//! Peer-wire protocol module
//!
//! Handshake and message codecs plus async stream helpers.

pub mod handshake;
pub mod message;
pub mod wire;

/// 20-byte SHA-1 digest of the descriptor's info dictionary
pub type InfoHash = [u8; 20];

/// 20-byte client instance identifier
pub type PeerId = [u8; 20];

// Re-export main types
pub use handshake::{Handshake, HANDSHAKE_LENGTH, PROTOCOL_LENGTH, PROTOCOL_STRING};
pub use message::{Message, MessageId, MAX_MESSAGE_LENGTH};
pub use wire::{read_handshake, read_message, write_handshake, write_message};
