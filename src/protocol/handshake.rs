//! Peer-wire handshake
//!
//! The handshake is a fixed 68-byte frame exchanged once per connection before
//! any length-prefixed message.

use bytes::{BufMut, BytesMut};
use anyhow::Result;
use rand::Rng;
use tracing::{debug, error, info, trace, warn};

use crate::error::TorrentError;
use super::{InfoHash, PeerId};

/// Protocol identifier string
pub const PROTOCOL_STRING: &str = "BitTorrent protocol";

/// Length of the protocol string
pub const PROTOCOL_LENGTH: u8 = 19;

/// Total size of a handshake frame
pub const HANDSHAKE_LENGTH: usize = 68;

/// Client prefix for generated peer ids
const PEER_ID_PREFIX: &[u8; 8] = b"-MT0001-";

/// Peer-wire handshake message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Torrent info hash
    pub info_hash: InfoHash,
    /// Sender's peer id
    pub peer_id: PeerId,
}

impl Handshake {
    /// Create a new handshake with info_hash and peer_id
    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        trace!("Creating handshake for info_hash: {}", hex::encode(info_hash));
        Self { info_hash, peer_id }
    }

    /// Generate a peer id: client prefix followed by 12 random ASCII digits
    pub fn generate_peer_id() -> PeerId {
        let mut peer_id = [0u8; 20];
        peer_id[..8].copy_from_slice(PEER_ID_PREFIX);
        let mut rng = rand::thread_rng();
        for byte in peer_id[8..].iter_mut() {
            *byte = b'0' + rng.gen_range(0..10u8);
        }
        info!("Generated new peer ID: {}", String::from_utf8_lossy(&peer_id));
        peer_id
    }

    /// Serialize the handshake to its 68-byte wire form
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LENGTH);
        buf.put_u8(PROTOCOL_LENGTH);
        buf.put_slice(PROTOCOL_STRING.as_bytes());
        buf.put_slice(&[0u8; 8]);
        buf.put_slice(&self.info_hash);
        buf.put_slice(&self.peer_id);
        buf.to_vec()
    }

    /// Deserialize a handshake from exactly 68 bytes
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() != HANDSHAKE_LENGTH {
            error!("Invalid handshake length: expected {} bytes, got {}", HANDSHAKE_LENGTH, data.len());
            return Err(TorrentError::protocol_error_with_source(
                "Invalid handshake length",
                format!("expected {} bytes, got {}", HANDSHAKE_LENGTH, data.len())
            ).into());
        }

        let protocol_length = data[0];
        if protocol_length != PROTOCOL_LENGTH {
            error!("Invalid protocol length: expected {}, got {}", PROTOCOL_LENGTH, protocol_length);
            return Err(TorrentError::protocol_error_with_source(
                "Invalid protocol length",
                format!("expected {}, got {}", PROTOCOL_LENGTH, protocol_length)
            ).into());
        }

        if &data[1..20] != PROTOCOL_STRING.as_bytes() {
            error!("Invalid protocol string");
            return Err(TorrentError::protocol_error("Invalid protocol string").into());
        }

        // data[20..28] is reserved
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);
        debug!("Handshake info_hash: {}, peer_id: {}", hex::encode(info_hash), hex::encode(peer_id));

        Ok(Self { info_hash, peer_id })
    }

    /// Check the handshake carries the expected info hash
    pub fn validate(&self, expected_info_hash: &InfoHash) -> bool {
        if self.info_hash != *expected_info_hash {
            warn!("Handshake validation failed: info hash mismatch");
            warn!("  Expected: {}", hex::encode(expected_info_hash));
            warn!("  Got:      {}", hex::encode(self.info_hash));
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_serialize_deserialize() {
        let handshake = Handshake::new([1u8; 20], [2u8; 20]);

        let serialized = handshake.serialize();
        assert_eq!(serialized.len(), 68);
        assert_eq!(serialized[0], 19);
        assert_eq!(&serialized[1..20], b"BitTorrent protocol");
        assert_eq!(&serialized[20..28], &[0u8; 8]);

        let deserialized = Handshake::deserialize(&serialized).unwrap();
        assert_eq!(deserialized, handshake);
    }

    #[test]
    fn test_generate_peer_id() {
        let peer_id = Handshake::generate_peer_id();
        assert_eq!(&peer_id[..8], b"-MT0001-");
        assert!(peer_id[8..].iter().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn test_handshake_validate() {
        let handshake = Handshake::new([1u8; 20], [2u8; 20]);
        assert!(handshake.validate(&[1u8; 20]));
        assert!(!handshake.validate(&[3u8; 20]));
    }

    #[test]
    fn test_reject_bad_length_byte() {
        let mut bytes = Handshake::new([1u8; 20], [2u8; 20]).serialize();
        bytes[0] = 18;
        assert!(Handshake::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_reject_bad_protocol_name() {
        let mut bytes = Handshake::new([1u8; 20], [2u8; 20]).serialize();
        bytes[1] = b'b';
        assert!(Handshake::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_reject_wrong_total_length() {
        let bytes = Handshake::new([1u8; 20], [2u8; 20]).serialize();
        assert!(Handshake::deserialize(&bytes[..67]).is_err());

        let mut long = bytes.clone();
        long.push(0);
        assert!(Handshake::deserialize(&long).is_err());
    }
}
