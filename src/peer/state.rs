//! Peer state module
//!
//! Per-connection choke/interest flags, the remote's advertised pieces and
//! the pieces currently requested from it.

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::bitfield::Bitfield;
use crate::protocol::PeerId;

/// Lifecycle of a peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerState {
    /// TCP connect in progress
    #[default]
    Connecting,
    /// Local handshake written, waiting for the remote one
    HandshakeSent,
    /// Remote handshake matched our info hash
    HandshakeVerified,
    /// We told the remote we are interested
    Interested,
    /// Remote is choking us
    Choked,
    /// Remote has unchoked us
    Unchoked,
    /// Connection is gone
    Closed,
}

impl PeerState {
    /// Check if the handshake has completed and the connection is still open
    pub fn is_established(&self) -> bool {
        !matches!(self, PeerState::Connecting | PeerState::HandshakeSent | PeerState::Closed)
    }
}

/// State of one remote peer as seen by its connection task
#[derive(Debug, Clone)]
pub struct Peer {
    /// Peer address
    pub addr: SocketAddr,
    /// Peer identifier from its handshake
    pub peer_id: Option<PeerId>,
    /// Current state
    pub state: PeerState,
    /// We're choking them
    pub am_choking: bool,
    /// We're interested
    pub am_interested: bool,
    /// They're choking us
    pub peer_choking: bool,
    /// They're interested
    pub peer_interested: bool,
    /// Pieces they advertise
    pub bitfield: Bitfield,
    /// Pieces requested from them and not yet completed
    pub in_flight: HashSet<u32>,
    /// Blocks received from this peer
    pub blocks_received: u64,
    /// Blocks served to this peer
    pub blocks_served: u64,
}

impl Peer {
    /// Create a new peer
    pub fn new(addr: SocketAddr, piece_count: usize) -> Self {
        Self {
            addr,
            peer_id: None,
            state: PeerState::Connecting,
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
            bitfield: Bitfield::new(piece_count),
            in_flight: HashSet::new(),
            blocks_received: 0,
            blocks_served: 0,
        }
    }

    /// Replace the advertised pieces wholesale
    pub fn update_bitfield(&mut self, bytes: &[u8]) {
        self.bitfield = Bitfield::from_bytes(bytes, self.bitfield.piece_count());
    }

    /// Record a single advertised piece
    pub fn mark_have(&mut self, index: usize) {
        self.bitfield.set(index);
    }

    /// Check if peer has specific piece
    pub fn has_piece(&self, index: usize) -> bool {
        self.bitfield.has(index)
    }

    /// Check if the peer holds anything `local` is missing
    pub fn has_wanted(&self, local: &Bitfield) -> bool {
        self.bitfield.first_wanted_by(local).is_some()
    }

    /// Check if we can request from peer
    pub fn can_request(&self) -> bool {
        !self.peer_choking && self.state.is_established()
    }

    pub fn set_state(&mut self, state: PeerState) {
        self.state = state;
    }

    pub fn peer_id_hex(&self) -> Option<String> {
        self.peer_id.map(hex::encode)
    }
}
