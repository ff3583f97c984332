//! Peer management module
//!
//! Handles peer connections and state management.

pub mod connection;
pub mod manager;
pub mod state;

// Re-export main types
pub use connection::{PeerConnection, PeerSender};
pub use manager::{PeerHandle, PeerRegistry};
pub use state::{Peer, PeerState};
