//! Peer manager module
//!
//! Registry of the active connections in a session, keyed by remote peer id.

use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, trace, warn};

use crate::peer::connection::PeerSender;
use crate::protocol::{Message, PeerId};

/// Handle onto one registered connection
#[derive(Debug, Clone)]
pub struct PeerHandle {
    /// Session-unique connection number
    pub conn_id: u64,
    pub addr: SocketAddr,
    pub sender: PeerSender,
}

/// Active connections of a session
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<PeerId, PeerHandle>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under its remote peer id, replacing any older one
    pub fn register(&mut self, peer_id: PeerId, handle: PeerHandle) {
        let addr = handle.addr;
        if let Some(old) = self.peers.insert(peer_id, handle) {
            debug!("Peer id {} reconnected from {} (was {})", hex::encode(peer_id), addr, old.addr);
        }
        info!("Registered peer {} (active: {})", addr, self.peers.len());
    }

    /// Remove a connection; ignored when the id now belongs to a newer connection
    pub fn remove(&mut self, peer_id: &PeerId, conn_id: u64) -> bool {
        match self.peers.get(peer_id) {
            Some(handle) if handle.conn_id == conn_id => {
                let handle = self.peers.remove(peer_id);
                if let Some(handle) = handle {
                    debug!("Removed peer {} (active: {})", handle.addr, self.peers.len());
                }
                true
            }
            _ => false,
        }
    }

    /// Queue `message` on every connection except `except`; returns how many got it
    ///
    /// Never waits: a connection whose queue is full misses the message.
    pub fn broadcast_except(&self, message: &Message, except: u64) -> usize {
        let mut sent = 0;
        for handle in self.peers.values().filter(|h| h.conn_id != except) {
            match handle.sender.try_send(message.clone()) {
                Ok(()) => sent += 1,
                Err(TrySendError::Full(_)) => warn!("Peer {} queue is full, dropping {:?}", handle.addr, message.message_id()),
                Err(TrySendError::Closed(_)) => trace!("Peer {} queue closed, skipping broadcast", handle.addr),
            }
        }
        sent
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Drop every handle; writers exit once their connection task ends too
    pub fn clear(&mut self) -> usize {
        let count = self.peers.len();
        self.peers.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn handle(conn_id: u64, port: u16) -> (PeerHandle, mpsc::Receiver<Message>) {
        let (sender, rx) = mpsc::channel(2);
        let addr = format!("127.0.0.1:{}", port).parse().unwrap();
        (PeerHandle { conn_id, addr, sender }, rx)
    }

    #[test]
    fn test_broadcast_skips_source() {
        let mut registry = PeerRegistry::new();
        let (a, mut rx_a) = handle(1, 1001);
        let (b, mut rx_b) = handle(2, 1002);
        registry.register([1u8; 20], a);
        registry.register([2u8; 20], b);

        let sent = registry.broadcast_except(&Message::Have { piece_index: 3 }, 1);
        assert_eq!(sent, 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), Message::Have { piece_index: 3 });
    }

    #[test]
    fn test_remove_checks_connection() {
        let mut registry = PeerRegistry::new();
        let (old, _rx_old) = handle(1, 1001);
        let (new, _rx_new) = handle(2, 1002);
        registry.register([1u8; 20], old);
        registry.register([1u8; 20], new);
        assert_eq!(registry.len(), 1);

        // the stale connection must not evict its replacement
        assert!(!registry.remove(&[1u8; 20], 1));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(&[1u8; 20], 2));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut registry = PeerRegistry::new();
        let (a, _rx) = handle(1, 1001);
        registry.register([1u8; 20], a);
        assert_eq!(registry.clear(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_broadcast_skips_full_queue() {
        let mut registry = PeerRegistry::new();
        let (a, mut rx_a) = handle(1, 1001);
        let (b, _rx_b) = handle(2, 1002);
        registry.register([1u8; 20], a);
        registry.register([2u8; 20], b);

        for piece_index in 0..2 {
            assert_eq!(registry.broadcast_except(&Message::Have { piece_index }, 0), 2);
        }
        // both queues hold two messages now
        assert_eq!(registry.broadcast_except(&Message::Have { piece_index: 2 }, 0), 0);

        assert_eq!(rx_a.try_recv().unwrap(), Message::Have { piece_index: 0 });
        assert_eq!(registry.broadcast_except(&Message::Have { piece_index: 3 }, 0), 1);
    }
}
