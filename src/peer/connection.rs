//! Peer connection module
//!
//! A handshaken TCP connection to one peer. The stream is split: the owning
//! task reads messages directly, while every outgoing message goes through a
//! bounded queue drained by a dedicated writer task. A peer that stops reading
//! fills the queue and stalls whoever sends to it. Dropping the last sender
//! stops the writer and closes the write half.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::error::TorrentError;
use crate::peer::state::{Peer, PeerState};
use crate::protocol::{read_handshake, read_message, write_handshake, write_message, Handshake, InfoHash, Message, PeerId};

/// Queue handle for sending messages to a peer
pub type PeerSender = mpsc::Sender<Message>;

/// Messages that may wait for the writer of one connection
pub const OUTBOX_CAPACITY: usize = 32;

/// A peer that accepts nothing for this long is dropped
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Represents a connected, handshaken peer
pub struct PeerConnection {
    addr: SocketAddr,
    remote_id: PeerId,
    reader: OwnedReadHalf,
    outbox: PeerSender,
}

impl PeerConnection {
    /// Connect to a peer and perform the handshake, sending ours first
    pub async fn connect(
        addr: SocketAddr,
        info_hash: InfoHash,
        our_peer_id: PeerId,
        connect_timeout: Duration,
        peer: &mut Peer,
    ) -> Result<Self> {
        info!("Connecting to peer: {}", addr);
        peer.set_state(PeerState::Connecting);

        let mut stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|e| {
                warn!("Connection timeout to {}", addr);
                TorrentError::network_error_full("Connection timeout", addr.to_string(), e.to_string())
            })?
            .map_err(|e| {
                error!("Failed to connect to {}: {}", addr, e);
                TorrentError::network_error_full("Failed to connect", addr.to_string(), e.to_string())
            })?;

        debug!("Sending handshake to peer: {}", addr);
        write_handshake(&mut stream, &Handshake::new(info_hash, our_peer_id)).await
            .map_err(|e| TorrentError::peer_error_full("Failed to send handshake", addr.to_string(), e.to_string()))?;
        peer.set_state(PeerState::HandshakeSent);

        let remote = Self::receive_handshake(&mut stream, addr, &info_hash).await?;
        peer.peer_id = Some(remote.peer_id);
        peer.set_state(PeerState::HandshakeVerified);

        info!("Handshake completed with peer {} ({})", addr, String::from_utf8_lossy(&remote.peer_id));
        Ok(Self::split(stream, addr, remote.peer_id))
    }

    /// Complete the handshake on an accepted socket; the remote speaks first
    pub async fn accept(
        mut stream: TcpStream,
        info_hash: InfoHash,
        our_peer_id: PeerId,
        peer: &mut Peer,
    ) -> Result<Self> {
        let addr = peer.addr;
        let remote = Self::receive_handshake(&mut stream, addr, &info_hash).await?;

        debug!("Replying with handshake to peer: {}", addr);
        write_handshake(&mut stream, &Handshake::new(info_hash, our_peer_id)).await
            .map_err(|e| TorrentError::peer_error_full("Failed to send handshake", addr.to_string(), e.to_string()))?;
        peer.peer_id = Some(remote.peer_id);
        peer.set_state(PeerState::HandshakeVerified);

        info!("Accepted handshake from peer {}", addr);
        Ok(Self::split(stream, addr, remote.peer_id))
    }

    async fn receive_handshake(stream: &mut TcpStream, addr: SocketAddr, info_hash: &InfoHash) -> Result<Handshake> {
        debug!("Reading handshake from peer: {}", addr);
        let handshake = read_handshake(stream).await
            .map_err(|e| match e.downcast::<TorrentError>() {
                Ok(protocol) => protocol,
                Err(io) => TorrentError::peer_error_full("Failed to read handshake", addr.to_string(), io.to_string()),
            })?;

        if !handshake.validate(info_hash) {
            error!("Handshake validation failed with peer {}: info hash mismatch", addr);
            return Err(TorrentError::protocol_error_with_source(
                "Handshake info hash mismatch",
                addr.to_string()
            ).into());
        }
        Ok(handshake)
    }

    fn split(stream: TcpStream, addr: SocketAddr, remote_id: PeerId) -> Self {
        let (reader, writer) = stream.into_split();
        let (outbox, queue) = mpsc::channel(OUTBOX_CAPACITY);
        tokio::spawn(run_writer(writer, queue, addr));
        Self { addr, remote_id, reader, outbox }
    }

    /// Receive the next message from the peer
    pub async fn receive_message(&mut self) -> Result<Message> {
        let message = read_message(&mut self.reader).await
            .map_err(|e| match e.downcast::<TorrentError>() {
                Ok(protocol) => protocol,
                Err(io) => TorrentError::peer_error_full("Failed to read message", self.addr.to_string(), io.to_string()),
            })?;
        trace!("Received {:?} from peer: {}", message.message_id(), self.addr);
        Ok(message)
    }

    /// Queue a message for the peer, waiting while the queue is full
    pub async fn send(&self, message: Message) -> Result<()> {
        trace!("Queueing {:?} for peer: {}", message.message_id(), self.addr);
        self.outbox.send(message).await
            .map_err(|_| TorrentError::peer_error_with_peer("Connection writer has stopped", self.addr.to_string()).into())
    }

    /// Another handle onto this connection's outgoing queue
    pub fn sender(&self) -> PeerSender {
        self.outbox.clone()
    }

    pub fn remote_id(&self) -> PeerId {
        self.remote_id
    }
}

async fn run_writer(mut writer: OwnedWriteHalf, mut queue: mpsc::Receiver<Message>, addr: SocketAddr) {
    while let Some(message) = queue.recv().await {
        match timeout(WRITE_TIMEOUT, write_message(&mut writer, &message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Write to peer {} failed: {}", addr, e);
                break;
            }
            Err(_) => {
                warn!("Peer {} stopped reading, closing writer", addr);
                break;
            }
        }
    }
    let _ = writer.shutdown().await;
    debug!("Writer for peer {} finished", addr);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_and_accept_exchange_messages() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let info_hash = [5u8; 20];

        let server = tokio::spawn(async move {
            let (stream, remote) = listener.accept().await.unwrap();
            let mut peer = Peer::new(remote, 1);
            let mut conn = PeerConnection::accept(stream, info_hash, [2u8; 20], &mut peer).await.unwrap();
            assert_eq!(conn.remote_id(), [1u8; 20]);
            let message = conn.receive_message().await.unwrap();
            conn.send(Message::Unchoke).await.unwrap();
            message
        });

        let mut peer = Peer::new(addr, 1);
        let mut conn = PeerConnection::connect(addr, info_hash, [1u8; 20], Duration::from_secs(5), &mut peer)
            .await
            .unwrap();
        assert_eq!(peer.state, PeerState::HandshakeVerified);
        assert_eq!(peer.peer_id, Some([2u8; 20]));

        conn.send(Message::Interested).await.unwrap();
        assert_eq!(conn.receive_message().await.unwrap(), Message::Unchoke);
        assert_eq!(server.await.unwrap(), Message::Interested);
    }

    #[tokio::test]
    async fn test_info_hash_mismatch_is_protocol_violation() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_handshake(&mut stream).await;
            let _ = write_handshake(&mut stream, &Handshake::new([9u8; 20], [3u8; 20])).await;
        });

        let mut peer = Peer::new(addr, 1);
        let err = PeerConnection::connect(addr, [5u8; 20], [1u8; 20], Duration::from_secs(5), &mut peer)
            .await
            .err()
            .unwrap();
        assert_eq!(TorrentError::kind_of(&err), Some(crate::error::ErrorKind::ProtocolViolation));
    }

    #[tokio::test]
    async fn test_send_waits_when_peer_stops_reading() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let info_hash = [5u8; 20];

        // handshake, then hold the socket open without reading
        let (hold_tx, hold_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_handshake(&mut stream).await;
            let _ = write_handshake(&mut stream, &Handshake::new(info_hash, [3u8; 20])).await;
            let _ = hold_rx.await;
        });

        let mut peer = Peer::new(addr, 1);
        let conn = PeerConnection::connect(addr, info_hash, [1u8; 20], Duration::from_secs(5), &mut peer)
            .await
            .unwrap();

        let block = vec![0u8; 1024 * 1024];
        let mut queued = 0;
        let stalled = loop {
            let send = conn.send(Message::Piece { index: 0, begin: 0, block: block.clone() });
            match timeout(Duration::from_millis(500), send).await {
                Ok(result) => {
                    result.unwrap();
                    queued += 1;
                    assert!(queued < 256, "queue never filled");
                }
                Err(_) => break true,
            }
        };
        assert!(stalled);
        drop(hold_tx);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut peer = Peer::new(addr, 1);
        let result = PeerConnection::connect(addr, [5u8; 20], [1u8; 20], Duration::from_secs(5), &mut peer).await;
        assert!(result.is_err());
    }
}
