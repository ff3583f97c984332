//! Seed coordinator
//!
//! Serves a complete local copy of the content to inbound peers. Each
//! accepted socket gets its own task; a failure only ends that task.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, trace, warn};

use crate::bitfield::Bitfield;
use crate::config::SeedConfig;
use crate::error::TorrentError;
use crate::peer::{Peer, PeerConnection, PeerHandle, PeerRegistry, PeerState};
use crate::protocol::{Handshake, Message, PeerId};
use crate::storage::PieceStore;
use crate::torrent::{Descriptor, TorrentInfo};
use super::stats::SeedStatus;

/// Largest block the seeder serves; longer requests are ignored
pub const MAX_BLOCK_LENGTH: u32 = 128 * 1024;

/// A listening seed session
pub struct SeedSession {
    info: TorrentInfo,
    peer_id: PeerId,
    store: PieceStore,
    local: Bitfield,
    peers: Mutex<PeerRegistry>,
    running: AtomicBool,
    shutdown: broadcast::Sender<()>,
    local_addr: SocketAddr,
    next_conn_id: AtomicU64,
    blocks_served: AtomicU64,
    bytes_uploaded: AtomicU64,
}

impl SeedSession {
    /// Load the descriptor, check the source and start listening
    pub async fn open(config: &SeedConfig, peer_id: PeerId) -> Result<Arc<Self>> {
        let descriptor = Descriptor::load(&config.torrent_path)?;
        let info = TorrentInfo::from_descriptor(&descriptor)?;

        if !config.source.is_file() {
            return Err(TorrentError::resource_missing("Seed source not found", config.source.display().to_string()).into());
        }
        let source_len = tokio::fs::metadata(&config.source).await?.len();
        let total_size = info.total_size();
        if source_len != total_size {
            warn!("Source {} is {} bytes, descriptor expects {}", config.source.display(), source_len, total_size);
        }

        let listener = TcpListener::bind(config.listen_addr()).await
            .map_err(|e| TorrentError::network_error_full("Failed to bind listener", config.listen_addr(), e.to_string()))?;
        let local_addr = listener.local_addr()?;

        let (shutdown, _) = broadcast::channel(1);
        let session = Arc::new(Self {
            store: PieceStore::new(config.source.clone(), info.piece_length, total_size),
            local: Bitfield::full(info.piece_count()),
            info,
            peer_id,
            peers: Mutex::new(PeerRegistry::new()),
            running: AtomicBool::new(true),
            shutdown,
            local_addr,
            next_conn_id: AtomicU64::new(0),
            blocks_served: AtomicU64::new(0),
            bytes_uploaded: AtomicU64::new(0),
        });

        let accept_shutdown = session.shutdown.subscribe();
        tokio::spawn(Arc::clone(&session).accept_loop(listener, accept_shutdown));
        info!("Seeding '{}' on {} (info hash {})", session.info.name, local_addr, session.info.info_hash_hex());
        Ok(session)
    }

    /// Close the listener and every connection; later calls do nothing
    pub async fn stop(&self) -> Result<()> {
        if self.running.compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            debug!("Seed session is not running");
            return Ok(());
        }
        let _ = self.shutdown.send(());
        let closed = self.peers.lock().await.clear();
        info!("Stopped seeding '{}' ({} connections closed)", self.info.name, closed);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn status(&self) -> SeedStatus {
        SeedStatus {
            running: self.is_running(),
            connected_peers: self.peers.lock().await.len(),
            blocks_served: self.blocks_served.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
        }
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let peer_shutdown = self.shutdown.subscribe();
                        if !self.is_running() {
                            break;
                        }
                        debug!("Accepted connection from {}", addr);
                        tokio::spawn(Arc::clone(&self).run_peer(stream, addr, peer_shutdown));
                    }
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },
                _ = shutdown.recv() => break,
            }
        }
        debug!("Listener on {} closed", self.local_addr);
    }

    async fn run_peer(self: Arc<Self>, stream: TcpStream, addr: SocketAddr, mut shutdown: broadcast::Receiver<()>) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let mut peer = Peer::new(addr, self.info.piece_count());

        let result = tokio::select! {
            result = self.serve(stream, conn_id, &mut peer) => result,
            _ = shutdown.recv() => Ok(()),
        };

        peer.set_state(PeerState::Closed);
        if let Some(remote_id) = peer.peer_id {
            self.peers.lock().await.remove(&remote_id, conn_id);
        }
        match result {
            Ok(()) => debug!(
                "Seed connection to {} (peer id {}) finished ({} blocks served)",
                addr,
                peer.peer_id_hex().unwrap_or_else(|| "unknown".to_string()),
                peer.blocks_served
            ),
            Err(e) => warn!("Seed connection to {} failed: {}", addr, e),
        }
    }

    async fn serve(&self, stream: TcpStream, conn_id: u64, peer: &mut Peer) -> Result<()> {
        let mut conn = PeerConnection::accept(stream, self.info.info_hash, self.peer_id, peer).await?;
        self.peers.lock().await.register(conn.remote_id(), PeerHandle {
            conn_id,
            addr: peer.addr,
            sender: conn.sender(),
        });
        conn.send(Message::Bitfield { bitfield: self.local.as_bytes().to_vec() }).await?;

        loop {
            match conn.receive_message().await? {
                Message::Interested => {
                    peer.peer_interested = true;
                    conn.send(Message::Unchoke).await?;
                    peer.am_choking = false;
                    debug!("Unchoked {}", peer.addr);
                }
                Message::NotInterested => peer.peer_interested = false,
                Message::Request { index, begin, length } => {
                    self.serve_request(&conn, peer, index, begin, length).await?;
                }
                Message::Have { piece_index } => peer.mark_have(piece_index as usize),
                Message::Bitfield { bitfield } => peer.update_bitfield(&bitfield),
                other => trace!("Ignoring {:?} from {}", other.message_id(), peer.addr),
            }
        }
    }

    async fn serve_request(&self, conn: &PeerConnection, peer: &mut Peer, index: u32, begin: u32, length: u32) -> Result<()> {
        if peer.am_choking {
            debug!("Ignoring request from choked peer {}", peer.addr);
            return Ok(());
        }
        if index as usize >= self.info.piece_count() || length > MAX_BLOCK_LENGTH {
            warn!("Ignoring bad request from {}: piece {} begin {} length {}", peer.addr, index, begin, length);
            return Ok(());
        }

        let block = self.store.read_block(index, begin, length).await?;
        if block.is_empty() {
            debug!("Request from {} is past the end of piece {}", peer.addr, index);
            return Ok(());
        }

        self.blocks_served.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(block.len() as u64, Ordering::Relaxed);
        peer.blocks_served += 1;
        trace!("Serving piece {} begin {} ({} bytes) to {}", index, begin, block.len(), peer.addr);
        // waits while the peer is not reading, which also stops us reading its requests
        conn.send(Message::Piece { index, begin, block }).await
    }
}

/// Front-end handle for seeding one descriptor
pub struct Seeder {
    config: SeedConfig,
    peer_id: PeerId,
    session: Mutex<Option<Arc<SeedSession>>>,
}

impl Seeder {
    pub fn new(config: SeedConfig) -> Result<Self> {
        Self::with_peer_id(config, Handshake::generate_peer_id())
    }

    pub fn with_peer_id(config: SeedConfig, peer_id: PeerId) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            peer_id,
            session: Mutex::new(None),
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Start seeding; a no-op while already seeding
    pub async fn start(&self) -> Result<()> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            if session.is_running() {
                debug!("Seeder already running");
                return Ok(());
            }
        }
        *slot = Some(SeedSession::open(&self.config, self.peer_id).await?);
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let session = self.session.lock().await.clone();
        match session {
            Some(session) => session.stop().await,
            None => Ok(()),
        }
    }

    pub async fn status(&self) -> SeedStatus {
        let session = self.session.lock().await.clone();
        match session {
            Some(session) => session.status().await,
            None => SeedStatus::default(),
        }
    }

    /// Address the listener is bound to, once started
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.session.lock().await.as_ref().map(|s| s.local_addr())
    }
}
