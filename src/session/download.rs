//! Download coordinator
//!
//! One task per configured peer drives the receiving side of the protocol.
//! Everything that crosses connections (local bitfield, destination file
//! writes, block records, the completed-piece counter and the active
//! connection registry) sits in a single [`SwarmState`] behind one async
//! mutex, so piece completion is serialised across connections.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, error, info, trace, warn};

use crate::bitfield::Bitfield;
use crate::config::DownloadConfig;
use crate::error::TorrentError;
use crate::peer::{Peer, PeerConnection, PeerHandle, PeerRegistry, PeerState};
use crate::protocol::{Handshake, Message, PeerId};
use crate::storage::{block_layout, PieceStore, PieceTracker, ProgressRecord, ProgressStore};
use crate::torrent::{Descriptor, TorrentInfo};
use super::stats::{DownloadStatus, RateEstimator, SessionState};

/// Cross-connection state of a download
#[derive(Debug)]
pub struct SwarmState {
    /// Pieces held locally
    pub local: Bitfield,
    /// Completed-piece counter
    pub downloaded: usize,
    /// Block records of pieces being assembled
    pub tracker: PieceTracker,
    /// Active connections
    pub peers: PeerRegistry,
    /// Destination file; only written while the lock is held
    pub store: PieceStore,
}

/// A running (or finished) download of one descriptor
pub struct DownloadSession {
    config: DownloadConfig,
    info: TorrentInfo,
    peer_id: PeerId,
    swarm: Mutex<SwarmState>,
    progress: ProgressStore,
    running: AtomicBool,
    state: watch::Sender<SessionState>,
    shutdown: broadcast::Sender<()>,
    bytes_downloaded: AtomicU64,
    next_conn_id: AtomicU64,
    rate: RateEstimator,
}

impl DownloadSession {
    /// Load the descriptor, restore progress and prepare the destination
    pub async fn open(config: DownloadConfig, peer_id: PeerId) -> Result<Arc<Self>> {
        let descriptor = Descriptor::load(&config.torrent_path)?;
        let info = TorrentInfo::from_descriptor(&descriptor)?;
        info!("Info hash: {}", info.info_hash_hex());

        if let Some(files) = &info.files {
            warn!(
                "'{}' describes {} files; they are transferred as one concatenated file at {}",
                info.name, files.len(), config.destination.display()
            );
        }

        let total_size = info.total_size();
        let piece_count = info.piece_count();

        let progress = ProgressStore::new(config.progress_path());
        let local = progress.restore(&info.info_hash, piece_count).await;

        let store = PieceStore::new(config.destination.clone(), info.piece_length, total_size);
        store.ensure_file().await?;

        let downloaded = local.count();
        let (shutdown, _) = broadcast::channel(1);
        let (state, _) = watch::channel(SessionState::Idle);

        Ok(Arc::new(Self {
            config,
            info,
            peer_id,
            swarm: Mutex::new(SwarmState {
                local,
                downloaded,
                tracker: PieceTracker::new(),
                peers: PeerRegistry::new(),
                store,
            }),
            progress,
            running: AtomicBool::new(false),
            state,
            shutdown,
            bytes_downloaded: AtomicU64::new(0),
            next_conn_id: AtomicU64::new(0),
            rate: RateEstimator::new(),
        }))
    }

    /// Mark the session running and spawn one task per peer
    pub async fn launch(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        self.state.send_replace(SessionState::Running);

        let already = self.swarm.lock().await.downloaded;
        if already >= self.info.piece_count() {
            info!("All {} pieces already present", already);
            self.finish();
            return;
        }

        let peers = &self.config.peers;
        if peers.len() > self.config.max_connections {
            warn!("Connecting to {} of {} configured peers", self.config.max_connections, peers.len());
        }
        for &addr in peers.iter().take(self.config.max_connections) {
            let session = Arc::clone(self);
            let shutdown = self.shutdown.subscribe();
            tokio::spawn(session.run_peer(addr, shutdown));
        }
        info!("Download of '{}' started ({}/{} pieces)", self.info.name, already, self.info.piece_count());
    }

    /// Persist progress and close every connection; later calls do nothing
    pub async fn stop(&self) -> Result<()> {
        if self.running.compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            debug!("Download session is not running");
            return Ok(());
        }
        info!("Stopping download of '{}'", self.info.name);

        let (record, complete) = {
            let swarm = self.swarm.lock().await;
            (ProgressRecord::new(&self.info.info_hash, &swarm.local), swarm.local.is_complete())
        };
        if let Err(e) = self.progress.save(&record).await {
            error!("Failed to persist progress to {}: {}", self.progress.path().display(), e);
        }

        let _ = self.shutdown.send(());
        let closed = self.swarm.lock().await.peers.clear();
        debug!("Closed {} connections", closed);

        self.state.send_replace(if complete { SessionState::Completed } else { SessionState::Stopped });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn info(&self) -> &TorrentInfo {
        &self.info
    }

    /// Wait until the session has completed or been stopped
    pub async fn finished(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| matches!(s, SessionState::Completed | SessionState::Stopped)).await;
    }

    pub async fn status(&self) -> DownloadStatus {
        let (downloaded, connected) = {
            let swarm = self.swarm.lock().await;
            (swarm.downloaded, swarm.peers.len())
        };
        let bytes = self.bytes_downloaded.load(Ordering::Relaxed);
        DownloadStatus {
            state: self.state(),
            downloaded_pieces: downloaded,
            total_pieces: self.info.piece_count(),
            bytes_downloaded: bytes,
            total_bytes: self.info.total_size(),
            speed: self.rate.sample(bytes),
            connected_peers: connected,
        }
    }

    /// Stop from a separate task so connection tasks can trigger it
    fn finish(self: &Arc<Self>) {
        info!("Download of '{}' complete", self.info.name);
        let session = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = session.stop().await {
                error!("Failed to stop completed session: {}", e);
            }
        });
    }

    async fn run_peer(self: Arc<Self>, addr: SocketAddr, mut shutdown: broadcast::Receiver<()>) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let mut peer = Peer::new(addr, self.info.piece_count());

        let result = tokio::select! {
            result = self.drive_peer(conn_id, &mut peer) => result,
            _ = shutdown.recv() => {
                debug!("Connection to {} closed by shutdown", addr);
                Ok(())
            }
        };

        peer.set_state(PeerState::Closed);
        if let Some(remote_id) = peer.peer_id {
            self.swarm.lock().await.peers.remove(&remote_id, conn_id);
        }
        match result {
            Ok(()) => debug!(
                "Connection to {} (peer id {}) finished after {} blocks",
                addr,
                peer.peer_id_hex().unwrap_or_else(|| "unknown".to_string()),
                peer.blocks_received
            ),
            Err(e) => warn!("Peer {} disconnected: {}", addr, e),
        }
    }

    async fn drive_peer(self: &Arc<Self>, conn_id: u64, peer: &mut Peer) -> Result<()> {
        let conn = PeerConnection::connect(
            peer.addr,
            self.info.info_hash,
            self.peer_id,
            self.config.connect_timeout,
            peer,
        ).await?;
        self.serve(conn, conn_id, peer).await
    }

    /// Receive loop for one handshaken connection
    async fn serve(self: &Arc<Self>, mut conn: PeerConnection, conn_id: u64, peer: &mut Peer) -> Result<()> {
        {
            let mut swarm = self.swarm.lock().await;
            if !self.is_running() {
                return Ok(());
            }
            swarm.peers.register(conn.remote_id(), PeerHandle {
                conn_id,
                addr: peer.addr,
                sender: conn.sender(),
            });
        }

        conn.send(Message::Interested).await?;
        peer.am_interested = true;
        peer.set_state(PeerState::Interested);

        loop {
            let message = conn.receive_message().await?;
            self.handle_message(&conn, conn_id, peer, message).await?;
            if !self.is_running() {
                return Ok(());
            }
            if peer.can_request() {
                self.request_pieces(&conn, peer).await?;
            }
        }
    }

    async fn handle_message(self: &Arc<Self>, conn: &PeerConnection, conn_id: u64, peer: &mut Peer, message: Message) -> Result<()> {
        match message {
            Message::KeepAlive => trace!("KeepAlive from {}", peer.addr),
            Message::Choke => {
                debug!("Choked by {}", peer.addr);
                peer.peer_choking = true;
                peer.set_state(PeerState::Choked);
                // outstanding requests are void once choked
                peer.in_flight.clear();
            }
            Message::Unchoke => {
                debug!("Unchoked by {}", peer.addr);
                peer.peer_choking = false;
                peer.set_state(PeerState::Unchoked);
            }
            Message::Interested => peer.peer_interested = true,
            Message::NotInterested => peer.peer_interested = false,
            Message::Have { piece_index } => {
                let index = piece_index as usize;
                peer.mark_have(index);
                if !peer.am_interested && index < self.info.piece_count() {
                    let lacking = !self.swarm.lock().await.local.has(index);
                    if lacking {
                        conn.send(Message::Interested).await?;
                        peer.am_interested = true;
                    }
                }
            }
            Message::Bitfield { bitfield } => {
                peer.update_bitfield(&bitfield);
                debug!("Peer {} has {} pieces", peer.addr, peer.bitfield.count());
                if !peer.am_interested {
                    let wanted = peer.has_wanted(&self.swarm.lock().await.local);
                    if wanted {
                        conn.send(Message::Interested).await?;
                        peer.am_interested = true;
                    }
                }
            }
            Message::Request { index, .. } | Message::Cancel { index, .. } => {
                trace!("Ignoring request/cancel for piece {} from {}", index, peer.addr);
            }
            Message::Piece { index, begin, block } => {
                self.accept_block(conn_id, peer, index, begin, &block).await?;
            }
        }
        Ok(())
    }

    /// Request every block of up to `max_in_flight` pieces, lowest index first
    async fn request_pieces(&self, conn: &PeerConnection, peer: &mut Peer) -> Result<()> {
        let mut batch = Vec::new();
        {
            let swarm = self.swarm.lock().await;
            peer.in_flight.retain(|&index| !swarm.local.has(index as usize));

            let max_in_flight = self.config.max_in_flight;
            for index in 0..self.info.piece_count() {
                if peer.in_flight.len() >= max_in_flight {
                    break;
                }
                let piece = index as u32;
                if !peer.has_piece(index) || swarm.local.has(index) || peer.in_flight.contains(&piece) {
                    continue;
                }
                let blocks = block_layout(swarm.store.piece_size(piece), self.config.block_size);
                debug!("Requesting piece {} ({} blocks) from {}", index, blocks.len(), peer.addr);
                peer.in_flight.insert(piece);
                batch.push((piece, blocks));
            }
        }

        // sends may wait on the peer; never hold the swarm lock across them
        for (piece, blocks) in batch {
            for (begin, length) in blocks {
                conn.send(Message::Request { index: piece, begin, length }).await?;
            }
        }
        Ok(())
    }

    /// Write a received block and, once its piece is whole, complete the piece
    async fn accept_block(self: &Arc<Self>, conn_id: u64, peer: &mut Peer, index: u32, begin: u32, block: &[u8]) -> Result<()> {
        let piece_count = self.info.piece_count();
        if index as usize >= piece_count {
            warn!("Peer {} sent block for unknown piece {}", peer.addr, index);
            return Ok(());
        }

        let mut swarm = self.swarm.lock().await;
        if !self.is_running() {
            return Ok(());
        }
        if swarm.local.has(index as usize) {
            trace!("Block for already complete piece {} from {}", index, peer.addr);
            peer.in_flight.remove(&index);
            return Ok(());
        }

        let piece_size = swarm.store.piece_size(index);
        if begin as u64 + block.len() as u64 > piece_size {
            warn!("Block {}+{} from {} overruns piece {} ({} bytes)", begin, block.len(), peer.addr, index, piece_size);
            return Ok(());
        }

        let offset = index as u64 * swarm.store.piece_length() + begin as u64;
        swarm.store.write_block(offset, block).await?;
        self.bytes_downloaded.fetch_add(block.len() as u64, Ordering::Relaxed);
        peer.blocks_received += 1;

        if !swarm.tracker.record(index, begin, block.len(), piece_size, self.config.block_size) {
            return Ok(());
        }
        swarm.tracker.clear(index);
        peer.in_flight.remove(&index);

        if self.config.verify_pieces {
            let expected = self.info.piece_hash(index as usize)
                .ok_or_else(|| TorrentError::state_error(format!("No digest for piece {}", index)))?;
            if !swarm.store.verify_piece(index, &expected).await? {
                warn!("Piece {} from {} failed verification, requesting it again", index, peer.addr);
                return Ok(());
            }
        }

        swarm.local.set(index as usize);
        swarm.downloaded += 1;
        let notified = swarm.peers.broadcast_except(&Message::Have { piece_index: index }, conn_id);
        info!("Piece {} complete ({}/{}), announced to {} peers", index, swarm.downloaded, piece_count, notified);

        if swarm.downloaded >= piece_count {
            drop(swarm);
            self.finish();
        }
        Ok(())
    }
}

/// Front-end handle for downloading one descriptor
pub struct Downloader {
    config: DownloadConfig,
    peer_id: PeerId,
    session: Mutex<Option<Arc<DownloadSession>>>,
}

impl Downloader {
    pub fn new(config: DownloadConfig) -> Result<Self> {
        Self::with_peer_id(config, Handshake::generate_peer_id())
    }

    pub fn with_peer_id(config: DownloadConfig, peer_id: PeerId) -> Result<Self> {
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

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Start downloading; a no-op while a session is running
    pub async fn start(&self) -> Result<()> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            if session.is_running() {
                debug!("Download already running");
                return Ok(());
            }
        }

        let session = DownloadSession::open(self.config.clone(), self.peer_id).await?;
        session.launch().await;
        *slot = Some(session);
        Ok(())
    }

    /// Stop the current session; harmless when nothing is running
    pub async fn stop(&self) -> Result<()> {
        let session = self.session.lock().await.clone();
        match session {
            Some(session) => session.stop().await,
            None => Ok(()),
        }
    }

    pub async fn status(&self) -> DownloadStatus {
        let session = self.session.lock().await.clone();
        match session {
            Some(session) => session.status().await,
            None => DownloadStatus::default(),
        }
    }

    /// Wait for the current session to complete or stop
    pub async fn finished(&self) {
        let session = self.session.lock().await.clone();
        if let Some(session) = session {
            session.finished().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_status_before_start() {
        let downloader = Downloader::new(DownloadConfig::new("a.torrent", "out.bin", vec![])).unwrap();
        let status = downloader.status().await;
        assert_eq!(status.state, SessionState::Idle);
        assert_eq!(status.total_pieces, 0);
        // nothing to stop
        downloader.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_descriptor_is_resource_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = DownloadConfig::new(dir.path().join("none.torrent"), dir.path().join("out.bin"), vec![]);
        let downloader = Downloader::new(config).unwrap();

        let err = downloader.start().await.unwrap_err();
        assert_eq!(TorrentError::kind_of(&err), Some(ErrorKind::ResourceMissing));
        assert_eq!(downloader.status().await.state, SessionState::Idle);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = DownloadConfig::new("a.torrent", "out.bin", vec![]);
        config.max_connections = 0;
        assert!(Downloader::new(config).is_err());
    }
}
