//! Peer connection module
//!
//! Dials remote peers, performs the handshake, and runs one reader task per
//! established connection. The reader drives the tit-for-tat flags, keeps
//! the remote's bitfield snapshot, and feeds received blocks into the piece
//! store.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::error::TorrentError;
use crate::peer::state::Peer;
use crate::protocol::{read_handshake, read_message, write_handshake, write_message};
use crate::protocol::{Handshake, Message};
use crate::session::state::{SessionStatus, TransferState};
use crate::storage::{BlockRequest, PieceState, PieceStore};
use crate::tracker::TrackerPeer;

/// Everything needed to dial and handshake with a remote peer
#[derive(Debug, Clone)]
pub struct PeerConnectOpts {
    /// Info hash of the torrent being exchanged
    pub info_hash: [u8; 20],
    /// Our peer id
    pub peer_id: [u8; 20],
    /// Number of pieces in the torrent, sizes the bitfield
    pub num_pieces: usize,
    /// Bound on dialing
    pub connect_timeout: Duration,
    /// Bound on the handshake exchange
    pub handshake_timeout: Duration,
}

/// An established, handshaken connection to a remote peer
pub struct PeerConnection {
    /// Remote address
    pub addr: SocketAddr,
    state: Arc<Mutex<Peer>>,
    stream: TcpStream,
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

/// Shared collaborators handed to each reader task
#[derive(Clone)]
pub struct PeerReaderContext {
    /// Piece store receiving downloaded blocks
    pub piece_store: Arc<PieceStore>,
    /// Session byte counters and status
    pub transfer: Arc<Mutex<TransferState>>,
    /// Signalled when the last piece verifies
    pub completion: Arc<Notify>,
    /// A peer silent for this long is treated as dead
    pub idle_timeout: Duration,
}

/// A running peer reader owned by the session
pub struct PeerHandle {
    /// Remote address
    pub addr: SocketAddr,
    /// Shared view of the peer's flags and bitfield
    pub state: Arc<Mutex<Peer>>,
    task: JoinHandle<()>,
}

impl PeerHandle {
    /// Abort the reader task, closing its socket
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Whether the reader task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl PeerConnection {
    /// Connect to a peer and perform the handshake
    ///
    /// The remote must echo our info hash. When the tracker supplied a peer
    /// id for this endpoint, the remote must present exactly that id.
    pub async fn connect(
        addr: SocketAddr,
        expected_peer_id: Option<[u8; 20]>,
        opts: &PeerConnectOpts,
    ) -> Result<Self> {
        debug!("Connecting to peer: {}", addr);

        let mut stream = timeout(opts.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                TorrentError::network_error_full("Connection timeout", addr.to_string(), "dial")
            })?
            .map_err(|e| {
                TorrentError::network_error_full("Failed to connect", addr.to_string(), e.to_string())
            })?;

        let remote = timeout(
            opts.handshake_timeout,
            exchange_handshake(&mut stream, opts.info_hash, opts.peer_id),
        )
        .await
        .map_err(|_| {
            TorrentError::peer_error_with_peer("Handshake timeout", addr.to_string())
        })??;

        if !remote.validate(&opts.info_hash) {
            return Err(TorrentError::peer_error_full(
                "Handshake rejected",
                addr.to_string(),
                "info hash mismatch",
            )
            .into());
        }

        if let Some(expected) = expected_peer_id {
            if remote.peer_id != expected {
                return Err(TorrentError::peer_error_full(
                    "Handshake rejected",
                    addr.to_string(),
                    "peer id mismatch",
                )
                .into());
            }
        }

        let mut peer = Peer::new(addr, opts.num_pieces);
        peer.peer_id = Some(remote.peer_id);

        info!("Connected to peer {} ({})", addr, hex::encode(remote.peer_id));
        Ok(Self {
            addr,
            state: Arc::new(Mutex::new(peer)),
            stream,
        })
    }

    /// Shared view of this peer's state
    pub fn state(&self) -> Arc<Mutex<Peer>> {
        self.state.clone()
    }

    /// Spawn the reader task for this connection
    ///
    /// The task owns the socket; aborting the handle closes it.
    pub fn spawn_reader(self, ctx: PeerReaderContext) -> PeerHandle {
        let addr = self.addr;
        let state = self.state.clone();

        let task = tokio::spawn(async move {
            run_reader(self, ctx).await;
        });

        PeerHandle { addr, state, task }
    }
}

/// Dial every tracker-reported peer concurrently
///
/// Individual connection failures are dropped from the result set; a partial
/// peer set is success.
pub async fn connect_to_peers(
    peers: &[TrackerPeer],
    opts: &PeerConnectOpts,
) -> Vec<PeerConnection> {
    let mut tasks = JoinSet::new();

    for peer in peers {
        let addr = peer.socket_addr();
        let expected_peer_id = peer
            .id
            .as_ref()
            .and_then(|id| <[u8; 20]>::try_from(id.as_bytes()).ok());
        let opts = opts.clone();

        tasks.spawn(async move {
            match PeerConnection::connect(addr, expected_peer_id, &opts).await {
                Ok(connection) => Some(connection),
                Err(e) => {
                    debug!("Dropping peer {}: {}", addr, e);
                    None
                }
            }
        });
    }

    let mut connections = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        if let Ok(Some(connection)) = joined {
            connections.push(connection);
        }
    }

    info!("Connected to {}/{} peers", connections.len(), peers.len());
    connections
}

async fn exchange_handshake(
    stream: &mut TcpStream,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
) -> Result<Handshake> {
    let ours = Handshake::new(info_hash, peer_id);
    write_handshake(stream, &ours).await?;
    read_handshake(stream).await
}

async fn run_reader(mut connection: PeerConnection, ctx: PeerReaderContext) {
    let addr = connection.addr;
    let state = connection.state.clone();

    // The piece whose block is currently in flight, if any; its request
    // markers are cleared when this reader dies mid-piece.
    let mut in_flight: Option<u32> = None;

    if let Err(e) = reader_loop(&mut connection.stream, &state, &ctx, &mut in_flight).await {
        debug!("Peer {} disconnected: {}", addr, e);
    }

    if let Some(piece_index) = in_flight {
        if let Some(piece) = ctx.piece_store.piece(piece_index as usize) {
            piece.write().await.reset_requests();
        }
    }
}

async fn reader_loop(
    stream: &mut TcpStream,
    state: &Arc<Mutex<Peer>>,
    ctx: &PeerReaderContext,
    in_flight: &mut Option<u32>,
) -> Result<()> {
    let addr = state.lock().await.addr;

    // Minimal in-order policy: we always want data.
    write_message(stream, &Message::Interested).await?;
    state.lock().await.am_interested = true;

    loop {
        let message = timeout(ctx.idle_timeout, read_message(stream))
            .await
            .map_err(|_| {
                TorrentError::peer_error_with_peer("Idle timeout, closing", addr.to_string())
            })??;

        trace!("Peer {} sent {:?}", addr, message.message_id());

        match message {
            Message::KeepAlive => continue,

            Message::Choke => {
                state.lock().await.peer_choking = true;
            }
            Message::Unchoke => {
                state.lock().await.peer_choking = false;
                request_next_block(stream, state, ctx, in_flight).await?;
            }
            Message::Interested => {
                state.lock().await.peer_interested = true;
            }
            Message::NotInterested => {
                state.lock().await.peer_interested = false;
            }

            Message::Bitfield { bitfield } => {
                state.lock().await.update_bitfield(bitfield);
                request_next_block(stream, state, ctx, in_flight).await?;
            }
            Message::Have { piece_index } => {
                state.lock().await.set_piece(piece_index as usize);
                request_next_block(stream, state, ctx, in_flight).await?;
            }

            Message::Piece { index, begin, block } => {
                if in_flight.map_or(false, |p| p == index) {
                    *in_flight = None;
                }
                ingest_block(ctx, addr, index, begin, block).await;
                request_next_block(stream, state, ctx, in_flight).await?;
            }

            // We advertise nothing and stay choking, so serving requests is
            // a storage collaborator's concern.
            Message::Request { .. } | Message::Cancel { .. } => {}
        }
    }
}

/// Send a request for the first available block the remote has
///
/// First-available policy: the lowest-indexed piece with an unrequested,
/// unfetched block wins. Does nothing while choked or without a candidate.
async fn request_next_block(
    stream: &mut TcpStream,
    state: &Arc<Mutex<Peer>>,
    ctx: &PeerReaderContext,
    in_flight: &mut Option<u32>,
) -> Result<()> {
    if in_flight.is_some() || !state.lock().await.can_request() {
        return Ok(());
    }

    let Some((piece_index, request)) = select_block(state, &ctx.piece_store).await else {
        return Ok(());
    };

    write_message(
        stream,
        &Message::Request {
            index: piece_index,
            begin: request.begin,
            length: request.length,
        },
    )
    .await?;
    *in_flight = Some(piece_index);

    trace!(
        "Requested piece {} block {} ({} bytes)",
        piece_index,
        request.index,
        request.length
    );
    Ok(())
}

async fn select_block(
    state: &Arc<Mutex<Peer>>,
    store: &Arc<PieceStore>,
) -> Option<(u32, BlockRequest)> {
    for index in 0..store.piece_count() {
        if !state.lock().await.has_piece(index) {
            continue;
        }

        let piece = store.piece(index)?;
        let mut piece = piece.write().await;
        if piece.state() == PieceState::Complete {
            continue;
        }

        if let Some(request) = piece.next_request() {
            return Some((index as u32, request));
        }
    }
    None
}

/// Hand a received block to the piece store and update session counters
async fn ingest_block(
    ctx: &PeerReaderContext,
    addr: SocketAddr,
    index: u32,
    begin: u32,
    block: Vec<u8>,
) {
    let Some(piece_arc) = ctx.piece_store.piece(index as usize) else {
        warn!("Peer {} sent block for unknown piece {}", addr, index);
        return;
    };

    let (accepted, verified) = {
        let mut piece = piece_arc.write().await;
        let before = piece.downloaded();

        if let Err(e) = piece.add_block(begin, block) {
            warn!("Peer {} sent bad block for piece {}: {}", addr, index, e);
            return;
        }
        let accepted = piece.downloaded() - before;

        let verified = if piece.is_complete() {
            if piece.verify() {
                piece.mark_complete();
                info!("Piece {} verified", index);
                true
            } else {
                // Failed integrity check: drop every block so the piece is
                // fetched again from scratch.
                warn!("Piece {} failed hash verification, resetting", index);
                piece.reset();
                false
            }
        } else {
            false
        };

        (accepted as u64, verified)
    };

    if accepted > 0 {
        let mut transfer = ctx.transfer.lock().await;
        transfer.downloaded += accepted;
        if transfer.status == SessionStatus::Started {
            transfer.status = SessionStatus::InProgress;
        }
    }

    if verified && ctx.piece_store.is_complete().await {
        ctx.completion.notify_one();
    }
}
