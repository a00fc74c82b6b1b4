//! torrent-engine
//!
//! An async BitTorrent client engine: bencode codec, torrent metainfo,
//! tracker announces, the peer wire protocol, and piece verification.
//! UI rendering, CLI bootstrap, and on-disk persistence are left to the
//! embedding application.

pub mod bencode;
pub mod client;
pub mod config;
pub mod error;
pub mod peer;
pub mod protocol;
pub mod session;
pub mod storage;
pub mod torrent;
pub mod tracker;

pub use error::TorrentError;

pub use bencode::BencodeValue;
pub use client::Client;
pub use config::EngineConfig;
pub use peer::{Peer, PeerConnection};
pub use protocol::{Handshake, Message, MessageId};
pub use session::{ManagedTracker, Session, SessionStats, SessionStatus};
pub use storage::{Block, BlockRequest, Piece, PieceState, PieceStore, BLOCK_SIZE};
pub use torrent::{Torrent, TorrentFile, TorrentInfo, TorrentParser};
pub use tracker::{
    create_tracker_client, AnnounceEvent, AnnounceParams, AnnounceResponse, TrackerClient,
    TrackerPeer,
};
