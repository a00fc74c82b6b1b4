//! Session state types
//!
//! Status, byte counters, and the read-only snapshot handed to observers.

use serde::Serialize;

use crate::tracker::AnnounceEvent;

/// Lifecycle status of a torrent session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    /// Session created and announced, no payload received yet
    Started,
    /// Blocks are flowing
    InProgress,
    /// Transfers suspended by the user
    Paused,
    /// Every piece downloaded and verified
    Completed,
    /// Session shut down
    Stopped,
}

impl SessionStatus {
    /// The announce event that corresponds to this status in a lifecycle
    /// broadcast
    pub fn as_announce_event(&self) -> AnnounceEvent {
        match self {
            SessionStatus::Stopped => AnnounceEvent::Stopped,
            SessionStatus::Completed => AnnounceEvent::Completed,
            _ => AnnounceEvent::Started,
        }
    }
}

/// Mutable transfer state, guarded by the session's exclusive lock
#[derive(Debug)]
pub struct TransferState {
    /// Current lifecycle status
    pub status: SessionStatus,
    /// Total bytes downloaded so far
    pub downloaded: u64,
    /// Total bytes uploaded so far
    pub uploaded: u64,
}

impl TransferState {
    pub fn new() -> Self {
        Self {
            status: SessionStatus::Started,
            downloaded: 0,
            uploaded: 0,
        }
    }
}

impl Default for TransferState {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only progress snapshot for the UI layer
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    /// Current lifecycle status
    pub status: SessionStatus,
    /// Total bytes downloaded
    pub downloaded: u64,
    /// Total bytes uploaded
    pub uploaded: u64,
    /// Bytes left to download
    pub left: u64,
    /// Total payload size
    pub total_size: u64,
    /// Number of pieces in the torrent
    pub pieces_total: usize,
    /// Number of verified pieces
    pub pieces_complete: usize,
    /// Currently connected peers
    pub connected_peers: usize,
}
