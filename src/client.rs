//! Client registry module
//!
//! Owns the local peer identity and the map from info hash to active
//! session. The map is an explicit owned collection; there is no ambient
//! global state.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::TorrentError;
use crate::session::Session;
use crate::torrent::TorrentParser;

/// Fixed ASCII prefix identifying this client and version
const PEER_ID_PREFIX: &[u8; 8] = b"-TE0001-";

/// Manages the complete state of all torrents
pub struct Client {
    /// Unique 20-byte identifier for this client
    id: [u8; 20],
    config: EngineConfig,
    /// Info hash of each torrent mapped to its active session
    sessions: HashMap<[u8; 20], Arc<Session>>,
}

impl Client {
    /// Create a client with the default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(EngineConfig::default())
    }

    /// Create a client with an explicit configuration
    pub fn with_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let id = Self::generate_peer_id();
        info!("Client peer id: {}", String::from_utf8_lossy(&id[..8]));

        Ok(Self {
            id,
            config,
            sessions: HashMap::new(),
        })
    }

    /// Generate a 20-byte peer identity: client prefix plus random tail
    pub fn generate_peer_id() -> [u8; 20] {
        let mut peer_id = [0u8; 20];
        peer_id[..PEER_ID_PREFIX.len()].copy_from_slice(PEER_ID_PREFIX);
        let tail: [u8; 12] = rand::random();
        peer_id[PEER_ID_PREFIX.len()..].copy_from_slice(&tail);
        peer_id
    }

    /// This client's peer id
    pub fn peer_id(&self) -> [u8; 20] {
        self.id
    }

    /// Parse a torrent from bytes and register a session for it
    ///
    /// The session is created stopped-cold; call [`Session::start`] to begin
    /// announcing. Adding the same torrent twice is an error.
    pub fn add_torrent_bytes(&mut self, data: &[u8]) -> Result<Arc<Session>> {
        let torrent = TorrentParser::parse_bytes(data)?;
        let info_hash = torrent.info_hash;

        if self.sessions.contains_key(&info_hash) {
            return Err(TorrentError::session_error_with_hash(
                "Torrent already added",
                hex::encode(info_hash),
            )
            .into());
        }

        let session = Arc::new(Session::new(self.id, torrent, self.config.clone())?);
        self.sessions.insert(info_hash, session.clone());

        debug!(
            "Added torrent {} ({} sessions active)",
            hex::encode(info_hash),
            self.sessions.len()
        );
        Ok(session)
    }

    /// Read a `.torrent` file and register a session for it
    pub fn add_torrent_file(&mut self, path: &Path) -> Result<Arc<Session>> {
        let data = std::fs::read(path).map_err(|e| {
            TorrentError::parse_error_with_source("Failed to read torrent file", e.to_string())
        })?;
        self.add_torrent_bytes(&data)
    }

    /// Look up a session by info hash
    pub fn session(&self, info_hash: &[u8; 20]) -> Option<Arc<Session>> {
        self.sessions.get(info_hash).cloned()
    }

    /// Stop a session and remove it from the registry
    pub async fn remove_torrent(&mut self, info_hash: &[u8; 20]) -> Result<()> {
        let session = self.sessions.remove(info_hash).ok_or_else(|| {
            TorrentError::session_error_with_hash("Unknown torrent", hex::encode(info_hash))
        })?;

        session.stop().await;
        Ok(())
    }

    /// Stop every session
    pub async fn shutdown(&mut self) {
        info!("Shutting down {} sessions", self.sessions.len());
        for (_, session) in self.sessions.drain() {
            session.stop().await;
        }
    }

    /// Number of registered sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
