//! Piece and block state
//!
//! A piece is split into fixed-size blocks, the unit requested over the
//! wire. Each piece is guarded by its own lock so progress on different
//! pieces never contends.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use sha1::{Digest, Sha1};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::TorrentError;
use crate::torrent::Torrent;

/// Size of a transfer block: 16 KiB, except a shorter final block
pub const BLOCK_SIZE: u32 = 16 * 1024;

/// State of a piece
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceState {
    /// No block requested yet
    None,
    /// At least one block in flight
    Pending,
    /// All blocks received and hash-verified
    Complete,
}

/// A block within a piece
#[derive(Debug, Clone)]
pub struct Block {
    /// Block index within the piece
    pub index: usize,
    /// Byte offset within the piece
    pub begin: u32,
    /// Declared length of the block
    pub length: u32,
    /// Block data, None until downloaded
    pub data: Option<Vec<u8>>,
}

/// A request for one block, as sent to a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRequest {
    /// Block index within the piece
    pub index: usize,
    /// Byte offset within the piece
    pub begin: u32,
    /// Length to request
    pub length: u32,
}

/// One piece of the torrent and its download state
#[derive(Debug)]
pub struct Piece {
    /// Piece index
    pub index: u32,
    /// Length of the piece in bytes
    pub length: u32,
    /// Expected SHA1 hash
    pub hash: [u8; 20],
    blocks: Vec<Block>,
    requested: HashSet<usize>,
    downloaded: u32,
    state: PieceState,
}

impl Piece {
    /// Create a piece split into 16 KiB blocks with a short final block
    pub fn new(index: u32, length: u32, hash: [u8; 20]) -> Self {
        let num_blocks = (length as usize + BLOCK_SIZE as usize - 1) / BLOCK_SIZE as usize;

        let mut blocks = Vec::with_capacity(num_blocks);
        for i in 0..num_blocks {
            let begin = i as u32 * BLOCK_SIZE;
            let block_len = std::cmp::min(BLOCK_SIZE, length - begin);
            blocks.push(Block { index: i, begin, length: block_len, data: None });
        }

        Self {
            index,
            length,
            hash,
            blocks,
            requested: HashSet::new(),
            downloaded: 0,
            state: PieceState::None,
        }
    }

    /// Idempotently mark a block as in flight
    ///
    /// Out-of-range indices are ignored, not errors.
    pub fn mark_requested(&mut self, block_index: usize) {
        if block_index >= self.blocks.len() {
            return;
        }

        self.requested.insert(block_index);
        if self.state == PieceState::None {
            self.state = PieceState::Pending;
        }
    }

    /// Store a downloaded block at its offset
    ///
    /// A block whose offset matches no block boundary, or whose length
    /// differs from the block's declared length, is rejected. Re-delivery of
    /// an already-stored block is accepted without double-counting.
    pub fn add_block(&mut self, begin: u32, data: Vec<u8>) -> Result<()> {
        let block = self
            .blocks
            .iter_mut()
            .find(|b| b.begin == begin)
            .ok_or_else(|| {
                TorrentError::validation_error_with_field(
                    "No block found at offset",
                    begin.to_string(),
                )
            })?;

        if data.len() != block.length as usize {
            return Err(TorrentError::validation_error_with_field(
                format!(
                    "Block length mismatch: got {}, expected {}",
                    data.len(),
                    block.length
                ),
                format!("piece {} offset {}", self.index, begin),
            )
            .into());
        }

        if block.data.is_some() {
            debug!("Duplicate block for piece {} offset {}, ignoring", self.index, begin);
            return Ok(());
        }

        self.downloaded += data.len() as u32;
        block.data = Some(data);
        Ok(())
    }

    /// True when every byte of the piece has been downloaded
    pub fn is_complete(&self) -> bool {
        self.downloaded == self.length
    }

    /// Concatenate block payloads at their offsets
    ///
    /// Returns None unless the piece is complete.
    pub fn assemble_data(&self) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }

        let mut data = vec![0u8; self.length as usize];
        for block in &self.blocks {
            if let Some(payload) = &block.data {
                data[block.begin as usize..block.begin as usize + payload.len()]
                    .copy_from_slice(payload);
            }
        }
        Some(data)
    }

    /// Validate piece integrity against the expected SHA1 hash
    ///
    /// Requires completeness; an incomplete piece is never valid.
    pub fn verify(&self) -> bool {
        let Some(data) = self.assemble_data() else {
            return false;
        };

        let mut hasher = Sha1::new();
        hasher.update(&data);
        let digest: [u8; 20] = hasher.finalize().into();
        digest == self.hash
    }

    /// Next block to request: the first one neither fetched nor in flight
    ///
    /// Marks the returned block as requested. None when no block remains;
    /// a rarest-first or endgame policy is a drop-in replacement behind this
    /// contract.
    pub fn next_request(&mut self) -> Option<BlockRequest> {
        let block = self
            .blocks
            .iter()
            .find(|b| b.data.is_none() && !self.requested.contains(&b.index))?;

        let request = BlockRequest { index: block.index, begin: block.begin, length: block.length };
        self.requested.insert(request.index);
        if self.state == PieceState::None {
            self.state = PieceState::Pending;
        }
        Some(request)
    }

    /// Clear all in-flight markers, demoting Pending back to None
    ///
    /// Used after a peer disconnects mid-piece; downloaded blocks are kept.
    pub fn reset_requests(&mut self) {
        self.requested.clear();
        if self.state == PieceState::Pending {
            self.state = PieceState::None;
        }
    }

    /// Drop everything and start over
    ///
    /// Used after a failed hash verification so every block is fetched
    /// again.
    pub fn reset(&mut self) {
        warn!("Resetting piece {} for re-download", self.index);
        for block in &mut self.blocks {
            block.data = None;
        }
        self.requested.clear();
        self.downloaded = 0;
        self.state = PieceState::None;
    }

    /// Mark the piece as verified complete
    pub fn mark_complete(&mut self) {
        self.state = PieceState::Complete;
    }

    /// Current piece state
    pub fn state(&self) -> PieceState {
        self.state
    }

    /// Bytes downloaded so far
    pub fn downloaded(&self) -> u32 {
        self.downloaded
    }

    /// Number of blocks in the piece
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

/// All pieces of one torrent, each behind its own lock
#[derive(Debug)]
pub struct PieceStore {
    pieces: Vec<Arc<RwLock<Piece>>>,
}

impl PieceStore {
    /// Build the piece set from a torrent's hash list and lengths
    pub fn from_torrent(torrent: &Torrent) -> Self {
        let pieces = torrent
            .info
            .pieces
            .iter()
            .enumerate()
            .map(|(index, hash)| {
                let length = torrent.piece_size(index).unwrap_or(0) as u32;
                Arc::new(RwLock::new(Piece::new(index as u32, length, *hash)))
            })
            .collect();

        Self { pieces }
    }

    /// Get a piece handle by index
    pub fn piece(&self, index: usize) -> Option<Arc<RwLock<Piece>>> {
        self.pieces.get(index).cloned()
    }

    /// Number of pieces
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Number of verified-complete pieces
    pub async fn completed_count(&self) -> usize {
        let mut count = 0;
        for piece in &self.pieces {
            if piece.read().await.state() == PieceState::Complete {
                count += 1;
            }
        }
        count
    }

    /// True when every piece is verified complete
    pub async fn is_complete(&self) -> bool {
        self.completed_count().await == self.pieces.len()
    }

    /// Download progress in [0.0, 1.0]
    pub async fn progress(&self) -> f64 {
        if self.pieces.is_empty() {
            return 0.0;
        }
        self.completed_count().await as f64 / self.pieces.len() as f64
    }

    /// Bitfield of verified pieces, MSB-first within each byte
    pub async fn bitfield(&self) -> Vec<u8> {
        let mut bitfield = vec![0u8; (self.pieces.len() + 7) / 8];
        for (i, piece) in self.pieces.iter().enumerate() {
            if piece.read().await.state() == PieceState::Complete {
                bitfield[i / 8] |= 1 << (7 - (i % 8));
            }
        }
        bitfield
    }
}
