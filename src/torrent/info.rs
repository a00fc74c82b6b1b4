//! Torrent information structures
//!
//! The immutable descriptor produced by parsing a `.torrent` file.

use sha1::{Digest, Sha1};
use anyhow::Result;

use crate::error::TorrentError;

/// Represents a file in a multi-file torrent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFile {
    /// File path components (e.g., ["folder", "subfolder", "file.txt"])
    pub path: Vec<String>,
    /// File size in bytes
    pub length: u64,
    /// Optional MD5 digest of the file contents
    pub md5sum: Option<String>,
}

/// The `info` dictionary of a torrent
///
/// This is the part of the metainfo whose canonical encoding is hashed to
/// produce the info hash.
#[derive(Debug, Clone)]
pub struct TorrentInfo {
    /// Torrent name (file name in single-file mode, directory otherwise)
    pub name: String,
    /// Size of each piece in bytes
    pub piece_length: u64,
    /// Expected SHA1 hash per piece
    pub pieces: Vec<[u8; 20]>,
    /// Private-tracker flag
    pub private: bool,
    /// Single file size (None for multi-file torrents)
    pub length: Option<u64>,
    /// Files in multi-file torrents (None for single-file torrents)
    pub files: Option<Vec<TorrentFile>>,
}

/// A parsed `.torrent` descriptor, immutable once built
#[derive(Debug, Clone)]
pub struct Torrent {
    /// Deduplicated tracker announce URLs
    pub announce_urls: Vec<String>,
    /// Creation timestamp (unix seconds)
    pub creation_date: Option<i64>,
    /// Free-form comment
    pub comment: Option<String>,
    /// Creating client
    pub created_by: Option<String>,
    /// Declared string encoding
    pub encoding: Option<String>,
    /// The info dictionary
    pub info: TorrentInfo,
    /// SHA1 hash of the canonical encoding of the info dictionary
    pub info_hash: [u8; 20],
    /// Total payload size in bytes
    pub size: u64,
}

impl TorrentInfo {
    /// Calculate the total size of all files
    pub fn total_size(&self) -> u64 {
        if let Some(length) = self.length {
            length
        } else if let Some(files) = &self.files {
            files.iter().map(|f| f.length).sum()
        } else {
            0
        }
    }

    /// Parse piece hashes from the concatenated `pieces` byte string
    pub fn parse_piece_hashes(pieces_bytes: &[u8]) -> Result<Vec<[u8; 20]>> {
        if pieces_bytes.len() % 20 != 0 {
            return Err(TorrentError::parse_error_with_source(
                "Pieces field length must be a multiple of 20",
                pieces_bytes.len().to_string(),
            )
            .into());
        }

        let mut pieces = Vec::with_capacity(pieces_bytes.len() / 20);
        for chunk in pieces_bytes.chunks_exact(20) {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            pieces.push(hash);
        }

        Ok(pieces)
    }

    /// Compute a SHA1 digest over canonical info dictionary bytes
    pub fn generate_info_hash(info_dict_bytes: &[u8]) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(info_dict_bytes);
        hasher.finalize().into()
    }
}

impl Torrent {
    /// Total payload size in bytes
    pub fn total_size(&self) -> u64 {
        self.size
    }

    /// Number of pieces in the torrent
    pub fn piece_count(&self) -> usize {
        self.info.pieces.len()
    }

    /// Byte length of a specific piece (the last piece may be shorter)
    pub fn piece_size(&self, index: usize) -> Option<u64> {
        if index >= self.info.pieces.len() {
            return None;
        }

        let start = index as u64 * self.info.piece_length;
        let end = std::cmp::min(start + self.info.piece_length, self.size);
        Some(end - start)
    }

    /// Expected hash for a specific piece index
    pub fn piece_hash(&self, index: usize) -> Option<[u8; 20]> {
        self.info.pieces.get(index).copied()
    }

    /// Check if this is a multi-file torrent
    pub fn is_multi_file(&self) -> bool {
        self.info.files.is_some()
    }

    /// Check if the torrent is restricted to its own trackers
    pub fn is_private(&self) -> bool {
        self.info.private
    }

    /// Get the info hash as a hex string
    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }
}
