//! Torrent metainfo module
//!
//! This module provides parsing of `.torrent` files into a structured
//! descriptor and derivation of the info hash.

pub mod info;
pub mod parser;

pub use info::{Torrent, TorrentFile, TorrentInfo};
pub use parser::TorrentParser;
