//! Torrent file parser
//!
//! Handles parsing of .torrent files and extracting metadata.

use std::collections::BTreeMap;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::bencode::{self, BencodeValue, Decoder};
use crate::error::TorrentError;
use crate::torrent::info::{Torrent, TorrentFile, TorrentInfo};

type Dict = BTreeMap<Vec<u8>, BencodeValue>;

/// Parser for .torrent files
pub struct TorrentParser;

impl TorrentParser {
    /// Parse a .torrent file from bytes
    pub fn parse_bytes(data: &[u8]) -> Result<Torrent> {
        info!("Parsing torrent file from {} bytes", data.len());

        let mut decoder = Decoder::new(data);
        let root = decoder.decode_value()?;
        if decoder.remaining() > 0 {
            warn!(
                "Torrent file has {} trailing bytes after the metainfo dictionary",
                decoder.remaining()
            );
        }

        let root_dict = root
            .as_dict()
            .ok_or_else(|| TorrentError::parse_error("Top-level value is not a dictionary"))?;

        let info_value = root_dict
            .get(b"info".as_slice())
            .ok_or_else(|| TorrentError::parse_error("Missing info dictionary"))?;
        let info_dict = info_value
            .as_dict()
            .ok_or_else(|| TorrentError::parse_error("info is not a dictionary"))?;

        // The hash is computed over the canonical re-encoding of the decoded
        // info value, unknown keys included. Re-encoding a reconstructed
        // struct would drop those keys and change the hash.
        let info_hash = TorrentInfo::generate_info_hash(&bencode::to_bytes(info_value));

        let parsed_info = Self::parse_info_dict(info_dict)?;
        let announce_urls = Self::parse_announce_urls(root_dict)?;
        let size = parsed_info.total_size();

        let torrent = Torrent {
            announce_urls,
            creation_date: get_int(root_dict, b"creation date"),
            comment: get_string(root_dict, b"comment"),
            created_by: get_string(root_dict, b"created by"),
            encoding: get_string(root_dict, b"encoding"),
            info: parsed_info,
            info_hash,
            size,
        };

        info!(
            "Parsed torrent '{}': {} pieces, {} bytes, info_hash {}",
            torrent.info.name,
            torrent.piece_count(),
            torrent.size,
            torrent.info_hash_hex()
        );
        Ok(torrent)
    }

    /// Parse a .torrent file from a file path
    pub fn parse_file(path: &std::path::Path) -> Result<Torrent> {
        info!("Loading torrent file from: {}", path.display());

        let data = std::fs::read(path).map_err(|e| {
            error!("Failed to read torrent file '{}': {}", path.display(), e);
            TorrentError::parse_error_with_source("Failed to read torrent file", e.to_string())
        })?;

        debug!("Read {} bytes from torrent file", data.len());
        Self::parse_bytes(&data)
    }

    fn parse_info_dict(info_dict: &Dict) -> Result<TorrentInfo> {
        let name = get_string(info_dict, b"name")
            .ok_or_else(|| TorrentError::parse_error("Missing name field"))?;

        let piece_length = get_int(info_dict, b"piece length")
            .ok_or_else(|| TorrentError::parse_error("Missing piece length"))?;
        if piece_length <= 0 {
            return Err(TorrentError::parse_error_with_source(
                "Invalid piece length",
                piece_length.to_string(),
            )
            .into());
        }

        let pieces_bytes = info_dict
            .get(b"pieces".as_slice())
            .and_then(|v| v.as_bytes())
            .ok_or_else(|| TorrentError::parse_error("Missing pieces field"))?;
        let pieces = TorrentInfo::parse_piece_hashes(pieces_bytes)?;

        let private = get_int(info_dict, b"private") == Some(1);

        let (length, files) = if let Some(files_value) = info_dict.get(b"files".as_slice()) {
            (None, Some(Self::parse_files(files_value)?))
        } else if let Some(len) = get_int(info_dict, b"length") {
            if len < 0 {
                return Err(TorrentError::parse_error_with_source(
                    "Negative file length",
                    len.to_string(),
                )
                .into());
            }
            (Some(len as u64), None)
        } else {
            return Err(
                TorrentError::parse_error("Neither length nor files found in info dict").into(),
            );
        };

        Ok(TorrentInfo {
            name,
            piece_length: piece_length as u64,
            pieces,
            private,
            length,
            files,
        })
    }

    fn parse_files(files_value: &BencodeValue) -> Result<Vec<TorrentFile>> {
        let entries = files_value
            .as_list()
            .ok_or_else(|| TorrentError::parse_error("files is not a list"))?;

        let mut files = Vec::with_capacity(entries.len());
        for entry in entries {
            let file_dict = entry
                .as_dict()
                .ok_or_else(|| TorrentError::parse_error("File entry is not a dictionary"))?;

            let length = get_int(file_dict, b"length")
                .ok_or_else(|| TorrentError::parse_error("Missing file length"))?;
            if length < 0 {
                return Err(TorrentError::parse_error_with_source(
                    "Negative file length",
                    length.to_string(),
                )
                .into());
            }

            let path_list = file_dict
                .get(b"path".as_slice())
                .and_then(|v| v.as_list())
                .ok_or_else(|| TorrentError::parse_error("Missing file path"))?;

            let mut path = Vec::with_capacity(path_list.len());
            for component in path_list {
                let s = component
                    .as_str()
                    .ok_or_else(|| TorrentError::parse_error("Path component is not a string"))?;
                path.push(s.to_string());
            }

            files.push(TorrentFile {
                path,
                length: length as u64,
                md5sum: get_string(file_dict, b"md5sum"),
            });
        }

        Ok(files)
    }

    /// Collect the union of `announce` and every `announce-list` tier,
    /// deduplicated. Zero resulting URLs makes the torrent unusable.
    fn parse_announce_urls(root_dict: &Dict) -> Result<Vec<String>> {
        let mut urls: Vec<String> = Vec::new();

        if let Some(announce) = get_string(root_dict, b"announce") {
            urls.push(announce);
        }

        if let Some(tiers) = root_dict.get(b"announce-list".as_slice()).and_then(|v| v.as_list()) {
            for tier in tiers {
                let Some(tier_urls) = tier.as_list() else {
                    continue;
                };
                for url in tier_urls {
                    if let Some(s) = url.as_str() {
                        if !urls.iter().any(|u| u == s) {
                            urls.push(s.to_string());
                        }
                    }
                }
            }
        }

        if urls.is_empty() {
            return Err(TorrentError::validation_error_with_field(
                "Torrent has no announce URLs",
                "announce",
            )
            .into());
        }

        Ok(urls)
    }
}

fn get_string(dict: &Dict, key: &[u8]) -> Option<String> {
    dict.get(key).and_then(|v| v.as_str()).map(String::from)
}

fn get_int(dict: &Dict, key: &[u8]) -> Option<i64> {
    dict.get(key).and_then(|v| v.as_integer())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal single-file torrent document.
    fn torrent_bytes(name: &str, piece_length: i64, length: i64, pieces: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"d8:announce30:http://tracker.example.com/ann");
        data.extend_from_slice(b"7:comment4:test");
        data.extend_from_slice(b"4:infod");
        data.extend_from_slice(format!("6:lengthi{}e", length).as_bytes());
        data.extend_from_slice(format!("4:name{}:{}", name.len(), name).as_bytes());
        data.extend_from_slice(format!("12:piece lengthi{}e", piece_length).as_bytes());
        data.extend_from_slice(format!("6:pieces{}:", pieces.len()).as_bytes());
        data.extend_from_slice(pieces);
        data.extend_from_slice(b"ee");
        data
    }

    #[test]
    fn test_parse_single_file_torrent() {
        let pieces = vec![0u8; 40];
        let data = torrent_bytes("file.bin", 16384, 20000, &pieces);
        let torrent = TorrentParser::parse_bytes(&data).unwrap();

        assert_eq!(torrent.info.name, "file.bin");
        assert_eq!(torrent.info.piece_length, 16384);
        assert_eq!(torrent.piece_count(), 2);
        assert_eq!(torrent.size, 20000);
        assert_eq!(torrent.piece_size(1), Some(3616));
        assert_eq!(torrent.comment.as_deref(), Some("test"));
        assert_eq!(
            torrent.announce_urls,
            vec!["http://tracker.example.com/ann".to_string()]
        );
        assert!(!torrent.is_multi_file());
        assert!(!torrent.is_private());
    }

    #[test]
    fn test_info_hash_is_deterministic() {
        let pieces = vec![7u8; 20];
        let data = torrent_bytes("a", 16384, 100, &pieces);
        let first = TorrentParser::parse_bytes(&data).unwrap();
        let second = TorrentParser::parse_bytes(&data).unwrap();
        assert_eq!(first.info_hash, second.info_hash);
    }

    #[test]
    fn test_info_hash_ignores_bytes_outside_info() {
        let pieces = vec![7u8; 20];
        let mut data = torrent_bytes("a", 16384, 100, &pieces);
        let baseline = TorrentParser::parse_bytes(&data).unwrap();

        // Flip a byte inside the comment; the hash must not move.
        let comment_pos = data.windows(4).position(|w| w == b"test").unwrap();
        data[comment_pos] = b'x';
        let changed = TorrentParser::parse_bytes(&data).unwrap();
        assert_eq!(baseline.info_hash, changed.info_hash);
    }

    #[test]
    fn test_info_hash_tracks_bytes_inside_info() {
        let baseline =
            TorrentParser::parse_bytes(&torrent_bytes("a", 16384, 100, &[7u8; 20])).unwrap();
        let changed =
            TorrentParser::parse_bytes(&torrent_bytes("a", 16384, 100, &[8u8; 20])).unwrap();
        assert_ne!(baseline.info_hash, changed.info_hash);
    }

    #[test]
    fn test_info_hash_covers_unknown_keys() {
        // An info dict with a key this parser does not model must still
        // contribute that key to the hash.
        let pieces = [7u8; 20];
        let with_extra = {
            let mut data = Vec::new();
            data.extend_from_slice(b"d8:announce3:url4:infod");
            data.extend_from_slice(b"6:lengthi100e");
            data.extend_from_slice(b"4:name1:a");
            data.extend_from_slice(b"12:piece lengthi16384e");
            data.extend_from_slice(b"6:pieces20:");
            data.extend_from_slice(&pieces);
            data.extend_from_slice(b"6:sourcei1e");
            data.extend_from_slice(b"ee");
            data
        };
        let without_extra = {
            let mut data = Vec::new();
            data.extend_from_slice(b"d8:announce3:url4:infod");
            data.extend_from_slice(b"6:lengthi100e");
            data.extend_from_slice(b"4:name1:a");
            data.extend_from_slice(b"12:piece lengthi16384e");
            data.extend_from_slice(b"6:pieces20:");
            data.extend_from_slice(&pieces);
            data.extend_from_slice(b"ee");
            data
        };

        let a = TorrentParser::parse_bytes(&with_extra).unwrap();
        let b = TorrentParser::parse_bytes(&without_extra).unwrap();
        assert_ne!(a.info_hash, b.info_hash);
    }

    #[test]
    fn test_parse_multi_file_torrent() {
        let mut data = Vec::new();
        data.extend_from_slice(b"d8:announce3:url4:infod");
        data.extend_from_slice(b"5:filesl");
        data.extend_from_slice(b"d6:lengthi500e4:pathl4:dir18:file.txtee");
        data.extend_from_slice(b"d6:lengthi524e6:md5sum3:abc4:pathl5:otheree");
        data.extend_from_slice(b"e");
        data.extend_from_slice(b"4:name5:multi");
        data.extend_from_slice(b"12:piece lengthi16384e");
        data.extend_from_slice(b"6:pieces20:");
        data.extend_from_slice(&[0u8; 20]);
        data.extend_from_slice(b"ee");

        let torrent = TorrentParser::parse_bytes(&data).unwrap();
        assert!(torrent.is_multi_file());
        assert_eq!(torrent.size, 1024);

        let files = torrent.info.files.as_ref().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, vec!["dir1", "file.txt"]);
        assert_eq!(files[0].md5sum, None);
        assert_eq!(files[1].md5sum.as_deref(), Some("abc"));
    }

    #[test]
    fn test_announce_list_union_dedup() {
        let mut data = Vec::new();
        data.extend_from_slice(b"d8:announce5:url-a13:announce-listll5:url-a5:url-bel5:url-cee");
        data.extend_from_slice(b"4:infod");
        data.extend_from_slice(b"6:lengthi100e4:name1:a12:piece lengthi16384e6:pieces20:");
        data.extend_from_slice(&[0u8; 20]);
        data.extend_from_slice(b"ee");

        let torrent = TorrentParser::parse_bytes(&data).unwrap();
        assert_eq!(torrent.announce_urls, vec!["url-a", "url-b", "url-c"]);
    }

    #[test]
    fn test_missing_announce_is_fatal() {
        let mut data = Vec::new();
        data.extend_from_slice(b"d4:infod");
        data.extend_from_slice(b"6:lengthi100e4:name1:a12:piece lengthi16384e6:pieces20:");
        data.extend_from_slice(&[0u8; 20]);
        data.extend_from_slice(b"ee");

        assert!(TorrentParser::parse_bytes(&data).is_err());
    }

    #[test]
    fn test_pieces_not_multiple_of_20_is_fatal() {
        let data = torrent_bytes("a", 16384, 100, &[0u8; 21]);
        assert!(TorrentParser::parse_bytes(&data).is_err());
    }

    #[test]
    fn test_missing_info_is_fatal() {
        assert!(TorrentParser::parse_bytes(b"d8:announce3:urle").is_err());
    }

    #[test]
    fn test_top_level_not_dict_is_fatal() {
        assert!(TorrentParser::parse_bytes(b"l3:urle").is_err());
    }

    #[test]
    fn test_private_flag() {
        let mut data = Vec::new();
        data.extend_from_slice(b"d8:announce3:url4:infod");
        data.extend_from_slice(b"6:lengthi100e4:name1:a12:piece lengthi16384e6:pieces20:");
        data.extend_from_slice(&[0u8; 20]);
        data.extend_from_slice(b"7:privatei1e");
        data.extend_from_slice(b"ee");

        let torrent = TorrentParser::parse_bytes(&data).unwrap();
        assert!(torrent.is_private());
    }
}
