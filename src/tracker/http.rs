//! HTTP tracker client
//!
//! Implements the announce capability over HTTP GET with a bencoded
//! response body.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};
use url::Url;
use urlencoding::encode_binary;

use super::{AnnounceEvent, AnnounceParams, AnnounceResponse, TrackerClient, TrackerPeer};
use crate::bencode::{self, BencodeValue};
use crate::error::TorrentError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Bytes of an error response body kept for diagnostics
const MAX_ERROR_BODY: usize = 1024;

/// Compact peer encoding: 4-byte IPv4 + 2-byte big-endian port
const COMPACT_PEER_SIZE: usize = 6;

/// HTTP-based implementation of the announce capability
#[derive(Debug)]
pub struct HttpTracker {
    announce_url: Url,
    client: reqwest::Client,
}

impl HttpTracker {
    /// Create a client for an `http`/`https` announce URL
    pub fn new(announce_url: Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| {
                TorrentError::tracker_error_full(
                    "Failed to build HTTP client",
                    announce_url.as_str(),
                    e.to_string(),
                )
            })?;

        Ok(Self { announce_url, client })
    }

    /// Build the announce URL with all query parameters
    ///
    /// `info_hash` and `peer_id` are raw 20-byte values and must be
    /// percent-encoded byte-wise; they are not valid UTF-8.
    fn build_announce_url(&self, params: &AnnounceParams) -> Url {
        let mut query = String::new();
        if let Some(existing) = self.announce_url.query() {
            query.push_str(existing);
            query.push('&');
        }

        query.push_str(&format!(
            "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
            encode_binary(&params.info_hash),
            encode_binary(&params.peer_id),
            params.port,
            params.uploaded,
            params.downloaded,
            params.left,
        ));

        if params.event != AnnounceEvent::None {
            query.push_str("&event=");
            query.push_str(params.event.as_str());
        }

        let mut url = self.announce_url.clone();
        url.set_query(Some(&query));
        url
    }
}

#[async_trait]
impl TrackerClient for HttpTracker {
    async fn announce(&self, params: &AnnounceParams) -> Result<AnnounceResponse> {
        let url = self.build_announce_url(params);
        debug!("Announcing to tracker: {}", self.announce_url);

        let response = self.client.get(url).send().await.map_err(|e| {
            TorrentError::tracker_error_full(
                "Announce request failed",
                self.announce_url.as_str(),
                e.to_string(),
            )
        })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| {
            TorrentError::tracker_error_full(
                "Failed to read announce response",
                self.announce_url.as_str(),
                e.to_string(),
            )
        })?;

        if !status.is_success() {
            let snippet = String::from_utf8_lossy(&body[..body.len().min(MAX_ERROR_BODY)]).to_string();
            return Err(TorrentError::tracker_error_full(
                format!("Tracker returned non-OK status {}", status.as_u16()),
                self.announce_url.as_str(),
                snippet,
            )
            .into());
        }

        parse_tracker_response(&body)
    }

    fn url(&self) -> &str {
        self.announce_url.as_str()
    }
}

/// Decode a bencoded announce response body
pub fn parse_tracker_response(data: &[u8]) -> Result<AnnounceResponse> {
    let value = bencode::decode(data)
        .map_err(|e| TorrentError::tracker_error_full("Malformed announce response", "", e.to_string()))?;
    let dict = value
        .as_dict()
        .ok_or_else(|| TorrentError::tracker_error("Announce response is not a dictionary"))?;

    // A failure reason is terminal for the attempt regardless of any other
    // fields the tracker included.
    if let Some(failure) = dict.get(b"failure reason".as_slice()).and_then(|v| v.as_str()) {
        return Err(TorrentError::tracker_error(failure).into());
    }

    if let Some(warning) = dict.get(b"warning message".as_slice()).and_then(|v| v.as_str()) {
        warn!("Tracker warning: {}", warning);
    }

    let get_u32 = |key: &[u8]| -> Option<u32> {
        dict.get(key).and_then(|v| v.as_integer()).map(|i| i as u32)
    };

    let interval = get_u32(b"interval").ok_or_else(|| {
        TorrentError::tracker_error("Announce response missing or invalid 'interval'")
    })?;

    let peers = match dict.get(b"peers".as_slice()) {
        // Trackers commonly omit 'peers' when there are none.
        None => Vec::new(),
        Some(BencodeValue::Bytes(blob)) => parse_compact_peers(blob)?,
        Some(BencodeValue::List(entries)) => parse_dict_peers(entries)?,
        Some(other) => {
            return Err(TorrentError::tracker_error_full(
                "Invalid 'peers' format: expected string or list",
                "",
                format!("{:?}", other),
            )
            .into())
        }
    };

    Ok(AnnounceResponse {
        interval,
        min_interval: get_u32(b"min interval").unwrap_or(0),
        seeders: get_u32(b"complete").unwrap_or(0),
        leechers: get_u32(b"incomplete").unwrap_or(0),
        tracker_id: dict
            .get(b"tracker id".as_slice())
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        peers,
    })
}

/// Decode the compact peer format: 6 bytes per peer
fn parse_compact_peers(blob: &[u8]) -> Result<Vec<TrackerPeer>> {
    if blob.len() % COMPACT_PEER_SIZE != 0 {
        return Err(TorrentError::tracker_error_full(
            "Invalid compact peer list length",
            "",
            blob.len().to_string(),
        )
        .into());
    }

    Ok(blob
        .chunks_exact(COMPACT_PEER_SIZE)
        .map(|chunk| TrackerPeer {
            ip: IpAddr::V4(Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3])),
            port: u16::from_be_bytes([chunk[4], chunk[5]]),
            id: None,
        })
        .collect())
}

/// Decode the dictionary peer format
fn parse_dict_peers(entries: &[BencodeValue]) -> Result<Vec<TrackerPeer>> {
    let mut peers = Vec::with_capacity(entries.len());

    for (i, entry) in entries.iter().enumerate() {
        let peer_dict = entry.as_dict().ok_or_else(|| {
            TorrentError::tracker_error_full("Peer entry is not a dictionary", "", i.to_string())
        })?;

        let ip_str = peer_dict
            .get(b"ip".as_slice())
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                TorrentError::tracker_error_full(
                    "Missing or invalid 'ip' in peer entry",
                    "",
                    i.to_string(),
                )
            })?;
        let ip: IpAddr = ip_str.parse().map_err(|_| {
            TorrentError::tracker_error_full("Invalid IP address in peer entry", "", ip_str.to_string())
        })?;

        let port = peer_dict
            .get(b"port".as_slice())
            .and_then(|v| v.as_integer())
            .ok_or_else(|| {
                TorrentError::tracker_error_full(
                    "Missing or invalid 'port' in peer entry",
                    "",
                    i.to_string(),
                )
            })? as u16;

        peers.push(TrackerPeer {
            ip,
            port,
            id: peer_dict
                .get(b"peer id".as_slice())
                .and_then(|v| v.as_str())
                .map(String::from),
        });
    }

    Ok(peers)
}
