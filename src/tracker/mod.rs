//! Tracker protocol module
//!
//! Defines the announce capability, its request/response types, and
//! scheme-based construction of concrete tracker clients.

pub mod http;

use std::net::{IpAddr, SocketAddr};

use anyhow::Result;
use async_trait::async_trait;
use url::Url;

use crate::error::TorrentError;

pub use http::HttpTracker;

/// Lifecycle event reported to the tracker with an announce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceEvent {
    /// Steady-state announce; the `event` parameter is omitted
    None,
    Started,
    Completed,
    Stopped,
}

impl AnnounceEvent {
    /// The wire representation of the event (empty for `None`)
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnounceEvent::None => "",
            AnnounceEvent::Started => "started",
            AnnounceEvent::Completed => "completed",
            AnnounceEvent::Stopped => "stopped",
        }
    }
}

/// All the fields a tracker needs for one announce
#[derive(Debug, Clone)]
pub struct AnnounceParams {
    /// SHA1 hash of the info dictionary
    pub info_hash: [u8; 20],
    /// Our 20-byte peer id
    pub peer_id: [u8; 20],
    /// Port on which we accept peer connections
    pub port: u16,
    /// Bytes uploaded so far
    pub uploaded: u64,
    /// Bytes downloaded so far
    pub downloaded: u64,
    /// Bytes left to download
    pub left: u64,
    /// Current lifecycle event
    pub event: AnnounceEvent,
}

/// One peer endpoint reported by the tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerPeer {
    /// IP address of the peer
    pub ip: IpAddr,
    /// Port on which the peer listens
    pub port: u16,
    /// Peer identifier (absent in compact responses)
    pub id: Option<String>,
}

impl TrackerPeer {
    /// The peer's dialable socket address
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

/// What the tracker returns on a successful announce
#[derive(Debug, Clone, Default)]
pub struct AnnounceResponse {
    /// Seconds until the next regular announce
    pub interval: u32,
    /// Minimum announce interval, zero when the tracker omits it
    pub min_interval: u32,
    /// Clients seeding this torrent
    pub seeders: u32,
    /// Clients downloading this torrent
    pub leechers: u32,
    /// Tracker-assigned identifier, empty when omitted
    pub tracker_id: String,
    /// Active peers
    pub peers: Vec<TrackerPeer>,
}

/// The announce capability, polymorphic over transport
#[async_trait]
pub trait TrackerClient: Send + Sync + std::fmt::Debug {
    /// Send the client's state to the tracker and return its response
    async fn announce(&self, params: &AnnounceParams) -> Result<AnnounceResponse>;

    /// The announce URL this client talks to
    fn url(&self) -> &str;
}

/// Build a tracker client for an announce URL
///
/// Dispatches on the URL scheme; only `http` and `https` are implemented.
pub fn create_tracker_client(announce: &str) -> Result<Box<dyn TrackerClient>> {
    let url = Url::parse(announce).map_err(|e| {
        TorrentError::tracker_error_full("Invalid announce URL", announce, e.to_string())
    })?;

    match url.scheme() {
        "http" | "https" => Ok(Box::new(HttpTracker::new(url)?)),
        scheme => Err(TorrentError::config_error_with_field(
            "Unsupported tracker protocol",
            scheme,
        )
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_strings() {
        assert_eq!(AnnounceEvent::None.as_str(), "");
        assert_eq!(AnnounceEvent::Started.as_str(), "started");
        assert_eq!(AnnounceEvent::Completed.as_str(), "completed");
        assert_eq!(AnnounceEvent::Stopped.as_str(), "stopped");
    }

    #[test]
    fn test_create_tracker_client_http() {
        let client = create_tracker_client("http://tracker.example.com/announce").unwrap();
        assert_eq!(client.url(), "http://tracker.example.com/announce");
    }

    #[test]
    fn test_create_tracker_client_https() {
        assert!(create_tracker_client("https://tracker.example.com/announce").is_ok());
    }

    #[test]
    fn test_create_tracker_client_unsupported_scheme() {
        let err = create_tracker_client("udp://tracker.example.com:6969").unwrap_err();
        assert!(err.to_string().contains("Unsupported tracker protocol"));
    }

    #[test]
    fn test_create_tracker_client_invalid_url() {
        assert!(create_tracker_client("not a url").is_err());
    }

    #[test]
    fn test_tracker_peer_socket_addr() {
        let peer = TrackerPeer {
            ip: "127.0.0.1".parse().unwrap(),
            port: 6881,
            id: None,
        };
        assert_eq!(peer.socket_addr().to_string(), "127.0.0.1:6881");
    }
}
