//! Error types for the torrent engine
//!
//! This module defines the error type shared by all components of the
//! engine, covering format, transport, protocol-integrity, and
//! semantic/config failures.

use std::fmt;

/// Comprehensive error type for engine operations
#[derive(Debug, Clone)]
pub enum TorrentError {
    /// Malformed bencode or torrent metadata
    ParseError {
        message: String,
        source: Option<String>,
    },

    /// BitTorrent wire protocol errors (framing, handshake)
    ProtocolError {
        message: String,
        source: Option<String>,
    },

    /// Peer connection errors
    PeerError {
        message: String,
        peer: Option<String>,
        source: Option<String>,
    },

    /// Tracker announce errors
    TrackerError {
        message: String,
        url: Option<String>,
        source: Option<String>,
    },

    /// Session lifecycle errors
    SessionError {
        message: String,
        info_hash: Option<String>,
    },

    /// Network errors
    NetworkError {
        message: String,
        address: Option<String>,
        source: Option<String>,
    },

    /// Configuration errors
    ConfigError {
        message: String,
        field: Option<String>,
    },

    /// Validation errors
    ValidationError {
        message: String,
        field: Option<String>,
    },
}

impl TorrentError {
    /// Create a new ParseError
    pub fn parse_error(message: impl Into<String>) -> Self {
        TorrentError::ParseError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new ParseError with source
    pub fn parse_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::ParseError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new ProtocolError
    pub fn protocol_error(message: impl Into<String>) -> Self {
        TorrentError::ProtocolError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new ProtocolError with source
    pub fn protocol_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::ProtocolError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new PeerError
    pub fn peer_error(message: impl Into<String>) -> Self {
        TorrentError::PeerError {
            message: message.into(),
            peer: None,
            source: None,
        }
    }

    /// Create a new PeerError with peer address
    pub fn peer_error_with_peer(message: impl Into<String>, peer: impl Into<String>) -> Self {
        TorrentError::PeerError {
            message: message.into(),
            peer: Some(peer.into()),
            source: None,
        }
    }

    /// Create a new PeerError with peer and source
    pub fn peer_error_full(
        message: impl Into<String>,
        peer: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        TorrentError::PeerError {
            message: message.into(),
            peer: Some(peer.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new TrackerError
    pub fn tracker_error(message: impl Into<String>) -> Self {
        TorrentError::TrackerError {
            message: message.into(),
            url: None,
            source: None,
        }
    }

    /// Create a new TrackerError with announce URL
    pub fn tracker_error_with_url(message: impl Into<String>, url: impl Into<String>) -> Self {
        TorrentError::TrackerError {
            message: message.into(),
            url: Some(url.into()),
            source: None,
        }
    }

    /// Create a new TrackerError with URL and source
    pub fn tracker_error_full(
        message: impl Into<String>,
        url: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        TorrentError::TrackerError {
            message: message.into(),
            url: Some(url.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new SessionError
    pub fn session_error(message: impl Into<String>) -> Self {
        TorrentError::SessionError {
            message: message.into(),
            info_hash: None,
        }
    }

    /// Create a new SessionError with the torrent's info hash
    pub fn session_error_with_hash(
        message: impl Into<String>,
        info_hash: impl Into<String>,
    ) -> Self {
        TorrentError::SessionError {
            message: message.into(),
            info_hash: Some(info_hash.into()),
        }
    }

    /// Create a new NetworkError
    pub fn network_error(message: impl Into<String>) -> Self {
        TorrentError::NetworkError {
            message: message.into(),
            address: None,
            source: None,
        }
    }

    /// Create a new NetworkError with address and source
    pub fn network_error_full(
        message: impl Into<String>,
        address: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        TorrentError::NetworkError {
            message: message.into(),
            address: Some(address.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new ConfigError
    pub fn config_error(message: impl Into<String>) -> Self {
        TorrentError::ConfigError {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new ConfigError with field
    pub fn config_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        TorrentError::ConfigError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new ValidationError
    pub fn validation_error(message: impl Into<String>) -> Self {
        TorrentError::ValidationError {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new ValidationError with field
    pub fn validation_error_with_field(
        message: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        TorrentError::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

fn write_with_parts(
    f: &mut fmt::Formatter<'_>,
    kind: &str,
    message: &str,
    parts: &[(&str, &Option<String>)],
) -> fmt::Result {
    write!(f, "{}: {}", kind, message)?;
    let present: Vec<String> = parts
        .iter()
        .filter_map(|(label, value)| value.as_ref().map(|v| format!("{}: {}", label, v)))
        .collect();
    if !present.is_empty() {
        write!(f, " ({})", present.join(", "))?;
    }
    Ok(())
}

impl fmt::Display for TorrentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TorrentError::ParseError { message, source } => {
                write_with_parts(f, "Parse error", message, &[("source", source)])
            }
            TorrentError::ProtocolError { message, source } => {
                write_with_parts(f, "Protocol error", message, &[("source", source)])
            }
            TorrentError::PeerError { message, peer, source } => write_with_parts(
                f,
                "Peer error",
                message,
                &[("peer", peer), ("source", source)],
            ),
            TorrentError::TrackerError { message, url, source } => write_with_parts(
                f,
                "Tracker error",
                message,
                &[("url", url), ("source", source)],
            ),
            TorrentError::SessionError { message, info_hash } => {
                write_with_parts(f, "Session error", message, &[("info_hash", info_hash)])
            }
            TorrentError::NetworkError { message, address, source } => write_with_parts(
                f,
                "Network error",
                message,
                &[("address", address), ("source", source)],
            ),
            TorrentError::ConfigError { message, field } => {
                write_with_parts(f, "Config error", message, &[("field", field)])
            }
            TorrentError::ValidationError { message, field } => {
                write_with_parts(f, "Validation error", message, &[("field", field)])
            }
        }
    }
}

impl std::error::Error for TorrentError {}

impl From<std::io::Error> for TorrentError {
    fn from(err: std::io::Error) -> Self {
        TorrentError::NetworkError {
            message: err.to_string(),
            address: None,
            source: Some(err.kind().to_string()),
        }
    }
}

impl From<std::net::AddrParseError> for TorrentError {
    fn from(err: std::net::AddrParseError) -> Self {
        TorrentError::network_error_full("Failed to parse address", "unknown", err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for TorrentError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        TorrentError::network_error("Operation timed out")
    }
}
