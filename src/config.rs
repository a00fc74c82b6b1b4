//! Engine configuration module
//!
//! Tunables for timeouts, scheduling intervals, and connection limits.
//! The embedding application (CLI, UI) builds one of these and hands it to
//! the client.

use std::time::Duration;

use anyhow::Result;

use crate::error::TorrentError;

/// Configuration for the torrent engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Port advertised to trackers for incoming peer connections
    pub listen_port: u16,
    /// Bound on dialing a peer
    pub connect_timeout: Duration,
    /// Bound on the handshake exchange after connecting
    pub handshake_timeout: Duration,
    /// A peer that stays silent this long is treated as dead
    pub idle_timeout: Duration,
    /// Re-announce interval used until a tracker supplies one
    pub default_announce_interval: Duration,
    /// Upper bound on the backoff between announces to a failing tracker
    pub max_announce_interval: Duration,
    /// Maximum number of connected peers per session
    pub max_peers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listen_port: 6881,
            connect_timeout: Duration::from_secs(3),
            handshake_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(120),
            default_announce_interval: Duration::from_secs(30 * 60),
            max_announce_interval: Duration::from_secs(4 * 60 * 60),
            max_peers: 50,
        }
    }
}

impl EngineConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.listen_port == 0 {
            return Err(
                TorrentError::config_error_with_field("Listen port cannot be 0", "listen_port")
                    .into(),
            );
        }

        if self.max_peers == 0 {
            return Err(
                TorrentError::config_error_with_field("Max peers cannot be 0", "max_peers").into(),
            );
        }

        if self.default_announce_interval.is_zero() {
            return Err(TorrentError::config_error_with_field(
                "Default announce interval cannot be zero",
                "default_announce_interval",
            )
            .into());
        }

        if self.max_announce_interval < self.default_announce_interval {
            return Err(TorrentError::config_error_with_field(
                "Max announce interval is below the default interval",
                "max_announce_interval",
            )
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_port_rejected() {
        let config = EngineConfig { listen_port: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_max_peers_rejected() {
        let config = EngineConfig { max_peers: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_interval_below_default_rejected() {
        let config = EngineConfig {
            max_announce_interval: Duration::from_secs(60),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
