//! Peer management module
//!
//! Handles dialing peers, the handshake, and the per-connection read loop.

pub mod connection;
pub mod state;

pub use connection::{
    connect_to_peers, PeerConnectOpts, PeerConnection, PeerHandle, PeerReaderContext,
};
pub use state::Peer;
