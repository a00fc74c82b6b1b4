//! BitTorrent protocol module
//!
//! Implements the peer wire protocol: handshake and framed messages.

pub mod handshake;
pub mod message;
pub mod wire;

pub use handshake::{Handshake, HANDSHAKE_LENGTH, PROTOCOL_STRING};
pub use message::{Message, MessageId};
pub use wire::{read_handshake, read_message, write_handshake, write_message};
