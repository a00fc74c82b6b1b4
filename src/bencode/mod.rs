//! Bencode codec module
//!
//! Implements the BitTorrent binary serialization format: integers, byte
//! strings, lists, and dictionaries with canonically sorted keys.

pub mod decode;
pub mod encode;
pub mod value;

pub use decode::{decode, Decoder};
pub use encode::{encode, to_bytes};
pub use value::BencodeValue;
