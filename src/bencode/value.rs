//! Bencode value tree
//!
//! The decoded representation of any bencoded document.

use std::collections::BTreeMap;

/// A single bencode value
///
/// Dictionaries are keyed on raw byte strings in a `BTreeMap`, so encoding
/// always emits keys in ascending byte order. That ordering is what makes
/// the re-encoding of an info dictionary canonical, and therefore what makes
/// info hashes match across clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BencodeValue {
    /// Signed 64-bit integer (`i...e`)
    Integer(i64),
    /// Raw byte string (`<len>:<bytes>`)
    Bytes(Vec<u8>),
    /// Ordered sequence (`l...e`)
    List(Vec<BencodeValue>),
    /// Byte-string-keyed mapping (`d...e`)
    Dict(BTreeMap<Vec<u8>, BencodeValue>),
}

impl BencodeValue {
    /// Get the integer value, if this is an integer
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            BencodeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get the raw bytes, if this is a byte string
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BencodeValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get the byte string as UTF-8, if this is a valid UTF-8 byte string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            BencodeValue::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Get the element list, if this is a list
    pub fn as_list(&self) -> Option<&[BencodeValue]> {
        match self {
            BencodeValue::List(l) => Some(l),
            _ => None,
        }
    }

    /// Get the mapping, if this is a dictionary
    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, BencodeValue>> {
        match self {
            BencodeValue::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Convenience constructor for a byte-string value
    pub fn bytes(b: impl Into<Vec<u8>>) -> Self {
        BencodeValue::Bytes(b.into())
    }
}
