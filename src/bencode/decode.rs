//! Bencode decoder
//!
//! Streaming decoder over a byte slice. Each call to [`Decoder::decode_value`]
//! consumes exactly one value and leaves the cursor positioned immediately
//! after it, so callers can decode from the middle of a larger buffer.

use anyhow::Result;
use tracing::trace;

use super::value::BencodeValue;
use crate::error::TorrentError;

/// Decode one value from the start of `data`
///
/// Trailing bytes after the value are not an error; use [`Decoder`] directly
/// when the consumed length matters.
pub fn decode(data: &[u8]) -> Result<BencodeValue> {
    Decoder::new(data).decode_value()
}

/// Cursor-based bencode decoder
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    /// Create a decoder over a byte slice
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current cursor position (bytes consumed so far)
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes remaining after the cursor
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Decode exactly one value, advancing the cursor past it
    pub fn decode_value(&mut self) -> Result<BencodeValue> {
        let byte = self.peek()?;
        trace!("Decoding bencode value starting with {:?} at offset {}", byte as char, self.pos);

        match byte {
            b'i' => self.decode_integer(),
            b'l' => self.decode_list(),
            b'd' => self.decode_dict(),
            b'0'..=b'9' | b'-' => self.decode_bytes(),
            other => Err(TorrentError::parse_error_with_source(
                "Unrecognized bencode type",
                format!("byte 0x{:02x} at offset {}", other, self.pos),
            )
            .into()),
        }
    }

    fn peek(&self) -> Result<u8> {
        self.data.get(self.pos).copied().ok_or_else(|| {
            TorrentError::parse_error_with_source(
                "Unexpected end of data",
                format!("offset {}", self.pos),
            )
            .into()
        })
    }

    /// Read ASCII digits (with optional leading minus) up to `delim`,
    /// consuming the delimiter, and parse them as an i64.
    fn read_integer_until(&mut self, delim: u8) -> Result<i64> {
        let start = self.pos;
        let end = self.data[start..]
            .iter()
            .position(|&b| b == delim)
            .map(|p| start + p)
            .ok_or_else(|| {
                TorrentError::parse_error_with_source(
                    "Unterminated integer",
                    format!("missing {:?} after offset {}", delim as char, start),
                )
            })?;

        let digits = std::str::from_utf8(&self.data[start..end]).map_err(|e| {
            TorrentError::parse_error_with_source("Integer is not ASCII", e.to_string())
        })?;
        let value: i64 = digits.parse().map_err(|_| {
            TorrentError::parse_error_with_source("Malformed integer", digits.to_string())
        })?;

        self.pos = end + 1;
        Ok(value)
    }

    fn decode_integer(&mut self) -> Result<BencodeValue> {
        self.pos += 1; // skip 'i'
        let value = self.read_integer_until(b'e')?;
        Ok(BencodeValue::Integer(value))
    }

    fn decode_bytes(&mut self) -> Result<BencodeValue> {
        let length = self.read_integer_until(b':')?;
        if length < 0 {
            return Err(TorrentError::parse_error_with_source(
                "Negative string length",
                length.to_string(),
            )
            .into());
        }

        let length = length as usize;
        if self.remaining() < length {
            return Err(TorrentError::parse_error_with_source(
                "Truncated string payload",
                format!("need {} bytes, have {}", length, self.remaining()),
            )
            .into());
        }

        let bytes = self.data[self.pos..self.pos + length].to_vec();
        self.pos += length;
        Ok(BencodeValue::Bytes(bytes))
    }

    fn decode_list(&mut self) -> Result<BencodeValue> {
        self.pos += 1; // skip 'l'
        let mut items = Vec::new();

        while self.peek()? != b'e' {
            items.push(self.decode_value()?);
        }
        self.pos += 1; // skip 'e'

        Ok(BencodeValue::List(items))
    }

    fn decode_dict(&mut self) -> Result<BencodeValue> {
        self.pos += 1; // skip 'd'
        let mut dict = std::collections::BTreeMap::new();

        while self.peek()? != b'e' {
            let key = match self.decode_value()? {
                BencodeValue::Bytes(b) => b,
                other => {
                    return Err(TorrentError::parse_error_with_source(
                        "Dictionary key must be a byte string",
                        format!("{:?}", other),
                    )
                    .into())
                }
            };
            // A key with no following value hits end-of-data or a stray
            // terminator inside decode_value and errors there.
            let value = self.decode_value()?;
            dict.insert(key, value);
        }
        self.pos += 1; // skip 'e'

        Ok(BencodeValue::Dict(dict))
    }
}
