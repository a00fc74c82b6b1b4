//! Bencode encoder
//!
//! Produces the canonical encoding of a value tree. Dictionary keys are
//! emitted in ascending byte order, which the `BTreeMap` representation
//! guarantees structurally, so encoding cannot fail.

use super::value::BencodeValue;

/// Encode a value into the provided buffer
pub fn encode(value: &BencodeValue, buf: &mut Vec<u8>) {
    match value {
        BencodeValue::Integer(i) => {
            buf.push(b'i');
            buf.extend_from_slice(i.to_string().as_bytes());
            buf.push(b'e');
        }
        BencodeValue::Bytes(bytes) => {
            buf.extend_from_slice(bytes.len().to_string().as_bytes());
            buf.push(b':');
            buf.extend_from_slice(bytes);
        }
        BencodeValue::List(items) => {
            buf.push(b'l');
            for item in items {
                encode(item, buf);
            }
            buf.push(b'e');
        }
        BencodeValue::Dict(dict) => {
            buf.push(b'd');
            // BTreeMap iteration order is the canonical key order.
            for (key, val) in dict {
                buf.extend_from_slice(key.len().to_string().as_bytes());
                buf.push(b':');
                buf.extend_from_slice(key);
                encode(val, buf);
            }
            buf.push(b'e');
        }
    }
}

/// Encode a value into a fresh byte vector
pub fn to_bytes(value: &BencodeValue) -> Vec<u8> {
    let mut buf = Vec::new();
    encode(value, &mut buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_encode_integer() {
        assert_eq!(to_bytes(&BencodeValue::Integer(42)), b"i42e");
        assert_eq!(to_bytes(&BencodeValue::Integer(-7)), b"i-7e");
        assert_eq!(to_bytes(&BencodeValue::Integer(0)), b"i0e");
    }

    #[test]
    fn test_encode_bytes() {
        assert_eq!(to_bytes(&BencodeValue::bytes("spam")), b"4:spam");
        assert_eq!(to_bytes(&BencodeValue::bytes("")), b"0:");
    }

    #[test]
    fn test_encode_list() {
        let list = BencodeValue::List(vec![
            BencodeValue::bytes("spam"),
            BencodeValue::Integer(42),
        ]);
        assert_eq!(to_bytes(&list), b"l4:spami42ee");
    }

    #[test]
    fn test_encode_dict_sorts_keys() {
        // Insert out of order; the encoding must still be key-sorted.
        let mut dict = BTreeMap::new();
        dict.insert(b"foo".to_vec(), BencodeValue::bytes("bar"));
        dict.insert(b"bar".to_vec(), BencodeValue::bytes("baz"));
        dict.insert(b"abc".to_vec(), BencodeValue::Integer(1));
        let encoded = to_bytes(&BencodeValue::Dict(dict));
        assert_eq!(encoded, b"d3:abci1e3:bar3:baz3:foo3:bare");
    }

    #[test]
    fn test_encode_nested() {
        let mut inner = BTreeMap::new();
        inner.insert(b"k".to_vec(), BencodeValue::List(vec![BencodeValue::Integer(1)]));
        let value = BencodeValue::Dict(inner);
        assert_eq!(to_bytes(&value), b"d1:kli1eee");
    }
}
