//! Bencode: the self-describing binary encoding used by metainfo files and
//! tracker responses.
//!
//! A [`Value`] is a plain tagged union over the four bencoded types rather
//! than a trait-object hierarchy: the format only ever has four shapes, so
//! dynamic dispatch would buy nothing here.
use std::collections::BTreeMap;
use thiserror::Error;

pub mod decode;
pub mod encode;

#[cfg(test)]
mod tests;

/// A decoded bencode value.
///
/// Dictionary keys are stored in a `BTreeMap` rather than a `HashMap` so
/// that iterating a decoded value for re-encoding always walks keys in
/// sorted order, which is what the format requires on encode. This also
/// means a `Dict` built in memory (e.g. for a tracker request) is always
/// encoded in canonical order without a separate sort pass.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Value {
    Bytes(Vec<u8>),
    Int(i64),
    List(Vec<Value>),
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn str(s: &str) -> Value {
        Value::Bytes(s.as_bytes().to_vec())
    }

    /// Convenience constructor for building request dictionaries.
    pub fn dict(entries: impl IntoIterator<Item = (&'static str, Value)>) -> Value {
        let mut map = BTreeMap::new();
        for (k, v) in entries {
            map.insert(k.as_bytes().to_vec(), v);
        }
        Value::Dict(map)
    }
}

/// Errors produced while decoding or encoding a bencoded value.
///
/// Decode errors carry the byte offset of the first offending byte so
/// callers can report useful diagnostics about malformed `.torrent` files
/// or tracker responses.
#[derive(Debug, Error)]
pub enum BencodeError {
    #[error("unexpected end of input at offset {0}")]
    UnexpectedEof(usize),

    #[error("invalid integer at offset {0}")]
    InvalidInteger(usize),

    #[error("invalid string length at offset {0}")]
    InvalidStringLength(usize),

    #[error("unknown value tag {tag:?} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },

    #[error("dictionary keys out of order at offset {0}")]
    KeysOutOfOrder(usize),

    #[error("duplicate dictionary key at offset {0}")]
    DuplicateKey(usize),

    #[error("trailing garbage after value at offset {0}")]
    TrailingData(usize),

    #[error("dictionary key is not a byte-string at offset {0}")]
    NonStringKey(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BencodeError>;

/// Decodes a single bencoded value from the start of `bytes`.
///
/// Returns the decoded value along with the number of bytes consumed.
/// Does not require the input to be exhausted; use [`decode_all`] for
/// strict, single-value inputs such as a whole `.torrent` file.
pub fn decode(bytes: &[u8]) -> Result<(Value, usize)> {
    decode::decode_value(bytes, 0)
}

/// Decodes `bytes` as exactly one bencoded value, rejecting trailing data.
pub fn decode_all(bytes: &[u8]) -> Result<Value> {
    let (value, consumed) = decode(bytes)?;
    if consumed != bytes.len() {
        return Err(BencodeError::TrailingData(consumed));
    }
    Ok(value)
}

/// Encodes `value` into its canonical bencoded byte representation.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode::encode_value(value, &mut buf);
    buf
}

/// Returns the raw, still-encoded byte span of `key`'s value within the
/// top-level dictionary in `bytes`, or `None` if the key is absent.
///
/// See [`decode::find_top_level_value_span`] for why this exists.
pub fn find_top_level_value_span(bytes: &[u8], key: &[u8]) -> Result<Option<(usize, usize)>> {
    decode::find_top_level_value_span(bytes, key)
}
