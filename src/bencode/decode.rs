//! Bencode decoding.
use super::{BencodeError, Result, Value};
use std::collections::BTreeMap;

/// Decodes the value starting at `bytes[offset..]`, returning the value and
/// the absolute offset of the first byte past it.
pub(super) fn decode_value(bytes: &[u8], offset: usize) -> Result<(Value, usize)> {
    let &tag = bytes
        .get(offset)
        .ok_or(BencodeError::UnexpectedEof(offset))?;
    match tag {
        b'i' => decode_integer(bytes, offset).map(|(i, end)| (Value::Int(i), end)),
        b'l' => decode_list(bytes, offset),
        b'd' => decode_dict(bytes, offset),
        b'0'..=b'9' => decode_bytes(bytes, offset).map(|(s, end)| (Value::Bytes(s), end)),
        _ => Err(BencodeError::UnknownTag { tag, offset }),
    }
}

fn decode_integer(bytes: &[u8], offset: usize) -> Result<(i64, usize)> {
    debug_assert_eq!(bytes[offset], b'i');
    let start = offset + 1;
    let end = find(bytes, b'e', start).ok_or(BencodeError::UnexpectedEof(start))?;
    let digits = &bytes[start..end];
    validate_integer_digits(digits, offset)?;
    let text =
        std::str::from_utf8(digits).map_err(|_| BencodeError::InvalidInteger(offset))?;
    let value = text
        .parse::<i64>()
        .map_err(|_| BencodeError::InvalidInteger(offset))?;
    Ok((value, end + 1))
}

fn validate_integer_digits(digits: &[u8], offset: usize) -> Result<()> {
    if digits.is_empty() {
        return Err(BencodeError::InvalidInteger(offset));
    }
    let (sign, rest) = match digits.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, digits),
    };
    if rest.is_empty() || !rest.iter().all(u8::is_ascii_digit) {
        return Err(BencodeError::InvalidInteger(offset));
    }
    if rest.len() > 1 && rest[0] == b'0' {
        // leading zero, e.g. "i03e" or "i-03e"
        return Err(BencodeError::InvalidInteger(offset));
    }
    if sign && rest == b"0" {
        // "-0" is disallowed
        return Err(BencodeError::InvalidInteger(offset));
    }
    Ok(())
}

fn decode_bytes(bytes: &[u8], offset: usize) -> Result<(Vec<u8>, usize)> {
    let colon = find(bytes, b':', offset).ok_or(BencodeError::InvalidStringLength(offset))?;
    let len_digits = &bytes[offset..colon];
    if len_digits.is_empty()
        || !len_digits.iter().all(u8::is_ascii_digit)
        || (len_digits.len() > 1 && len_digits[0] == b'0')
    {
        return Err(BencodeError::InvalidStringLength(offset));
    }
    let len: usize = std::str::from_utf8(len_digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(BencodeError::InvalidStringLength(offset))?;
    let start = colon + 1;
    let end = start
        .checked_add(len)
        .ok_or(BencodeError::InvalidStringLength(offset))?;
    if end > bytes.len() {
        return Err(BencodeError::UnexpectedEof(offset));
    }
    Ok((bytes[start..end].to_vec(), end))
}

fn decode_list(bytes: &[u8], offset: usize) -> Result<(Value, usize)> {
    debug_assert_eq!(bytes[offset], b'l');
    let mut pos = offset + 1;
    let mut items = Vec::new();
    loop {
        match bytes.get(pos) {
            None => return Err(BencodeError::UnexpectedEof(pos)),
            Some(b'e') => return Ok((Value::List(items), pos + 1)),
            Some(_) => {
                let (value, next) = decode_value(bytes, pos)?;
                items.push(value);
                pos = next;
            }
        }
    }
}

fn decode_dict(bytes: &[u8], offset: usize) -> Result<(Value, usize)> {
    debug_assert_eq!(bytes[offset], b'd');
    let mut pos = offset + 1;
    let mut map = BTreeMap::new();
    let mut last_key: Option<Vec<u8>> = None;
    loop {
        match bytes.get(pos) {
            None => return Err(BencodeError::UnexpectedEof(pos)),
            Some(b'e') => return Ok((Value::Dict(map), pos + 1)),
            Some(b'0'..=b'9') => {
                let key_offset = pos;
                let (key, after_key) = decode_bytes(bytes, pos)?;
                if let Some(prev) = &last_key {
                    if key <= *prev {
                        return Err(if key == *prev {
                            BencodeError::DuplicateKey(key_offset)
                        } else {
                            BencodeError::KeysOutOfOrder(key_offset)
                        });
                    }
                }
                let (value, after_value) = decode_value(bytes, after_key)?;
                last_key = Some(key.clone());
                map.insert(key, value);
                pos = after_value;
            }
            Some(_) => return Err(BencodeError::NonStringKey(pos)),
        }
    }
}

fn find(bytes: &[u8], needle: u8, from: usize) -> Option<usize> {
    bytes[from..].iter().position(|&b| b == needle).map(|p| p + from)
}

/// Scans the top-level dictionary in `bytes` for `key` and returns the byte
/// span `[start, end)` of its *raw, still-encoded* value, without decoding
/// that value into a [`super::Value`].
///
/// This exists so the metainfo parser can hash the exact source bytes of
/// the `info` sub-dictionary rather than a re-encoding of it: the format
/// only guarantees a stable hash if we never round-trip through our own
/// `Value` representation for that purpose.
pub(crate) fn find_top_level_value_span(
    bytes: &[u8],
    key: &[u8],
) -> Result<Option<(usize, usize)>> {
    if bytes.first() != Some(&b'd') {
        return Err(BencodeError::UnknownTag {
            tag: *bytes.first().unwrap_or(&0),
            offset: 0,
        });
    }
    let mut pos = 1;
    loop {
        match bytes.get(pos) {
            None => return Err(BencodeError::UnexpectedEof(pos)),
            Some(b'e') => return Ok(None),
            Some(b'0'..=b'9') => {
                let (found_key, after_key) = decode_bytes(bytes, pos)?;
                let (_, after_value) = decode_value(bytes, after_key)?;
                if found_key == key {
                    return Ok(Some((after_key, after_value)));
                }
                pos = after_value;
            }
            Some(_) => return Err(BencodeError::NonStringKey(pos)),
        }
    }
}
