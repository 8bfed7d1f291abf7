//! Bencode encoding.
use super::Value;
use std::io::Write;

pub(super) fn encode_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Bytes(b) => encode_bytes(b, out),
        Value::Int(i) => encode_integer(*i, out),
        Value::List(items) => {
            out.push(b'l');
            for item in items {
                encode_value(item, out);
            }
            out.push(b'e');
        }
        Value::Dict(map) => {
            out.push(b'd');
            // BTreeMap iterates in sorted key order already, matching the
            // format's canonical ordering requirement.
            for (key, val) in map {
                encode_bytes(key, out);
                encode_value(val, out);
            }
            out.push(b'e');
        }
    }
}

fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    write!(out, "{}:", bytes.len()).expect("write to Vec<u8> cannot fail");
    out.extend_from_slice(bytes);
}

fn encode_integer(value: i64, out: &mut Vec<u8>) {
    write!(out, "i{}e", value).expect("write to Vec<u8> cannot fail");
}
