use super::*;

#[test]
fn decode_dict_roundtrip() {
    let input = b"d3:cow3:moo4:spam4:eggse";
    let value = decode_all(input).unwrap();
    let Value::Dict(map) = &value else {
        panic!("expected dict");
    };
    assert_eq!(map.get(b"cow".as_slice()).unwrap().as_bytes(), Some(b"moo".as_slice()));
    assert_eq!(map.get(b"spam".as_slice()).unwrap().as_bytes(), Some(b"eggs".as_slice()));
    assert_eq!(encode(&value), input);
}

#[test]
fn decode_list_of_mixed_values() {
    let (value, consumed) = decode(b"li42ei-7e3:fooe").unwrap();
    assert_eq!(consumed, b"li42ei-7e3:fooe".len());
    let Value::List(items) = value else {
        panic!("expected list");
    };
    assert_eq!(items[0], Value::Int(42));
    assert_eq!(items[1], Value::Int(-7));
    assert_eq!(items[2], Value::Bytes(b"foo".to_vec()));
}

#[test]
fn rejects_leading_zero_integer() {
    assert!(decode(b"i03e").is_err());
}

#[test]
fn rejects_negative_zero() {
    assert!(decode(b"i-0e").is_err());
}

#[test]
fn rejects_non_increasing_dict_keys() {
    assert!(decode_all(b"d3:zzz3:aaa3:aaa3:bbbe").is_err());
}

#[test]
fn rejects_duplicate_dict_keys() {
    assert!(decode_all(b"d3:aaai1e3:aaai2ee").is_err());
}

#[test]
fn rejects_truncated_string() {
    assert!(decode(b"5:hi").is_err());
}

#[test]
fn rejects_trailing_garbage_in_strict_mode() {
    assert!(decode_all(b"i1ee").is_err());
}

#[test]
fn encode_sorts_keys_built_in_memory() {
    let value = Value::dict([
        ("spam", Value::str("eggs")),
        ("cow", Value::str("moo")),
    ]);
    assert_eq!(encode(&value), b"d3:cow3:moo4:spam4:eggse");
}

#[test]
fn decode_then_encode_matches_for_nested_structures() {
    let input = b"d4:infod6:lengthi12345e4:name8:file.binee";
    let value = decode_all(input).unwrap();
    assert_eq!(encode(&value), input);
}
