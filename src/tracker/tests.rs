use super::*;

#[test]
fn parses_compact_peers() {
    // one peer: 127.0.0.1:6881
    let mut body = Vec::new();
    body.extend(b"d8:intervali1800e5:peers6:");
    body.extend([127, 0, 0, 1, 0x1A, 0xE1]);
    body.push(b'e');
    let response = parse_announce_response(&body).unwrap();
    assert_eq!(response.interval, 1800);
    assert_eq!(response.peers.len(), 1);
    assert_eq!(response.peers[0].ip, IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
    assert_eq!(response.peers[0].port, 6881);
}

#[test]
fn parses_non_compact_peer_dicts() {
    let body = b"d8:intervali900e5:peersld2:ip9:127.0.0.14:porti6881eeee";
    let response = parse_announce_response(body).unwrap();
    assert_eq!(response.peers.len(), 1);
    assert_eq!(response.peers[0].port, 6881);
    assert_eq!(response.peers[0].peer_id, None);
}

#[test]
fn non_compact_peer_dict_carries_peer_id() {
    let mut body = Vec::new();
    body.extend(b"d8:intervali900e5:peersld2:ip9:127.0.0.17:peer id20:");
    body.extend([b'A'; 20]);
    body.extend(b"4:porti6881eeee");
    let response = parse_announce_response(&body).unwrap();
    assert_eq!(response.peers.len(), 1);
    assert_eq!(response.peers[0].peer_id, Some([b'A'; 20]));
}

#[test]
fn compact_peers_never_carry_peer_id() {
    let mut body = Vec::new();
    body.extend(b"d8:intervali1800e5:peers6:");
    body.extend([127, 0, 0, 1, 0x1A, 0xE1]);
    body.push(b'e');
    let response = parse_announce_response(&body).unwrap();
    assert_eq!(response.peers[0].peer_id, None);
}

#[test]
fn surfaces_failure_reason() {
    let body = b"d14:failure reason20:unregistered torrente";
    let err = parse_announce_response(body).unwrap_err();
    match err {
        TrackerError::Failure(reason) => assert_eq!(reason, "unregistered torrent"),
        other => panic!("expected Failure, got {other:?}"),
    }
}

#[test]
fn url_encodes_info_hash_byte_by_byte() {
    let bytes: [u8; 4] = [0x00, b'a', 0xff, b'-'];
    assert_eq!(url_encode_bytes(&bytes), "%00a%FF-");
}

#[test]
fn announce_url_preserves_existing_query_and_appends_params() {
    let request = AnnounceRequest {
        announce_url: "http://tracker.example/announce?passkey=abc",
        info_hash: [0u8; 20],
        peer_id: [1u8; 20],
        port: 6881,
        uploaded: 0,
        downloaded: 0,
        left: 100,
        event: Some(Event::Started),
    };
    let url = build_announce_url(&request).unwrap();
    let query = url.query().unwrap();
    assert!(query.starts_with("passkey=abc&info_hash="));
    assert!(query.contains("event=started"));
    assert!(query.contains("compact=1"));
}

#[test]
fn backoff_doubles_and_caps() {
    let mut backoff = Backoff::new();
    assert_eq!(backoff.advance(), Duration::from_secs(15));
    assert_eq!(backoff.advance(), Duration::from_secs(30));
    assert_eq!(backoff.advance(), Duration::from_secs(60));
    for _ in 0..10 {
        backoff.advance();
    }
    assert_eq!(backoff.advance(), Duration::from_secs(15 * 60));
}

#[test]
fn backoff_resets() {
    let mut backoff = Backoff::new();
    backoff.advance();
    backoff.advance();
    backoff.reset();
    assert_eq!(backoff.advance(), Duration::from_secs(15));
}
