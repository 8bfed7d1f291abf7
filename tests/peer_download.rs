//! End-to-end tests against a stub TCP peer: handshake, then a full
//! single-piece block request/response cycle into a real piece store.
use rustorrent::peer::{Handshake, Message, PeerCommand, PeerConnection, PeerEvent};
use rustorrent::store::{BlockOutcome, PieceStore};
use rustorrent::torrent::{FileEntry, Torrent};
use sha1::{Digest, Sha1};
use std::sync::Arc;
use tokio::net::TcpListener;

fn single_piece_torrent(payload: &[u8]) -> Torrent {
    let digest = Sha1::digest(payload);
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&digest);
    Torrent {
        announce: "http://tracker.example/announce".into(),
        announce_list: Vec::new(),
        comment: None,
        created_by: None,
        creation_date: None,
        encoding: None,
        private: false,
        info_hash: [42u8; 20],
        piece_length: payload.len() as u32,
        piece_hashes: vec![hash],
        name: "stub.bin".into(),
        files: vec![FileEntry {
            path: vec!["stub.bin".into()],
            length: payload.len() as u64,
        }],
        total_length: payload.len() as u64,
    }
}

#[tokio::test]
async fn handshake_then_single_piece_download_verifies_and_persists() {
    let payload = b"the quick brown fox".to_vec();
    let torrent = Arc::new(single_piece_torrent(&payload));
    let info_hash = torrent.info_hash;
    let our_peer_id = [7u8; 20];
    let stub_peer_id = [9u8; 20];

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let stub_payload = payload.clone();
    let stub = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let theirs = Handshake::read(&mut stream).await.unwrap();
        assert_eq!(theirs.info_hash, info_hash);
        Handshake::send(&mut stream, info_hash, stub_peer_id)
            .await
            .unwrap();

        Message::Bitfield(rustorrent::peer::Bitfield::new(1))
            .write(&mut stream)
            .await
            .unwrap();

        let interested = Message::read(&mut stream, 1).await.unwrap();
        assert_eq!(interested, Message::Interested);
        Message::Unchoke.write(&mut stream).await.unwrap();

        let request = Message::read(&mut stream, 1).await.unwrap();
        match request {
            Message::Request { index, begin, length } => {
                assert_eq!(index, 0);
                assert_eq!(begin, 0);
                Message::Piece {
                    index: 0,
                    begin: 0,
                    block: stub_payload[begin as usize..begin as usize + length as usize].to_vec(),
                }
                .write(&mut stream)
                .await
                .unwrap();
            }
            other => panic!("expected Request, got {other:?}"),
        }
    });

    let (connection, remote_peer_id) =
        PeerConnection::connect(addr, info_hash, our_peer_id, 1, std::time::Duration::from_secs(5))
            .await
            .unwrap();
    assert_eq!(remote_peer_id, stub_peer_id);

    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
    let (commands_tx, commands_rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(connection.run(events_tx, commands_rx));

    let dir = tempfile::tempdir().unwrap();
    let mut store = PieceStore::new(torrent.clone(), dir.path());

    loop {
        let (_addr, event) = events_rx.recv().await.expect("connection closed early");
        match event {
            PeerEvent::BitfieldReceived { .. } => {
                commands_tx.send(PeerCommand::SetInterested(true)).unwrap();
            }
            PeerEvent::Unchoked => {
                commands_tx
                    .send(PeerCommand::Request {
                        index: 0,
                        begin: 0,
                        length: payload.len() as u32,
                    })
                    .unwrap();
            }
            PeerEvent::BlockReceived { index, begin, block } => {
                let outcome = store.accept_block(index as usize, begin, &block).unwrap();
                assert_eq!(outcome, BlockOutcome::PieceCompleteOk);
                commands_tx.send(PeerCommand::Shutdown).unwrap();
                break;
            }
            other => panic!("unexpected event before download completed: {other:?}"),
        }
    }

    stub.await.unwrap();
    assert!(store.is_verified(0));
    let on_disk = std::fs::read(dir.path().join("stub.bin")).unwrap();
    assert_eq!(on_disk, payload);
}
