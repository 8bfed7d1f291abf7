use super::*;
use crate::torrent::metainfo::FileEntry;
use sha1::{Digest, Sha1};
use std::sync::Arc;

fn make_torrent(piece_length: u32, files: Vec<FileEntry>) -> Arc<Torrent> {
    let total_length = files.iter().map(|f| f.length).sum();
    Arc::new(Torrent {
        announce: "http://tracker.example/announce".into(),
        announce_list: vec![],
        comment: None,
        created_by: None,
        creation_date: None,
        encoding: None,
        private: false,
        info_hash: [0u8; 20],
        piece_length,
        piece_hashes: vec![],
        name: "test".into(),
        files,
        total_length,
    })
}

fn with_hashes(mut torrent: Torrent, pieces: &[&[u8]]) -> Arc<Torrent> {
    torrent.piece_hashes = pieces
        .iter()
        .map(|p| {
            let digest = Sha1::digest(p);
            let mut out = [0u8; 20];
            out.copy_from_slice(&digest);
            out
        })
        .collect();
    Arc::new(torrent)
}

#[test]
fn single_piece_download_verifies_and_writes_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let data = b"hello world!!!!"; // 15 bytes, one piece
    let torrent = make_torrent(16, vec![FileEntry { path: vec!["out.bin".into()], length: data.len() as u64 }]);
    let torrent = with_hashes(Arc::try_unwrap(torrent).unwrap(), &[data.as_slice()]);
    let mut store = PieceStore::new(torrent, dir.path());

    let outcome = store.accept_block(0, 0, data).unwrap();
    assert_eq!(outcome, BlockOutcome::PieceCompleteOk);
    assert!(store.is_verified(0));

    let read_back = store.read_block(0, 0, data.len() as u32).unwrap();
    assert_eq!(read_back, data);

    let on_disk = std::fs::read(dir.path().join("out.bin")).unwrap();
    assert_eq!(on_disk, data);
}

#[test]
fn hash_mismatch_discards_buffer_and_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let real = b"correct bytes!!!";
    let tampered = b"tampered bytes!!";
    let torrent = make_torrent(16, vec![FileEntry { path: vec!["out.bin".into()], length: real.len() as u64 }]);
    let torrent = with_hashes(Arc::try_unwrap(torrent).unwrap(), &[real.as_slice()]);
    let mut store = PieceStore::new(torrent, dir.path());

    let outcome = store.accept_block(0, 0, tampered).unwrap();
    assert_eq!(outcome, BlockOutcome::PieceCompleteBad);
    assert!(!store.is_verified(0));
    assert!(!dir.path().join("out.bin").exists());
}

#[test]
fn duplicate_block_is_reported_and_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let data = vec![7u8; 32768]; // two blocks of 16384
    let torrent = make_torrent(32768, vec![FileEntry { path: vec!["out.bin".into()], length: data.len() as u64 }]);
    let torrent = with_hashes(Arc::try_unwrap(torrent).unwrap(), &[data.as_slice()]);
    let mut store = PieceStore::new(torrent, dir.path());

    let first = store.accept_block(0, 0, &data[0..16384]).unwrap();
    assert_eq!(first, BlockOutcome::Accepted);
    let dup = store.accept_block(0, 0, &data[0..16384]).unwrap();
    assert_eq!(dup, BlockOutcome::Duplicate);
    let second = store.accept_block(0, 16384, &data[16384..]).unwrap();
    assert_eq!(second, BlockOutcome::PieceCompleteOk);
}

#[test]
fn out_of_range_block_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let torrent = make_torrent(16, vec![FileEntry { path: vec!["out.bin".into()], length: 16 }]);
    let torrent = with_hashes(Arc::try_unwrap(torrent).unwrap(), &[&[0u8; 16]]);
    let mut store = PieceStore::new(torrent, dir.path());
    let outcome = store.accept_block(0, 10, &[0u8; 16]).unwrap();
    assert_eq!(outcome, BlockOutcome::OutOfRange);
}

#[test]
fn reading_unverified_piece_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let torrent = make_torrent(16, vec![FileEntry { path: vec!["out.bin".into()], length: 16 }]);
    let torrent = with_hashes(Arc::try_unwrap(torrent).unwrap(), &[&[0u8; 16]]);
    let mut store = PieceStore::new(torrent, dir.path());
    assert!(store.read_block(0, 0, 4).is_err());
}

#[test]
fn multi_file_piece_spans_two_files() {
    let dir = tempfile::tempdir().unwrap();
    let files = vec![
        FileEntry { path: vec!["a.bin".into()], length: 5 },
        FileEntry { path: vec!["sub".into(), "b.bin".into()], length: 11 },
    ];
    let piece = b"0123456789AB"; // 12 bytes spanning both files (5 + 7)
    let torrent = make_torrent(12, files);
    let torrent = with_hashes(Arc::try_unwrap(torrent).unwrap(), &[piece.as_slice()]);
    let mut store = PieceStore::new(torrent, dir.path());

    let outcome = store.accept_block(0, 0, piece).unwrap();
    assert_eq!(outcome, BlockOutcome::PieceCompleteOk);

    let a = std::fs::read(dir.path().join("a.bin")).unwrap();
    assert_eq!(a, b"01234");
    let b = std::fs::read(dir.path().join("sub").join("b.bin")).unwrap();
    assert_eq!(b, b"56789AB");
}
