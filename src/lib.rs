//! Library root for rustorrent-core.
//!
//! Re-exports the core modules: bencode, torrent, store, tracker, peer,
//! scheduler and session. The binary in `src/main.rs` is a thin driver
//! built on top of this library.
pub mod bencode;
pub mod peer;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod torrent;
pub mod tracker;
