//! The peer wire protocol: handshake, message framing, per-peer state
//! machine, and the block request pipeline.
use thiserror::Error;

pub mod bitfield;
pub mod connection;
pub mod handshake;
pub mod message;

pub use bitfield::Bitfield;
pub use connection::{PeerCommand, PeerConnection, PeerEvent};
pub use handshake::Handshake;
pub use message::Message;

pub const PROTOCOL_ID: &[u8; 19] = b"BitTorrent protocol";
pub type PeerId = [u8; 20];

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake protocol identifier mismatch")]
    BadProtocol,

    #[error("handshake info-hash mismatch")]
    InfoHashMismatch,

    #[error("connection timed out")]
    Timeout,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

pub type Result<T> = std::result::Result<T, PeerError>;
