//! The BitTorrent handshake: the first 68 bytes exchanged on a peer
//! connection, verifying both sides are talking about the same torrent.
use super::{PeerError, PeerId, Result, PROTOCOL_ID};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::instrument;

/// A handshake message: protocol identifier, reserved extension bytes,
/// info-hash, and peer-id, in that fixed 68-byte layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub reserved: [u8; 8],
    pub info_hash: [u8; 20],
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: PeerId) -> Self {
        Handshake {
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }

    pub fn serialize(&self) -> [u8; 68] {
        let mut buf = [0u8; 68];
        buf[0] = 19;
        buf[1..20].copy_from_slice(PROTOCOL_ID);
        buf[20..28].copy_from_slice(&self.reserved);
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    #[instrument(level = "trace", skip(stream))]
    pub async fn read(stream: &mut TcpStream) -> Result<Self> {
        let mut len_buf = [0u8; 1];
        stream.read_exact(&mut len_buf).await?;
        if len_buf[0] != 19 {
            return Err(PeerError::BadProtocol);
        }

        let mut buf = [0u8; 67];
        stream.read_exact(&mut buf).await?;

        if &buf[0..19] != PROTOCOL_ID.as_slice() {
            return Err(PeerError::BadProtocol);
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&buf[19..27]);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[27..47]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[47..67]);

        Ok(Handshake {
            reserved,
            info_hash,
            peer_id,
        })
    }

    pub fn validate(&self, expected_info_hash: [u8; 20]) -> Result<()> {
        if self.info_hash != expected_info_hash {
            return Err(PeerError::InfoHashMismatch);
        }
        Ok(())
    }

    /// Writes our handshake to `stream`. The wire protocol is symmetric:
    /// both sides send one of these, independent of who dialed.
    pub async fn send(stream: &mut TcpStream, info_hash: [u8; 20], peer_id: PeerId) -> Result<()> {
        let ours = Handshake::new(info_hash, peer_id);
        stream.write_all(&ours.serialize()).await?;
        Ok(())
    }

    /// Writes our handshake to `stream`, reads the peer's back, and
    /// validates its info-hash. Does not inspect the peer's `peer_id`
    /// against anything (self-connection detection is the caller's job).
    #[instrument(level = "debug", skip(stream))]
    pub async fn perform(
        stream: &mut TcpStream,
        info_hash: [u8; 20],
        peer_id: PeerId,
    ) -> Result<Handshake> {
        let ours = Handshake::new(info_hash, peer_id);
        stream.write_all(&ours.serialize()).await?;
        let theirs = Handshake::read(stream).await?;
        theirs.validate(info_hash)?;
        Ok(theirs)
    }
}
