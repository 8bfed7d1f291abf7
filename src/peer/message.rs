//! Length-prefixed message framing for the peer wire protocol.
use super::{Bitfield, PeerError, Result};
use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// A single peer-wire message, including the implicit keep-alive (an
/// empty-length message with no id byte).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { index: u32 },
    Bitfield(Bitfield),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
}

impl Message {
    fn id(&self) -> Option<u8> {
        match self {
            Message::KeepAlive => None,
            Message::Choke => Some(0),
            Message::Unchoke => Some(1),
            Message::Interested => Some(2),
            Message::NotInterested => Some(3),
            Message::Have { .. } => Some(4),
            Message::Bitfield(_) => Some(5),
            Message::Request { .. } => Some(6),
            Message::Piece { .. } => Some(7),
            Message::Cancel { .. } => Some(8),
        }
    }

    fn encode(&self) -> BytesMut {
        let Some(id) = self.id() else {
            let mut buf = BytesMut::with_capacity(4);
            buf.put_u32(0);
            return buf;
        };

        let mut body = BytesMut::new();
        body.put_u8(id);
        match self {
            Message::Have { index } => body.put_u32(*index),
            Message::Bitfield(field) => body.put_slice(field.to_wire_bytes()),
            Message::Request { index, begin, length }
            | Message::Cancel { index, begin, length } => {
                body.put_u32(*index);
                body.put_u32(*begin);
                body.put_u32(*length);
            }
            Message::Piece { index, begin, block } => {
                body.put_u32(*index);
                body.put_u32(*begin);
                body.put_slice(block);
            }
            Message::Choke | Message::Unchoke | Message::Interested | Message::NotInterested => {}
            Message::KeepAlive => unreachable!(),
        }

        let mut out = BytesMut::with_capacity(4 + body.len());
        out.put_u32(body.len() as u32);
        out.put_slice(&body);
        out
    }

    pub async fn write(&self, stream: &mut TcpStream) -> Result<()> {
        let bytes = self.encode();
        stream.write_all(&bytes).await?;
        Ok(())
    }

    /// Reads one frame from `stream`. `num_pieces` is needed to size an
    /// incoming `bitfield` message.
    pub async fn read(stream: &mut TcpStream, num_pieces: usize) -> Result<Self> {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await?;
        let len = BigEndian::read_u32(&len_buf);
        if len == 0 {
            return Ok(Message::KeepAlive);
        }

        let mut body = vec![0u8; len as usize];
        stream.read_exact(&mut body).await?;
        Self::decode_body(&body, num_pieces)
    }

    fn decode_body(body: &[u8], num_pieces: usize) -> Result<Self> {
        let mut cursor = body;
        if cursor.is_empty() {
            return Err(PeerError::ProtocolViolation("empty message body".into()));
        }
        let id = cursor.get_u8();
        match id {
            0 => Ok(Message::Choke),
            1 => Ok(Message::Unchoke),
            2 => Ok(Message::Interested),
            3 => Ok(Message::NotInterested),
            4 => {
                if cursor.len() < 4 {
                    return Err(PeerError::ProtocolViolation("short have message".into()));
                }
                Ok(Message::Have {
                    index: cursor.get_u32(),
                })
            }
            5 => Ok(Message::Bitfield(Bitfield::from_wire_bytes(
                cursor,
                num_pieces,
            ))),
            6 | 8 => {
                if cursor.len() < 12 {
                    return Err(PeerError::ProtocolViolation(
                        "short request/cancel message".into(),
                    ));
                }
                let index = cursor.get_u32();
                let begin = cursor.get_u32();
                let length = cursor.get_u32();
                if id == 6 {
                    Ok(Message::Request { index, begin, length })
                } else {
                    Ok(Message::Cancel { index, begin, length })
                }
            }
            7 => {
                if cursor.len() < 8 {
                    return Err(PeerError::ProtocolViolation("short piece message".into()));
                }
                let index = cursor.get_u32();
                let begin = cursor.get_u32();
                let block = cursor.to_vec();
                Ok(Message::Piece { index, begin, block })
            }
            // Unknown ids are silently dropped: the caller sees this as a
            // keep-alive-shaped no-op rather than a protocol violation.
            _ => Ok(Message::KeepAlive),
        }
    }
}
