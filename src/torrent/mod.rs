//! Torrent metainfo parsing: turning raw `.torrent` bytes into a [`Torrent`]
//! with a stable `info_hash` and a piece/file layout the piece store can use.
use thiserror::Error;

pub mod layout;
pub mod metainfo;


pub use layout::FileSegment;
pub use metainfo::{FileEntry, Torrent};

#[derive(Debug, Error)]
pub enum MetainfoError {
    #[error("bencode decoding error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("field {field} has the wrong type")]
    WrongType { field: &'static str },

    #[error("field {field} is not valid UTF-8")]
    NotUtf8 { field: &'static str },

    #[error("piece length must be a positive integer")]
    InvalidPieceLength,

    #[error("pieces length ({0}) is not a multiple of 20")]
    PiecesLengthNotMultipleOf20(usize),

    #[error("multi-file torrent declares an empty file list")]
    EmptyFileList,

    #[error("invalid path segment: {0:?}")]
    InvalidPathSegment(String),
}

pub type Result<T> = std::result::Result<T, MetainfoError>;
