//! Parses a decoded bencode dictionary into a [`Torrent`].
use super::{MetainfoError, Result};
use crate::bencode::{self, Value};
use sha1::{Digest, Sha1};
use tracing::instrument;

pub const BLOCK_SIZE: u32 = 16384;
const SHA1_LEN: usize = 20;

/// One entry in a multi-file torrent's file list (or the single entry of a
/// single-file torrent, whose path is just `[name]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: Vec<String>,
    pub length: u64,
}

/// A parsed `.torrent` file.
///
/// `info_hash` is computed once, from the exact source bytes of the `info`
/// sub-dictionary, and never changes for the life of the value.
#[derive(Debug, Clone)]
pub struct Torrent {
    pub announce: String,
    pub announce_list: Vec<Vec<String>>,
    pub comment: Option<String>,
    pub created_by: Option<String>,
    pub creation_date: Option<i64>,
    pub encoding: Option<String>,
    pub private: bool,
    pub info_hash: [u8; SHA1_LEN],
    pub piece_length: u32,
    pub piece_hashes: Vec<[u8; SHA1_LEN]>,
    pub name: String,
    pub files: Vec<FileEntry>,
    pub total_length: u64,
}

impl Torrent {
    /// Parses raw `.torrent` bytes into a `Torrent`.
    #[instrument(skip(bytes), level = "debug")]
    pub fn parse(bytes: &[u8]) -> Result<Torrent> {
        let info_span = bencode::find_top_level_value_span(bytes, b"info")?
            .ok_or(MetainfoError::MissingField("info"))?;
        let info_bytes = &bytes[info_span.0..info_span.1];
        let info_hash = sha1_digest(info_bytes);

        let root = bencode::decode_all(bytes)?;
        let root = dict(&root, "root")?;

        let announce = required_string(root, "announce")?;
        let announce_list = parse_announce_list(root.get(b"announce-list".as_slice()))?;
        let comment = optional_string(root, "comment")?;
        let created_by = optional_string(root, "created by")?;
        let creation_date = root.get(b"creation date".as_slice()).and_then(Value::as_int);
        let encoding = optional_string(root, "encoding")?;

        let info_value = root
            .get(b"info".as_slice())
            .ok_or(MetainfoError::MissingField("info"))?;
        let info = dict(info_value, "info")?;

        let piece_length = required_int(info, "piece length")?;
        if piece_length <= 0 {
            return Err(MetainfoError::InvalidPieceLength);
        }
        let piece_length = piece_length as u32;

        let pieces_raw = required_bytes(info, "pieces")?;
        if pieces_raw.len() % SHA1_LEN != 0 {
            return Err(MetainfoError::PiecesLengthNotMultipleOf20(pieces_raw.len()));
        }
        let piece_hashes = pieces_raw
            .chunks_exact(SHA1_LEN)
            .map(|chunk| {
                let mut hash = [0u8; SHA1_LEN];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let private = matches!(info.get(b"private".as_slice()).and_then(Value::as_int), Some(1));
        let name = required_string(info, "name")?;

        let (files, total_length) = parse_files(info, &name)?;

        Ok(Torrent {
            announce,
            announce_list,
            comment,
            created_by,
            creation_date,
            encoding,
            private,
            info_hash,
            piece_length,
            piece_hashes,
            name,
            files,
            total_length,
        })
    }

    pub fn num_pieces(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Byte length of piece `index`; the last piece is short unless the
    /// total length is an exact multiple of `piece_length`.
    pub fn piece_len(&self, index: usize) -> u32 {
        if index + 1 < self.num_pieces() {
            return self.piece_length;
        }
        let full_pieces = (self.num_pieces().saturating_sub(1)) as u64 * self.piece_length as u64;
        let remaining = self.total_length.saturating_sub(full_pieces);
        remaining as u32
    }

    pub fn is_multi_file(&self) -> bool {
        self.files.len() > 1 || self.files.first().map(|f| f.path.len() > 1).unwrap_or(false)
    }
}

fn sha1_digest(bytes: &[u8]) -> [u8; SHA1_LEN] {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = [0u8; SHA1_LEN];
    out.copy_from_slice(&digest);
    out
}

fn dict<'a>(
    value: &'a Value,
    field: &'static str,
) -> Result<&'a std::collections::BTreeMap<Vec<u8>, Value>> {
    value.as_dict().ok_or(MetainfoError::WrongType { field })
}

fn required_bytes<'a>(
    map: &'a std::collections::BTreeMap<Vec<u8>, Value>,
    key: &'static str,
) -> Result<&'a [u8]> {
    map.get(key.as_bytes())
        .ok_or(MetainfoError::MissingField(key))?
        .as_bytes()
        .ok_or(MetainfoError::WrongType { field: key })
}

fn required_string(
    map: &std::collections::BTreeMap<Vec<u8>, Value>,
    key: &'static str,
) -> Result<String> {
    let bytes = required_bytes(map, key)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| MetainfoError::NotUtf8 { field: key })
}

fn optional_string(
    map: &std::collections::BTreeMap<Vec<u8>, Value>,
    key: &'static str,
) -> Result<Option<String>> {
    match map.get(key.as_bytes()) {
        None => Ok(None),
        Some(v) => {
            let bytes = v.as_bytes().ok_or(MetainfoError::WrongType { field: key })?;
            Ok(Some(
                String::from_utf8(bytes.to_vec()).map_err(|_| MetainfoError::NotUtf8 { field: key })?,
            ))
        }
    }
}

fn required_int(map: &std::collections::BTreeMap<Vec<u8>, Value>, key: &'static str) -> Result<i64> {
    map.get(key.as_bytes())
        .ok_or(MetainfoError::MissingField(key))?
        .as_int()
        .ok_or(MetainfoError::WrongType { field: key })
}

fn parse_announce_list(value: Option<&Value>) -> Result<Vec<Vec<String>>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let tiers = value.as_list().ok_or(MetainfoError::WrongType {
        field: "announce-list",
    })?;
    let mut result = Vec::with_capacity(tiers.len());
    for tier in tiers {
        let tier_list = tier.as_list().ok_or(MetainfoError::WrongType {
            field: "announce-list tier",
        })?;
        let mut urls = Vec::with_capacity(tier_list.len());
        for url in tier_list {
            let bytes = url.as_bytes().ok_or(MetainfoError::WrongType {
                field: "announce-list url",
            })?;
            urls.push(
                String::from_utf8(bytes.to_vec())
                    .map_err(|_| MetainfoError::NotUtf8 { field: "announce-list url" })?,
            );
        }
        result.push(urls);
    }
    Ok(result)
}

fn parse_files(
    info: &std::collections::BTreeMap<Vec<u8>, Value>,
    name: &str,
) -> Result<(Vec<FileEntry>, u64)> {
    match info.get(b"files".as_slice()) {
        None => {
            let length = required_int(info, "length")?;
            if length < 0 {
                return Err(MetainfoError::WrongType { field: "length" });
            }
            let length = length as u64;
            Ok((
                vec![FileEntry {
                    path: vec![name.to_string()],
                    length,
                }],
                length,
            ))
        }
        Some(files_value) => {
            let list = files_value
                .as_list()
                .ok_or(MetainfoError::WrongType { field: "files" })?;
            if list.is_empty() {
                return Err(MetainfoError::EmptyFileList);
            }
            let mut files = Vec::with_capacity(list.len());
            let mut total = 0u64;
            for entry in list {
                let entry = dict(entry, "files[]")?;
                let length = required_int(entry, "length")?;
                if length < 0 {
                    return Err(MetainfoError::WrongType { field: "files[].length" });
                }
                let path_value = entry
                    .get(b"path".as_slice())
                    .ok_or(MetainfoError::MissingField("files[].path"))?;
                let segments = path_value.as_list().ok_or(MetainfoError::WrongType {
                    field: "files[].path",
                })?;
                let mut path = Vec::with_capacity(segments.len());
                for segment in segments {
                    let bytes = segment.as_bytes().ok_or(MetainfoError::WrongType {
                        field: "files[].path[]",
                    })?;
                    let segment = String::from_utf8(bytes.to_vec())
                        .map_err(|_| MetainfoError::NotUtf8 { field: "files[].path[]" })?;
                    validate_path_segment(&segment)?;
                    path.push(segment);
                }
                total += length as u64;
                files.push(FileEntry {
                    path,
                    length: length as u64,
                });
            }
            Ok((files, total))
        }
    }
}

fn validate_path_segment(segment: &str) -> Result<()> {
    if segment.is_empty()
        || segment == ".."
        || segment == "."
        || segment.contains('/')
        || segment.contains('\\')
    {
        return Err(MetainfoError::InvalidPathSegment(segment.to_string()));
    }
    Ok(())
}
