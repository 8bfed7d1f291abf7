//! The piece store: translates piece/block reads and writes into file-range
//! I/O, hash-verifies completed pieces, and never exposes unverified bytes.
use crate::torrent::{layout::PieceLayout, metainfo::BLOCK_SIZE, Torrent};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{instrument, warn};

#[cfg(test)]
mod tests;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("piece index {0} out of range")]
    PieceOutOfRange(usize),
    #[error("attempted to read unverified piece {0}")]
    ReadUnverified(usize),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Outcome of [`PieceStore::accept_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Buffered; the piece is not yet complete.
    Accepted,
    /// This was the last missing block and the piece hash matched.
    PieceCompleteOk,
    /// This was the last missing block but the piece hash did not match;
    /// the piece is back to `Missing`.
    PieceCompleteBad,
    /// This exact block was already received for this piece.
    Duplicate,
    /// `(piece, offset, len)` does not fit within the piece's bounds.
    OutOfRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PieceState {
    Missing,
    Verified,
}

struct PieceBuffer {
    data: Vec<u8>,
    block_received: Vec<bool>,
    received_blocks: usize,
}

impl PieceBuffer {
    fn new(piece_len: u32) -> Self {
        let num_blocks = piece_len.div_ceil(BLOCK_SIZE) as usize;
        PieceBuffer {
            data: vec![0u8; piece_len as usize],
            block_received: vec![false; num_blocks],
            received_blocks: 0,
        }
    }

    fn is_complete(&self) -> bool {
        self.received_blocks == self.block_received.len()
    }
}

/// Summary of download progress, reported to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub verified_pieces: usize,
    pub total_pieces: usize,
    pub verified_bytes: u64,
    pub total_bytes: u64,
}

pub struct PieceStore {
    torrent: Arc<Torrent>,
    layout: PieceLayout,
    dest_dir: PathBuf,
    files: Vec<Option<File>>,
    state: Vec<PieceState>,
    buffers: HashMap<usize, PieceBuffer>,
    verified_pieces: usize,
    verified_bytes: u64,
}

impl PieceStore {
    pub fn new(torrent: Arc<Torrent>, dest_dir: impl Into<PathBuf>) -> Self {
        let layout = PieceLayout::new(&torrent);
        let num_pieces = torrent.num_pieces();
        let num_files = torrent.files.len();
        PieceStore {
            torrent,
            layout,
            dest_dir: dest_dir.into(),
            files: (0..num_files).map(|_| None).collect(),
            state: vec![PieceState::Missing; num_pieces],
            buffers: HashMap::new(),
            verified_pieces: 0,
            verified_bytes: 0,
        }
    }

    pub fn is_verified(&self, index: usize) -> bool {
        self.state.get(index) == Some(&PieceState::Verified)
    }

    pub fn needed_pieces(&self) -> impl Iterator<Item = usize> + '_ {
        self.state
            .iter()
            .enumerate()
            .filter(|(_, s)| **s != PieceState::Verified)
            .map(|(i, _)| i)
    }

    pub fn progress(&self) -> Progress {
        Progress {
            verified_pieces: self.verified_pieces,
            total_pieces: self.torrent.num_pieces(),
            verified_bytes: self.verified_bytes,
            total_bytes: self.torrent.total_length,
        }
    }

    /// Buffers `data` at `offset` within piece `index`. Once every block of
    /// the piece has arrived, hashes the assembled bytes and, on a match,
    /// commits them to disk and marks the piece `Verified`.
    #[instrument(skip(self, data), fields(piece = index, offset, len = data.len()))]
    pub fn accept_block(&mut self, index: usize, offset: u32, data: &[u8]) -> Result<BlockOutcome> {
        if index >= self.torrent.num_pieces() {
            return Ok(BlockOutcome::OutOfRange);
        }
        if self.is_verified(index) {
            return Ok(BlockOutcome::Duplicate);
        }
        let piece_len = self.torrent.piece_len(index);
        if offset.checked_add(data.len() as u32).map_or(true, |end| end > piece_len) {
            return Ok(BlockOutcome::OutOfRange);
        }

        let block_index = (offset / BLOCK_SIZE) as usize;
        let buffer = self
            .buffers
            .entry(index)
            .or_insert_with(|| PieceBuffer::new(piece_len));

        if buffer.block_received[block_index] {
            return Ok(BlockOutcome::Duplicate);
        }

        let start = offset as usize;
        buffer.data[start..start + data.len()].copy_from_slice(data);
        buffer.block_received[block_index] = true;
        buffer.received_blocks += 1;

        if !buffer.is_complete() {
            return Ok(BlockOutcome::Accepted);
        }

        let buffer = self.buffers.remove(&index).expect("just checked complete");
        let digest = Sha1::digest(&buffer.data);
        if digest.as_slice() != self.torrent.piece_hashes[index] {
            warn!(piece = index, "piece hash mismatch, discarding buffer");
            return Ok(BlockOutcome::PieceCompleteBad);
        }

        self.write_piece(index, &buffer.data)?;
        self.state[index] = PieceState::Verified;
        self.verified_pieces += 1;
        self.verified_bytes += buffer.data.len() as u64;
        Ok(BlockOutcome::PieceCompleteOk)
    }

    /// Reads `length` bytes at `offset` within piece `index`. Only valid on
    /// a `Verified` piece; unverified bytes are never exposed to callers.
    pub fn read_block(&mut self, index: usize, offset: u32, length: u32) -> Result<Vec<u8>> {
        if !self.is_verified(index) {
            return Err(StoreError::ReadUnverified(index));
        }
        let segments = self.layout.segments_for_block(index, offset, length);
        let mut out = Vec::with_capacity(length as usize);
        for segment in segments {
            let file = self.open_file(segment.file_index)?;
            file.seek(SeekFrom::Start(segment.file_offset))
                .map_err(|e| self.io_err(segment.file_index, e))?;
            let mut chunk = vec![0u8; segment.length as usize];
            file.read_exact(&mut chunk)
                .map_err(|e| self.io_err(segment.file_index, e))?;
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    fn write_piece(&mut self, index: usize, data: &[u8]) -> Result<()> {
        let segments = self.layout.segments_for_piece(index, data.len() as u32);
        let mut consumed = 0usize;
        for segment in segments {
            let chunk = &data[consumed..consumed + segment.length as usize];
            consumed += segment.length as usize;
            let file = self.open_file(segment.file_index)?;
            file.seek(SeekFrom::Start(segment.file_offset))
                .map_err(|e| self.io_err(segment.file_index, e))?;
            file.write_all(chunk)
                .map_err(|e| self.io_err(segment.file_index, e))?;
        }
        Ok(())
    }

    fn open_file(&mut self, file_index: usize) -> Result<&mut File> {
        if self.files[file_index].is_none() {
            let entry = &self.torrent.files[file_index];
            let path = self.dest_dir.join(relative_path(&entry.path));
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| StoreError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(&path)
                .map_err(|e| StoreError::Io {
                    path: path.clone(),
                    source: e,
                })?;
            file.set_len(entry.length).map_err(|e| StoreError::Io {
                path: path.clone(),
                source: e,
            })?;
            self.files[file_index] = Some(file);
        }
        Ok(self.files[file_index].as_mut().expect("just opened"))
    }

    fn io_err(&self, file_index: usize, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.dest_dir.join(relative_path(&self.torrent.files[file_index].path)),
            source,
        }
    }
}

fn relative_path(segments: &[String]) -> PathBuf {
    let mut path = PathBuf::new();
    for segment in segments {
        path.push(segment);
    }
    path
}
