//! Maps pieces to the file byte-ranges they cover.
//!
//! The torrent's files are logically concatenated in declaration order;
//! a piece at index `i` covers `[i*piece_length, i*piece_length+len)` of
//! that concatenation. [`PieceLayout`] precomputes, for every piece, the
//! ordered list of `(file_index, file_offset, length)` segments a write or
//! read of that piece has to touch, so the piece store never has to
//! recompute file boundaries on the hot path.
use super::Torrent;

/// One contiguous run of a piece's bytes that lives inside a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSegment {
    pub file_index: usize,
    pub file_offset: u64,
    pub length: u32,
}

#[derive(Debug, Clone)]
pub struct PieceLayout {
    /// File boundaries in the logical concatenation: `file_starts[i]` is the
    /// offset of file `i`'s first byte.
    file_starts: Vec<u64>,
    file_lengths: Vec<u64>,
    piece_length: u64,
    total_length: u64,
}

impl PieceLayout {
    pub fn new(torrent: &Torrent) -> Self {
        let mut file_starts = Vec::with_capacity(torrent.files.len());
        let mut file_lengths = Vec::with_capacity(torrent.files.len());
        let mut cursor = 0u64;
        for file in &torrent.files {
            file_starts.push(cursor);
            file_lengths.push(file.length);
            cursor += file.length;
        }
        PieceLayout {
            file_starts,
            file_lengths,
            piece_length: torrent.piece_length as u64,
            total_length: torrent.total_length,
        }
    }

    /// Returns the ordered file segments covering piece `index`'s bytes
    /// `[0, len)`, where `len` is the piece's own length (short for the
    /// last piece).
    pub fn segments_for_piece(&self, index: usize, len: u32) -> Vec<FileSegment> {
        let piece_start = index as u64 * self.piece_length;
        let piece_end = (piece_start + len as u64).min(self.total_length);
        self.segments_for_range(piece_start, piece_end)
    }

    /// Like [`Self::segments_for_piece`] but for an arbitrary `[offset,
    /// offset+length)` sub-range of a piece, used by block-granular reads.
    pub fn segments_for_block(&self, index: usize, offset: u32, length: u32) -> Vec<FileSegment> {
        let piece_start = index as u64 * self.piece_length;
        let start = piece_start + offset as u64;
        let end = (start + length as u64).min(self.total_length);
        self.segments_for_range(start, end)
    }

    pub fn segments_for_range(&self, start: u64, end: u64) -> Vec<FileSegment> {
        let mut segments = Vec::new();
        for (file_index, (&file_start, &file_len)) in
            self.file_starts.iter().zip(&self.file_lengths).enumerate()
        {
            let file_end = file_start + file_len;
            if file_end <= start || file_start >= end {
                continue;
            }
            let seg_start = start.max(file_start);
            let seg_end = end.min(file_end);
            segments.push(FileSegment {
                file_index,
                file_offset: seg_start - file_start,
                length: (seg_end - seg_start) as u32,
            });
        }
        segments
    }
}
