//! The piece scheduler: decides which blocks to request from which peers.
//!
//! Selection is deliberately simple (random piece, lowest-offset block)
//! rather than rarest-first; see the peer connection module for the wire
//! side of sending these requests.
use crate::torrent::metainfo::BLOCK_SIZE;
use crate::torrent::Torrent;
use rand::seq::IteratorRandom;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Default pipeline depth (`W` in the design): max outstanding block
/// requests per peer at any time.
pub const DEFAULT_PIPELINE_DEPTH: usize = 5;

/// A request about to be sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRequest {
    pub piece: usize,
    pub offset: u32,
    pub length: u32,
}

#[derive(Default)]
struct PeerState {
    bitfield: HashSet<usize>,
    outstanding: HashMap<(usize, u32), Instant>,
}

/// Tracks piece availability, per-peer reservations, and hands out the next
/// batch of block requests a peer with spare pipeline capacity should send.
pub struct PieceScheduler {
    num_pieces: usize,
    piece_length: u32,
    total_length: u64,
    pipeline_depth: usize,
    needed: HashSet<usize>,
    peers: HashMap<SocketAddr, PeerState>,
    reserved_blocks: HashMap<usize, HashMap<u32, Instant>>,
}

impl PieceScheduler {
    pub fn new(torrent: &Torrent, pipeline_depth: usize) -> Self {
        PieceScheduler {
            num_pieces: torrent.num_pieces(),
            piece_length: torrent.piece_length,
            total_length: torrent.total_length,
            pipeline_depth,
            needed: (0..torrent.num_pieces()).collect(),
            peers: HashMap::new(),
            reserved_blocks: HashMap::new(),
        }
    }

    pub fn add_peer(&mut self, addr: SocketAddr) {
        self.peers.entry(addr).or_default();
    }

    pub fn remove_peer(&mut self, addr: SocketAddr) {
        if let Some(state) = self.peers.remove(&addr) {
            for (piece, offset) in state.outstanding.into_keys() {
                if let Some(map) = self.reserved_blocks.get_mut(&piece) {
                    map.remove(&offset);
                }
            }
        }
    }

    pub fn set_peer_bitfield(&mut self, addr: SocketAddr, pieces: impl IntoIterator<Item = usize>) {
        let state = self.peers.entry(addr).or_default();
        state.bitfield = pieces.into_iter().collect();
    }

    pub fn peer_has_piece(&mut self, addr: SocketAddr, index: usize) {
        self.peers.entry(addr).or_default().bitfield.insert(index);
    }

    /// Whether `addr` currently has any piece we still need; used to decide
    /// whether to send `interested`.
    pub fn peer_has_needed_piece(&self, addr: SocketAddr) -> bool {
        self.peers
            .get(&addr)
            .map(|state| state.bitfield.iter().any(|p| self.needed.contains(p)))
            .unwrap_or(false)
    }

    fn piece_len(&self, index: usize) -> u32 {
        let start = index as u64 * self.piece_length as u64;
        let remaining = self.total_length.saturating_sub(start);
        remaining.min(self.piece_length as u64) as u32
    }

    /// Picks up to `capacity` new block requests for `addr`, reserving them
    /// until a `piece` message arrives or the peer is lost.
    pub fn next_requests(&mut self, addr: SocketAddr, capacity: usize) -> Vec<BlockRequest> {
        let Some(state) = self.peers.get(&addr) else {
            return Vec::new();
        };
        let slots = capacity
            .min(self.pipeline_depth.saturating_sub(state.outstanding.len()));
        if slots == 0 {
            return Vec::new();
        }

        let candidate_pieces: Vec<usize> = state
            .bitfield
            .iter()
            .copied()
            .filter(|p| self.needed.contains(p))
            .collect();
        if candidate_pieces.is_empty() {
            return Vec::new();
        }

        let mut requests = Vec::with_capacity(slots);
        let mut rng = rand::rng();
        for _ in 0..slots {
            let Some(&piece) = candidate_pieces.iter().choose(&mut rng) else {
                break;
            };
            let Some(offset) = self.next_unreserved_block(piece) else {
                continue;
            };
            let piece_len = self.piece_len(piece);
            let length = (piece_len - offset).min(BLOCK_SIZE);
            let now = Instant::now();
            self.reserved_blocks.entry(piece).or_default().insert(offset, now);
            self.peers
                .get_mut(&addr)
                .expect("checked above")
                .outstanding
                .insert((piece, offset), now);
            requests.push(BlockRequest {
                piece,
                offset,
                length,
            });
        }
        requests
    }

    fn next_unreserved_block(&self, piece: usize) -> Option<u32> {
        let piece_len = self.piece_len(piece);
        let num_blocks = piece_len.div_ceil(BLOCK_SIZE);
        let reserved = self.reserved_blocks.get(&piece);
        (0..num_blocks)
            .map(|i| i * BLOCK_SIZE)
            .find(|offset| !reserved.is_some_and(|r| r.contains_key(offset)))
    }

    /// Releases the reservation for a block that arrived (or that the store
    /// rejected), so a duplicate request doesn't silently leak a slot.
    pub fn block_received(&mut self, addr: SocketAddr, piece: usize, offset: u32) {
        if let Some(state) = self.peers.get_mut(&addr) {
            state.outstanding.remove(&(piece, offset));
        }
        if let Some(map) = self.reserved_blocks.get_mut(&piece) {
            map.remove(&offset);
        }
    }

    /// Releases every outstanding reservation for `addr` without removing
    /// the peer, used on `choke` (outstanding requests are considered
    /// cancelled once a peer chokes us).
    pub fn release_all_for_peer(&mut self, addr: SocketAddr) {
        if let Some(state) = self.peers.get_mut(&addr) {
            for (piece, offset) in state.outstanding.drain() {
                if let Some(map) = self.reserved_blocks.get_mut(&piece) {
                    map.remove(&offset);
                }
            }
        }
    }

    /// Releases any reservation that has been outstanding longer than
    /// `timeout`, making those blocks eligible for [`Self::next_requests`]
    /// again — a peer that neither answers nor chokes/disconnects would
    /// otherwise pin a block's slot forever.
    pub fn release_expired(&mut self, timeout: Duration) {
        let mut expired: Vec<(SocketAddr, usize, u32)> = Vec::new();
        for (&addr, state) in &self.peers {
            for (&(piece, offset), reserved_at) in &state.outstanding {
                if reserved_at.elapsed() >= timeout {
                    expired.push((addr, piece, offset));
                }
            }
        }
        for (addr, piece, offset) in expired {
            if let Some(state) = self.peers.get_mut(&addr) {
                state.outstanding.remove(&(piece, offset));
            }
            if let Some(map) = self.reserved_blocks.get_mut(&piece) {
                map.remove(&offset);
            }
        }
    }

    pub fn piece_verified(&mut self, index: usize) {
        self.needed.remove(&index);
        self.reserved_blocks.remove(&index);
    }

    pub fn is_complete(&self) -> bool {
        self.needed.is_empty()
    }

    pub fn needed_count(&self) -> usize {
        self.needed.len()
    }

    pub fn num_pieces(&self) -> usize {
        self.num_pieces
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::Torrent;

    fn torrent_with(num_pieces: usize, piece_length: u32) -> Torrent {
        Torrent {
            announce: "http://tracker.example/announce".into(),
            announce_list: Vec::new(),
            comment: None,
            created_by: None,
            creation_date: None,
            encoding: None,
            private: false,
            info_hash: [0u8; 20],
            piece_length,
            piece_hashes: vec![[0u8; 20]; num_pieces],
            name: "test".into(),
            files: vec![crate::torrent::metainfo::FileEntry {
                path: vec!["test".into()],
                length: piece_length as u64 * num_pieces as u64,
            }],
            total_length: piece_length as u64 * num_pieces as u64,
        }
    }

    #[test]
    fn reserves_and_releases_blocks_on_peer_loss() {
        let torrent = torrent_with(2, BLOCK_SIZE * 2);
        let mut scheduler = PieceScheduler::new(&torrent, DEFAULT_PIPELINE_DEPTH);
        let addr: SocketAddr = "127.0.0.1:6881".parse().unwrap();
        scheduler.add_peer(addr);
        scheduler.set_peer_bitfield(addr, [0, 1]);

        let requests = scheduler.next_requests(addr, DEFAULT_PIPELINE_DEPTH);
        assert!(!requests.is_empty());

        scheduler.remove_peer(addr);
        scheduler.add_peer(addr);
        scheduler.set_peer_bitfield(addr, [0, 1]);
        let requests_again = scheduler.next_requests(addr, DEFAULT_PIPELINE_DEPTH);
        assert_eq!(requests_again.len(), 4);
    }

    #[test]
    fn respects_pipeline_depth_cap() {
        let torrent = torrent_with(1, BLOCK_SIZE * 20);
        let mut scheduler = PieceScheduler::new(&torrent, 3);
        let addr: SocketAddr = "127.0.0.1:6881".parse().unwrap();
        scheduler.add_peer(addr);
        scheduler.set_peer_bitfield(addr, [0]);
        let requests = scheduler.next_requests(addr, 100);
        assert_eq!(requests.len(), 3);
    }

    #[test]
    fn expired_reservations_become_reusable() {
        let torrent = torrent_with(1, BLOCK_SIZE * 2);
        let mut scheduler = PieceScheduler::new(&torrent, DEFAULT_PIPELINE_DEPTH);
        let addr: SocketAddr = "127.0.0.1:6881".parse().unwrap();
        scheduler.add_peer(addr);
        scheduler.set_peer_bitfield(addr, [0]);

        let first = scheduler.next_requests(addr, DEFAULT_PIPELINE_DEPTH);
        assert_eq!(first.len(), 2);
        assert!(scheduler.next_requests(addr, DEFAULT_PIPELINE_DEPTH).is_empty());

        std::thread::sleep(std::time::Duration::from_millis(5));
        scheduler.release_expired(std::time::Duration::from_millis(1));

        let again = scheduler.next_requests(addr, DEFAULT_PIPELINE_DEPTH);
        assert_eq!(again.len(), 2);
    }

    #[test]
    fn piece_verified_removes_from_needed() {
        let torrent = torrent_with(2, BLOCK_SIZE);
        let mut scheduler = PieceScheduler::new(&torrent, DEFAULT_PIPELINE_DEPTH);
        scheduler.piece_verified(0);
        assert_eq!(scheduler.needed_count(), 1);
        assert!(!scheduler.is_complete());
        scheduler.piece_verified(1);
        assert!(scheduler.is_complete());
    }
}
