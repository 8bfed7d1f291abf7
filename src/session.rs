//! Owns the tracker client, the piece store, and every peer connection;
//! drives the single-threaded async I/O loop described in the design.
use crate::bencode::BencodeError;
use crate::peer::{PeerCommand, PeerConnection, PeerEvent, PeerId};
use crate::scheduler::{PieceScheduler, DEFAULT_PIPELINE_DEPTH};
use crate::store::{self, BlockOutcome, PieceStore, Progress};
use crate::torrent::{MetainfoError, Torrent};
use crate::tracker::{self, AnnounceRequest, Client as TrackerClient, Event as TrackerEvent, TrackerError};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{info, instrument, warn};

/// Tuning options for a session, translated from CLI flags by the driver.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub max_peers: usize,
    pub pipeline_depth: usize,
    pub idle_timeout_s: u64,
    pub block_timeout_s: u64,
    pub peer_id_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 6881,
            max_peers: 50,
            pipeline_depth: DEFAULT_PIPELINE_DEPTH,
            idle_timeout_s: 120,
            block_timeout_s: 60,
            peer_id_prefix: "-RT0001-".to_string(),
        }
    }
}

/// Unified error-kind taxonomy the driver maps to exit codes.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("bencode error: {0}")]
    Bencode(#[from] BencodeError),

    #[error("metainfo invalid: {0}")]
    MetainfoInvalid(#[from] MetainfoError),

    #[error("tracker reported failure: {0}")]
    TrackerFailure { reason: String },

    #[error("tracker network error: {0}")]
    TrackerNetwork(String),

    #[error("peer protocol violation: {0}")]
    PeerProtocolViolation(String),

    #[error("peer I/O error: {0}")]
    PeerIo(String),

    #[error("piece hash mismatch")]
    HashMismatch,

    #[error("storage I/O error: {0}")]
    StorageIo(#[from] store::StoreError),

    #[error("interrupted")]
    Interrupted,
}

impl From<TrackerError> for SessionError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::Failure(reason) => SessionError::TrackerFailure { reason },
            other => SessionError::TrackerNetwork(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// A cloneable, lock-based handle onto a session's progress, independent
/// of the `&mut Session` the main download loop holds.
#[derive(Clone)]
pub struct ProgressHandle {
    store: Arc<Mutex<PieceStore>>,
}

impl ProgressHandle {
    pub fn progress(&self) -> Progress {
        self.store.lock().expect("store lock poisoned").progress()
    }
}

/// A session owns all state for downloading a single torrent: the parsed
/// metainfo, the tracker client, the piece store, the scheduler, and the
/// set of live peer connections.
pub struct Session {
    torrent: Arc<Torrent>,
    store: Arc<Mutex<PieceStore>>,
    scheduler: Arc<Mutex<PieceScheduler>>,
    tracker: TrackerClient,
    config: Config,
    peer_id: PeerId,
    uploaded: u64,
    downloaded: u64,
    commands: HashMap<SocketAddr, mpsc::UnboundedSender<PeerCommand>>,
}

impl Session {
    /// Parses `metainfo_bytes`, opens the piece store rooted at
    /// `destination_directory`, and generates a local peer-id.
    pub fn open(
        metainfo_bytes: &[u8],
        destination_directory: impl Into<PathBuf>,
        config: Config,
    ) -> Result<Session> {
        let torrent = Arc::new(Torrent::parse(metainfo_bytes)?);
        let store = Arc::new(Mutex::new(PieceStore::new(
            torrent.clone(),
            destination_directory,
        )));
        let scheduler = Arc::new(Mutex::new(PieceScheduler::new(
            &torrent,
            config.pipeline_depth,
        )));
        let peer_id = tracker::generate_peer_id(&config.peer_id_prefix);

        Ok(Session {
            torrent,
            store,
            scheduler,
            tracker: TrackerClient::new(),
            config,
            peer_id,
            uploaded: 0,
            downloaded: 0,
            commands: HashMap::new(),
        })
    }

    pub fn progress(&self) -> Progress {
        self.store.lock().expect("store lock poisoned").progress()
    }

    /// A cheap, cloneable handle for polling progress from outside the
    /// `&mut self` borrow that [`Session::run_until_complete`] holds for
    /// the duration of the download (used by the driver's progress
    /// renderer, which runs concurrently on its own task).
    pub fn progress_handle(&self) -> ProgressHandle {
        ProgressHandle {
            store: self.store.clone(),
        }
    }

    /// Runs until every piece is `Verified`, a fatal error occurs, or the
    /// caller is interrupted (e.g. ctrl-c propagated in by the driver).
    #[instrument(skip(self))]
    pub async fn run_until_complete(&mut self) -> Result<()> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<(SocketAddr, PeerEvent)>();
        let mut backoff = tracker::Backoff::new();
        let mut seen_any_peer = false;
        let mut reannounce = interval(tracker::DEFAULT_REANNOUNCE_INTERVAL);
        reannounce.tick().await; // first tick fires immediately; announce below instead

        let sweep_period = Duration::from_secs(self.config.block_timeout_s.max(1)).min(Duration::from_secs(5));
        let mut block_sweep = interval(sweep_period);
        block_sweep.tick().await; // first tick fires immediately

        self.announce(TrackerEvent::Started, &events_tx, &mut backoff, &mut seen_any_peer, &mut reannounce)
            .await?;

        loop {
            if self.scheduler.lock().expect("scheduler lock poisoned").is_complete() {
                self.announce(TrackerEvent::Completed, &events_tx, &mut backoff, &mut seen_any_peer, &mut reannounce)
                    .await
                    .ok();
                info!("download complete");
                return Ok(());
            }

            tokio::select! {
                _ = reannounce.tick() => {
                    self.announce(TrackerEvent::Started, &events_tx, &mut backoff, &mut seen_any_peer, &mut reannounce).await?;
                }

                Some((addr, event)) = events_rx.recv() => {
                    self.handle_event(addr, event, &events_tx)?;
                }

                _ = block_sweep.tick() => {
                    self.scheduler
                        .lock()
                        .expect("scheduler lock poisoned")
                        .release_expired(Duration::from_secs(self.config.block_timeout_s));
                }

                _ = tokio::signal::ctrl_c() => {
                    self.shutdown();
                    return Err(SessionError::Interrupted);
                }
            }
        }
    }

    async fn announce(
        &mut self,
        event: TrackerEvent,
        events_tx: &mpsc::UnboundedSender<(SocketAddr, PeerEvent)>,
        backoff: &mut tracker::Backoff,
        seen_any_peer: &mut bool,
        reannounce: &mut tokio::time::Interval,
    ) -> Result<()> {
        let left = self.torrent.total_length - self.progress().verified_bytes;
        let request = AnnounceRequest {
            announce_url: &self.torrent.announce,
            info_hash: self.torrent.info_hash,
            peer_id: self.peer_id,
            port: self.config.port,
            uploaded: self.uploaded,
            downloaded: self.downloaded,
            left,
            event: Some(event),
        };

        match self.tracker.announce(&request).await {
            Ok(response) => {
                backoff.reset();
                backoff.set_interval_cap(Duration::from_secs(response.interval));
                *reannounce = interval(Duration::from_secs(response.interval.max(1)));
                if !response.peers.is_empty() {
                    *seen_any_peer = true;
                }
                for peer in response.peers {
                    self.dial_peer(SocketAddr::new(peer.ip, peer.port), peer.peer_id, events_tx.clone());
                }
                Ok(())
            }
            Err(err) if *seen_any_peer || self.progress().verified_pieces > 0 => {
                warn!(error = %err, "tracker announce failed, retrying with backoff");
                tokio::time::sleep(backoff.advance()).await;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn dial_peer(
        &mut self,
        addr: SocketAddr,
        tracker_peer_id: Option<PeerId>,
        events_tx: mpsc::UnboundedSender<(SocketAddr, PeerEvent)>,
    ) {
        if self.commands.len() >= self.config.max_peers || self.commands.contains_key(&addr) {
            return;
        }
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        self.commands.insert(addr, cmd_tx);

        let info_hash = self.torrent.info_hash;
        let peer_id = self.peer_id;
        let num_pieces = self.torrent.num_pieces();
        let idle_timeout = Duration::from_secs(self.config.idle_timeout_s);
        let advertised_peer_id = tracker_peer_id;
        self.scheduler.lock().expect("scheduler lock poisoned").add_peer(addr);

        tokio::spawn(async move {
            match PeerConnection::connect(addr, info_hash, peer_id, num_pieces, idle_timeout).await {
                Ok((connection, remote_peer_id)) => {
                    if let Some(advertised) = advertised_peer_id {
                        if advertised != remote_peer_id {
                            warn!(%addr, "peer-id at handshake does not match the tracker's advertised peer-id");
                        }
                    }
                    connection.run(events_tx, cmd_rx).await;
                }
                Err(err) => {
                    warn!(%addr, error = %err, "failed to connect to peer");
                    let _ = events_tx.send((
                        addr,
                        PeerEvent::Closed {
                            reason: err.to_string(),
                        },
                    ));
                }
            }
        });
    }

    fn handle_event(
        &mut self,
        addr: SocketAddr,
        event: PeerEvent,
        events_tx: &mpsc::UnboundedSender<(SocketAddr, PeerEvent)>,
    ) -> Result<()> {
        match event {
            PeerEvent::BitfieldReceived { bitfield } => {
                let have: Vec<usize> = bitfield.iter_have().collect();
                self.scheduler.lock().expect("scheduler lock poisoned").set_peer_bitfield(addr, have);
                self.maybe_declare_interest(addr);
            }
            PeerEvent::HaveReceived { index } => {
                self.scheduler.lock().expect("scheduler lock poisoned").peer_has_piece(addr, index as usize);
                self.maybe_declare_interest(addr);
            }
            PeerEvent::Unchoked => {
                self.request_more(addr);
            }
            PeerEvent::Choked => {
                self.scheduler.lock().expect("scheduler lock poisoned").release_all_for_peer(addr);
            }
            PeerEvent::PeerInterested(interested) => {
                if interested {
                    self.send(addr, PeerCommand::SetChoking(false));
                }
            }
            PeerEvent::Ready { .. } => {}
            PeerEvent::BlockReceived { index, begin, block } => {
                self.downloaded += block.len() as u64;
                self.scheduler.lock().expect("scheduler lock poisoned").block_received(addr, index as usize, begin);
                let outcome = self
                    .store
                    .lock()
                    .expect("store lock poisoned")
                    .accept_block(index as usize, begin, &block)?;
                match outcome {
                    BlockOutcome::PieceCompleteOk => {
                        self.scheduler.lock().expect("scheduler lock poisoned").piece_verified(index as usize);
                        self.broadcast_have(index);
                    }
                    BlockOutcome::PieceCompleteBad => {
                        warn!(piece = index, %addr, "hash mismatch, piece reset to missing");
                    }
                    BlockOutcome::Accepted | BlockOutcome::Duplicate | BlockOutcome::OutOfRange => {}
                }
                self.request_more(addr);
            }
            PeerEvent::BlockRequested { index, begin, length } => {
                self.serve_request(addr, index, begin, length);
            }
            PeerEvent::Closed { reason } => {
                info!(%addr, reason, "peer connection closed");
                self.commands.remove(&addr);
                self.scheduler.lock().expect("scheduler lock poisoned").remove_peer(addr);
            }
        }
        let _ = events_tx;
        Ok(())
    }

    fn maybe_declare_interest(&mut self, addr: SocketAddr) {
        let interested = self.scheduler.lock().expect("scheduler lock poisoned").peer_has_needed_piece(addr);
        if interested {
            self.send(addr, PeerCommand::SetInterested(true));
        }
    }

    fn request_more(&mut self, addr: SocketAddr) {
        let requests = self
            .scheduler
            .lock()
            .expect("scheduler lock poisoned")
            .next_requests(addr, self.config.pipeline_depth);
        for request in requests {
            self.send(
                addr,
                PeerCommand::Request {
                    index: request.piece as u32,
                    begin: request.offset,
                    length: request.length,
                },
            );
        }
    }

    fn serve_request(&mut self, addr: SocketAddr, index: u32, begin: u32, length: u32) {
        let block = self
            .store
            .lock()
            .expect("store lock poisoned")
            .read_block(index as usize, begin, length);
        if let Ok(block) = block {
            self.send(
                addr,
                PeerCommand::Piece {
                    index,
                    begin,
                    block,
                },
            );
        }
    }

    fn broadcast_have(&mut self, index: u32) {
        let addrs: Vec<SocketAddr> = self.commands.keys().copied().collect();
        for addr in addrs {
            self.send(addr, PeerCommand::Have { index });
        }
    }

    fn send(&mut self, addr: SocketAddr, command: PeerCommand) {
        if let Some(tx) = self.commands.get(&addr) {
            if tx.send(command).is_err() {
                self.commands.remove(&addr);
            }
        }
    }

    fn shutdown(&mut self) {
        for (_, tx) in self.commands.drain() {
            let _ = tx.send(PeerCommand::Shutdown);
        }
    }
}
