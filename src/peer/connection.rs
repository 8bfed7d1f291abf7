//! A single peer connection: handshake, then a `tokio::select!` loop that
//! multiplexes inbound wire messages against outbound commands from the
//! session/scheduler.
use super::{Bitfield, Handshake, Message, PeerError, PeerId, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, instrument};

/// Where a connection currently stands in the handshake/session lifecycle
/// (spec 4.5's `Dialing -> Handshaking -> BitfieldExchange -> Ready ->
/// Closed`). `Ready`'s substate lives on [`PeerStatus`] instead, since it
/// varies independently of this coarse stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Dialing,
    Handshaking,
    BitfieldExchange,
    Ready,
    Closed,
}

/// Choke/interest substate, tracked in both directions.
#[derive(Debug, Clone, Copy)]
pub struct PeerStatus {
    pub am_choking: bool,
    pub am_interested: bool,
    pub peer_choking: bool,
    pub peer_interested: bool,
}

impl Default for PeerStatus {
    fn default() -> Self {
        PeerStatus {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
        }
    }
}

/// Commands the session/scheduler sends down to a running connection task.
#[derive(Debug)]
pub enum PeerCommand {
    SetInterested(bool),
    SetChoking(bool),
    Have { index: u32 },
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Shutdown,
}

/// Events a connection task reports back up to the session.
#[derive(Debug)]
pub enum PeerEvent {
    Ready { peer_id: PeerId, bitfield: Bitfield },
    HaveReceived { index: u32 },
    BitfieldReceived { bitfield: Bitfield },
    Choked,
    Unchoked,
    PeerInterested(bool),
    BlockReceived { index: u32, begin: u32, block: Vec<u8> },
    BlockRequested { index: u32, begin: u32, length: u32 },
    Closed { reason: String },
}

pub struct PeerConnection {
    addr: SocketAddr,
    stream: TcpStream,
    num_pieces: usize,
    stage: Stage,
    status: PeerStatus,
    remote_bitfield: Bitfield,
    idle_timeout: Duration,
}

impl PeerConnection {
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Dials `addr`, performs the handshake, and returns a connection ready
    /// to enter its run loop. Stays in `Dialing`/`Handshaking` for the
    /// duration of this call; the caller observes only success or failure.
    /// `idle_timeout` bounds both this dial and every subsequent read once
    /// the connection enters its run loop.
    #[instrument(skip(info_hash, peer_id), fields(%addr))]
    pub async fn connect(
        addr: SocketAddr,
        info_hash: [u8; 20],
        peer_id: PeerId,
        num_pieces: usize,
        idle_timeout: Duration,
    ) -> Result<(Self, PeerId)> {
        let mut stream = timeout(idle_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| PeerError::Timeout)??;
        let theirs = Handshake::perform(&mut stream, info_hash, peer_id).await?;
        Ok((
            PeerConnection {
                addr,
                stream,
                num_pieces,
                stage: Stage::BitfieldExchange,
                status: PeerStatus::default(),
                remote_bitfield: Bitfield::new(num_pieces),
                idle_timeout,
            },
            theirs.peer_id,
        ))
    }

    /// Runs the message loop until the connection closes, forwarding events
    /// to `events` and accepting commands from `commands`.
    #[instrument(skip(self, events, commands), fields(addr = %self.addr))]
    pub async fn run(
        mut self,
        events: mpsc::UnboundedSender<(SocketAddr, PeerEvent)>,
        mut commands: mpsc::UnboundedReceiver<PeerCommand>,
    ) {
        let reason = self.run_inner(&events, &mut commands).await;
        self.stage = Stage::Closed;
        let reason = match reason {
            Ok(()) => "peer closed connection".to_string(),
            Err(err) => err.to_string(),
        };
        let _ = events.send((self.addr, PeerEvent::Closed { reason }));
    }

    async fn run_inner(
        &mut self,
        events: &mpsc::UnboundedSender<(SocketAddr, PeerEvent)>,
        commands: &mut mpsc::UnboundedReceiver<PeerCommand>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                biased;

                maybe_cmd = commands.recv() => {
                    match maybe_cmd {
                        Some(PeerCommand::Shutdown) | None => return Ok(()),
                        Some(cmd) => self.handle_command(cmd).await?,
                    }
                }

                message = timeout(self.idle_timeout, Message::read(&mut self.stream, self.num_pieces)) => {
                    let message = message.map_err(|_| PeerError::Timeout)??;
                    self.handle_message(message, events).await?;
                }
            }
        }
    }

    async fn handle_command(&mut self, command: PeerCommand) -> Result<()> {
        match command {
            PeerCommand::SetInterested(interested) => {
                self.status.am_interested = interested;
                let msg = if interested {
                    Message::Interested
                } else {
                    Message::NotInterested
                };
                msg.write(&mut self.stream).await?;
            }
            PeerCommand::SetChoking(choking) => {
                self.status.am_choking = choking;
                let msg = if choking { Message::Choke } else { Message::Unchoke };
                msg.write(&mut self.stream).await?;
            }
            PeerCommand::Have { index } => {
                Message::Have { index }.write(&mut self.stream).await?;
            }
            PeerCommand::Request { index, begin, length } => {
                Message::Request { index, begin, length }
                    .write(&mut self.stream)
                    .await?;
            }
            PeerCommand::Piece { index, begin, block } => {
                if !self.status.am_choking {
                    Message::Piece { index, begin, block }
                        .write(&mut self.stream)
                        .await?;
                }
            }
            PeerCommand::Shutdown => unreachable!("handled by caller"),
        }
        Ok(())
    }

    async fn handle_message(
        &mut self,
        message: Message,
        events: &mpsc::UnboundedSender<(SocketAddr, PeerEvent)>,
    ) -> Result<()> {
        let arrived_during_bitfield_exchange = self.stage == Stage::BitfieldExchange;
        if arrived_during_bitfield_exchange && !matches!(message, Message::KeepAlive) {
            self.stage = Stage::Ready;
        }

        match message {
            Message::KeepAlive => {}
            Message::Choke => {
                self.status.peer_choking = true;
                let _ = events.send((self.addr, PeerEvent::Choked));
            }
            Message::Unchoke => {
                self.status.peer_choking = false;
                let _ = events.send((self.addr, PeerEvent::Unchoked));
            }
            Message::Interested => {
                self.status.peer_interested = true;
                let _ = events.send((self.addr, PeerEvent::PeerInterested(true)));
            }
            Message::NotInterested => {
                self.status.peer_interested = false;
                let _ = events.send((self.addr, PeerEvent::PeerInterested(false)));
            }
            Message::Have { index } => {
                if index as usize >= self.num_pieces {
                    return Err(PeerError::ProtocolViolation(format!(
                        "have index {index} out of range"
                    )));
                }
                self.remote_bitfield.set(index as usize);
                let _ = events.send((self.addr, PeerEvent::HaveReceived { index }));
            }
            Message::Bitfield(bitfield) => {
                if arrived_during_bitfield_exchange {
                    self.remote_bitfield = bitfield.clone();
                    let _ = events.send((self.addr, PeerEvent::BitfieldReceived { bitfield }));
                } else {
                    debug!("ignoring bitfield arriving outside the bitfield-exchange stage");
                }
            }
            Message::Request { index, begin, length } => {
                let _ = events.send((
                    self.addr,
                    PeerEvent::BlockRequested { index, begin, length },
                ));
            }
            Message::Piece { index, begin, block } => {
                let _ = events.send((self.addr, PeerEvent::BlockReceived { index, begin, block }));
            }
            Message::Cancel { .. } => {
                debug!("ignoring cancel message (no queued upload to cancel)");
            }
        }
        Ok(())
    }
}
