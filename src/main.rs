//! Thin CLI driver: argument parsing, logging setup, and progress
//! rendering on top of the `rustorrent` library.
use anyhow::Context;
use clap::Parser;
use rustorrent::session::{Config, Session, SessionError};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// A BitTorrent client: downloads the content described by a `.torrent`
/// file into a destination directory.
#[derive(Debug, Parser)]
#[command(name = "rustorrent", version, about)]
struct Cli {
    /// Path to the `.torrent` metainfo file.
    torrent: PathBuf,

    /// Directory to write downloaded files into.
    destination: PathBuf,

    /// Local TCP port advertised to the tracker.
    #[arg(long, default_value_t = 6881)]
    port: u16,

    /// Maximum number of concurrent peer connections.
    #[arg(long, default_value_t = 50)]
    max_peers: usize,

    /// Maximum outstanding block requests per peer.
    #[arg(long, default_value_t = 5)]
    pipeline_depth: usize,

    /// Seconds of silence on a peer connection before it is dropped.
    #[arg(long, default_value_t = 120)]
    idle_timeout: u64,

    /// Seconds a block may stay in flight before its slot is reusable.
    #[arg(long, default_value_t = 60)]
    block_timeout: u64,

    /// Azureus-style client identifier prefix embedded in the peer-id.
    #[arg(long, default_value = "-RT0001-")]
    peer_id_prefix: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    runtime.block_on(run())
}

async fn run() -> ExitCode {
    let cli = Cli::parse();

    let metainfo_bytes = match std::fs::read(&cli.torrent).context("reading torrent file") {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ExitCode::from(4);
        }
    };

    let config = Config {
        port: cli.port,
        max_peers: cli.max_peers,
        pipeline_depth: cli.pipeline_depth,
        idle_timeout_s: cli.idle_timeout,
        block_timeout_s: cli.block_timeout,
        peer_id_prefix: cli.peer_id_prefix,
    };

    let mut session = match Session::open(&metainfo_bytes, cli.destination, config) {
        Ok(session) => session,
        Err(err) => return exit_for(&err),
    };

    let progress_task = tokio::spawn(render_progress(session.progress_handle()));

    let result = session.run_until_complete().await;
    progress_task.abort();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => exit_for(&err),
    }
}

async fn render_progress(handle: rustorrent::session::ProgressHandle) {
    let mut ticker = tokio::time::interval(Duration::from_secs(2));
    loop {
        ticker.tick().await;
        let progress = handle.progress();
        println!(
            "{}/{} pieces, {}/{} bytes",
            progress.verified_pieces, progress.total_pieces, progress.verified_bytes, progress.total_bytes
        );
    }
}

fn exit_for(err: &SessionError) -> ExitCode {
    eprintln!("error: {err}");
    let code = match err {
        SessionError::Bencode(_) | SessionError::MetainfoInvalid(_) => 2,
        SessionError::TrackerFailure { .. } | SessionError::TrackerNetwork(_) => 3,
        SessionError::StorageIo(_) | SessionError::PeerIo(_) => 4,
        SessionError::Interrupted => 5,
        SessionError::PeerProtocolViolation(_) | SessionError::HashMismatch => 4,
    };
    ExitCode::from(code)
}
