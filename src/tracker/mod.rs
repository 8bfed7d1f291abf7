//! HTTP tracker client: announces to the tracker named in a torrent's
//! `announce` URL and parses the bencoded peer list it returns.
//!
//! UDP trackers are an explicit non-goal; only HTTP(S) announce is
//! implemented.
use crate::bencode::{self, Value};
use crate::peer::PeerId;
use rand::Rng;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

pub mod backoff;

#[cfg(test)]
mod tests;

pub use backoff::Backoff;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker returned failure: {0}")]
    Failure(String),

    #[error("malformed tracker response: {0}")]
    Malformed(String),

    #[error("network error talking to tracker: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid announce URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("bencode error in tracker response: {0}")]
    Bencode(#[from] bencode::BencodeError),
}

pub type Result<T> = std::result::Result<T, TrackerError>;

/// An announce event, included on the first and final announces only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Started,
    Completed,
    Stopped,
}

impl Event {
    fn as_str(self) -> &'static str {
        match self {
            Event::Started => "started",
            Event::Completed => "completed",
            Event::Stopped => "stopped",
        }
    }
}

/// A peer address as returned by the tracker, compact or non-compact. Only
/// the non-compact dictionary form ever carries a `peer id`; compact entries
/// always leave it `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr {
    pub ip: IpAddr,
    pub port: u16,
    pub peer_id: Option<PeerId>,
}

#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    pub interval: u64,
    pub peers: Vec<PeerAddr>,
}

/// Parameters for a single announce request (spec 4.4).
pub struct AnnounceRequest<'a> {
    pub announce_url: &'a str,
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub event: Option<Event>,
}

pub struct Client {
    http: reqwest::Client,
}

impl Client {
    pub fn new() -> Self {
        Client {
            http: reqwest::Client::new(),
        }
    }

    #[instrument(skip(self, request), fields(url = request.announce_url))]
    pub async fn announce(&self, request: &AnnounceRequest<'_>) -> Result<AnnounceResponse> {
        let url = build_announce_url(request)?;
        debug!(%url, "sending tracker announce");
        let response = self.http.get(url).send().await?;
        let bytes = response.bytes().await?;
        parse_announce_response(&bytes)
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

fn build_announce_url(request: &AnnounceRequest<'_>) -> Result<url::Url> {
    let mut query = String::new();
    query.push_str("info_hash=");
    query.push_str(&url_encode_bytes(&request.info_hash));
    query.push_str("&peer_id=");
    query.push_str(&url_encode_bytes(&request.peer_id));
    query.push_str(&format!("&port={}", request.port));
    query.push_str(&format!("&uploaded={}", request.uploaded));
    query.push_str(&format!("&downloaded={}", request.downloaded));
    query.push_str(&format!("&left={}", request.left));
    query.push_str("&compact=1");
    if let Some(event) = request.event {
        query.push_str("&event=");
        query.push_str(event.as_str());
    }

    let mut url = url::Url::parse(request.announce_url)?;
    let existing = url.query().unwrap_or("");
    let combined = if existing.is_empty() {
        query
    } else {
        format!("{existing}&{query}")
    };
    url.set_query(Some(&combined));
    Ok(url)
}

/// Percent-encodes every byte not in the unreserved set, byte-by-byte —
/// this must operate on raw bytes (the info-hash is not necessarily valid
/// UTF-8), so a str-based percent-encoder is not an option here.
fn url_encode_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for &b in bytes {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(b as char);
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

fn parse_announce_response(bytes: &[u8]) -> Result<AnnounceResponse> {
    let value = bencode::decode_all(bytes)?;
    let dict = value
        .as_dict()
        .ok_or_else(|| TrackerError::Malformed("response is not a dictionary".into()))?;

    if let Some(reason) = dict.get(b"failure reason".as_slice()) {
        let reason = reason
            .as_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_else(|| "<non-string failure reason>".into());
        return Err(TrackerError::Failure(reason));
    }

    let interval = dict
        .get(b"interval".as_slice())
        .and_then(Value::as_int)
        .unwrap_or(0)
        .max(0) as u64;

    let peers = match dict.get(b"peers".as_slice()) {
        Some(Value::Bytes(compact)) => parse_compact_peers(compact)?,
        Some(Value::List(list)) => parse_dict_peers(list)?,
        _ => Vec::new(),
    };

    Ok(AnnounceResponse { interval, peers })
}

fn parse_compact_peers(bytes: &[u8]) -> Result<Vec<PeerAddr>> {
    if bytes.len() % 6 != 0 {
        return Err(TrackerError::Malformed(
            "compact peers field length is not a multiple of 6".into(),
        ));
    }
    Ok(bytes
        .chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            PeerAddr {
                ip: IpAddr::V4(ip),
                port,
                peer_id: None,
            }
        })
        .collect())
}

fn parse_dict_peers(list: &[Value]) -> Result<Vec<PeerAddr>> {
    let mut peers = Vec::with_capacity(list.len());
    for entry in list {
        let dict = entry
            .as_dict()
            .ok_or_else(|| TrackerError::Malformed("peer entry is not a dictionary".into()))?;
        let ip = dict
            .get(b"ip".as_slice())
            .and_then(Value::as_bytes)
            .ok_or_else(|| TrackerError::Malformed("peer entry missing ip".into()))?;
        let ip: IpAddr = std::str::from_utf8(ip)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| TrackerError::Malformed("peer ip is not a valid address".into()))?;
        let port = dict
            .get(b"port".as_slice())
            .and_then(Value::as_int)
            .ok_or_else(|| TrackerError::Malformed("peer entry missing port".into()))?;
        let peer_id = dict
            .get(b"peer id".as_slice())
            .and_then(Value::as_bytes)
            .and_then(|bytes| <[u8; 20]>::try_from(bytes).ok());
        peers.push(PeerAddr {
            ip,
            port: port as u16,
            peer_id,
        });
    }
    Ok(peers)
}

/// Generates a local peer-id: `prefix` followed by random bytes padding it
/// out to 20 bytes total. `prefix` is expected to already be Azureus-style
/// (e.g. `-RT0001-`); if it is 20 bytes or longer it is truncated.
pub fn generate_peer_id(prefix: &str) -> [u8; 20] {
    let mut id = [0u8; 20];
    let prefix_bytes = prefix.as_bytes();
    let prefix_len = prefix_bytes.len().min(20);
    id[..prefix_len].copy_from_slice(&prefix_bytes[..prefix_len]);
    let mut rng = rand::rng();
    rng.fill(&mut id[prefix_len..]);
    id
}

pub const DEFAULT_REANNOUNCE_INTERVAL: Duration = Duration::from_secs(30 * 60);
