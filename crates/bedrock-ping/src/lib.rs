//! Minecraft Bedrock server status over RakNet unconnected ping.
//!
//! One datagram out, one datagram back: the reply carries a `;`-separated
//! status line (MOTD, version, player counts, ports) decoded into [`Pong`].
//! There is no retry here; callers decide how often to ask.

mod types;

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::net::UdpSocket;
use tracing::debug;

pub use types::*;

/// Port a Bedrock dedicated server listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 19132;

const ID_UNCONNECTED_PING: u8 = 0x01;
const ID_UNCONNECTED_PONG: u8 = 0x1c;

/// RakNet "offline message" magic, present in every unconnected packet.
const MAGIC: [u8; 16] = [
    0x00, 0xff, 0xff, 0x00, 0xfe, 0xfe, 0xfe, 0xfe, 0xfd, 0xfd, 0xfd, 0xfd, 0x12, 0x34, 0x56, 0x78,
];

// id + time + server guid + magic + payload length
const PONG_HEADER_LEN: usize = 1 + 8 + 8 + 16 + 2;

const MAX_DATAGRAM: usize = 1500;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("ping io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no address found for {0}")]
    Resolve(String),

    #[error("no pong within {0:?}")]
    Timeout(Duration),

    #[error("malformed pong: {0}")]
    Malformed(String),

    #[error("unexpected pong payload ({found} fields): {payload}")]
    MissingFields { found: usize, payload: String },

    #[error("unknown edition: {0}")]
    UnknownEdition(String),

    #[error("field {field} is not a number: {value:?}")]
    InvalidNumber { field: &'static str, value: String },
}

impl Error {
    /// True when the server answered but the answer could not be decoded.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::Malformed(_)
                | Self::MissingFields { .. }
                | Self::UnknownEdition(_)
                | Self::InvalidNumber { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Send one unconnected ping to `host:port` and wait up to `timeout` for the pong.
pub async fn ping(host: &str, port: u16, timeout: Duration) -> Result<Pong> {
    match tokio::time::timeout(timeout, exchange(host, port)).await {
        Ok(result) => result,
        Err(_) => {
            debug!(host, port, "ping timed out");
            Err(Error::Timeout(timeout))
        }
    }
}

async fn exchange(host: &str, port: u16) -> Result<Pong> {
    let target = tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| Error::Resolve(format!("{host}:{port}")))?;

    let local: SocketAddr = if target.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(target).await?;

    socket
        .send(&encode_ping(now_millis(), rand::random::<i64>()))
        .await?;

    let mut buf = vec![0u8; MAX_DATAGRAM];
    let n = socket.recv(&mut buf).await?;
    decode_pong(&buf[..n])
}

/// Build an unconnected ping datagram.
pub fn encode_ping(time_ms: i64, client_guid: i64) -> Vec<u8> {
    let mut packet = Vec::with_capacity(1 + 8 + 16 + 8);
    packet.push(ID_UNCONNECTED_PING);
    packet.extend_from_slice(&time_ms.to_be_bytes());
    packet.extend_from_slice(&MAGIC);
    packet.extend_from_slice(&client_guid.to_be_bytes());
    packet
}

/// Decode an unconnected pong datagram into its status payload.
pub fn decode_pong(frame: &[u8]) -> Result<Pong> {
    if frame.len() < PONG_HEADER_LEN {
        return Err(Error::Malformed(format!("{} byte frame", frame.len())));
    }
    if frame[0] != ID_UNCONNECTED_PONG {
        return Err(Error::Malformed(format!("packet id {:#04x}", frame[0])));
    }
    if frame[17..33] != MAGIC {
        return Err(Error::Malformed("bad offline message magic".into()));
    }

    let len = u16::from_be_bytes([frame[33], frame[34]]) as usize;
    let payload = frame
        .get(PONG_HEADER_LEN..PONG_HEADER_LEN + len)
        .ok_or_else(|| Error::Malformed(format!("payload length {len} exceeds frame")))?;
    let payload = std::str::from_utf8(payload)
        .map_err(|e| Error::Malformed(format!("payload is not text: {e}")))?;

    Pong::parse(payload)
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
