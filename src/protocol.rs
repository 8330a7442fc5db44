//! PREDICT satellite-tracking wire protocol.
//!
//! Requests and replies are newline-terminated text in single UDP datagrams.
//! One exchange is one send followed by a bounded wait for one reply; a
//! missing reply is reported and never retried within the same poll cycle.

use crate::sync::CancellationToken;
use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace};

pub const DEFAULT_SERVER: &str = "localhost:1210";
/// Largest datagram the server sends; a reply must fit strictly inside it.
pub const SERVER_MTU: usize = 1500;
/// PREDICT tracks at most 24 satellites.
pub const MAX_SATELLITES: usize = 24;
pub const MAX_NAME_LEN: usize = 32;
/// How often a pending exchange checks for a reply or cancellation.
pub const EXCHANGE_SLICE: Duration = Duration::from_millis(100);
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Reply field (1-based) carrying the visibility flag.
const VISIBILITY_FIELD: usize = 11;

pub type RequestBuffer = ArrayString<SERVER_MTU>;
pub type SatelliteName = ArrayString<MAX_NAME_LEN>;
pub type SatelliteList = heapless::Vec<SatelliteName, MAX_SATELLITES>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("tracking server {server} unavailable: {source}")]
    Unavailable {
        server: String,
        #[source]
        source: io::Error,
    },
    #[error("could not resolve tracking server {0}")]
    Unresolved(String),
    #[error("failed to send {request:?}: {source}")]
    Send {
        request: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to receive reply: {0}")]
    Receive(#[source] io::Error),
    #[error("no response to {request:?} within {waited:?}")]
    Timeout { request: String, waited: Duration },
    #[error("reply of {0} bytes does not fit in a 1500-byte datagram")]
    Oversized(usize),
    #[error("reply is not valid UTF-8")]
    NotUtf8,
    #[error("request does not fit in one datagram")]
    RequestTooLong,
    #[error("malformed reply: {0}")]
    Malformed(&'static str),
    #[error("reply is for {got:?}, expected {expected:?}")]
    UnexpectedReply { expected: String, got: String },
    #[error("exchange cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    GetList,
    GetSat(&'a str),
}

impl Request<'_> {
    pub fn encode(&self) -> Result<RequestBuffer, ProtocolError> {
        let mut buffer = RequestBuffer::new();
        let written = match self {
            Request::GetList => buffer.try_push_str("GET_LIST\n").map_err(|_| ()),
            Request::GetSat(name) => writeln!(buffer, "GET_SAT {}", name).map_err(|_| ()),
        };
        written.map_err(|()| ProtocolError::RequestTooLong)?;
        Ok(buffer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Visibility {
    Visible,
    #[default]
    Hidden,
}

impl From<char> for Visibility {
    fn from(flag: char) -> Self {
        if flag == 'V' {
            Visibility::Visible
        } else {
            Visibility::Hidden
        }
    }
}

/// One position report. Longitude is degrees west, latitude degrees north.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SatelliteFix {
    pub longitude: f32,
    pub latitude: f32,
    pub visibility: Visibility,
}

/// Split a `GET_LIST` reply into satellite names, one per line.
pub fn parse_satellite_list(reply: &str) -> SatelliteList {
    let mut names = SatelliteList::new();

    for line in reply.split('\n').map(|l| l.trim_end_matches('\r')) {
        if line.is_empty() {
            continue;
        }
        let Ok(name) = SatelliteName::from(line) else {
            debug!("skipping satellite with overlong name {:?}", line);
            continue;
        };
        if names.push(name).is_err() {
            debug!("satellite list truncated at {} entries", MAX_SATELLITES);
            break;
        }
    }

    names
}

/// Parse a `GET_SAT` reply. The first line is a free-form header; the
/// second holds whitespace-separated fields of which 1 (longitude),
/// 2 (latitude) and 11 (visibility flag) are used. Fields 3 to 10 must be
/// numeric for the reply to count as well formed.
pub fn parse_satellite_fix(reply: &str) -> Result<SatelliteFix, ProtocolError> {
    let (_, values) = reply
        .split_once('\n')
        .ok_or(ProtocolError::Malformed("missing value line"))?;

    let fields: Vec<&str> = values.split_whitespace().take(VISIBILITY_FIELD).collect();
    if fields.len() < VISIBILITY_FIELD {
        return Err(ProtocolError::Malformed("too few fields"));
    }

    let longitude = fields[0]
        .parse::<f32>()
        .map_err(|_| ProtocolError::Malformed("longitude"))?;
    let latitude = fields[1]
        .parse::<f32>()
        .map_err(|_| ProtocolError::Malformed("latitude"))?;

    if fields[2..VISIBILITY_FIELD - 1].iter().any(|f| f.parse::<f64>().is_err()) {
        return Err(ProtocolError::Malformed("non-numeric field"));
    }

    let flag = fields[VISIBILITY_FIELD - 1]
        .chars()
        .next()
        .ok_or(ProtocolError::Malformed("visibility"))?;

    Ok(SatelliteFix {
        longitude,
        latitude,
        visibility: Visibility::from(flag),
    })
}

/// PREDICT echoes the satellite name as the first line of a `GET_SAT` reply.
pub fn check_reply_header(name: &str, reply: &str) -> Result<(), ProtocolError> {
    let header = reply.split('\n').next().unwrap_or_default().trim();
    if header == name.trim() {
        Ok(())
    } else {
        Err(ProtocolError::UnexpectedReply {
            expected: name.to_string(),
            got: header.to_string(),
        })
    }
}

/// Equirectangular pixel position of a (degrees west, degrees north) fix on
/// a `width` x `height` map whose left edge is 180 degrees west.
pub fn project(longitude: f32, latitude: f32, width: u32, height: u32) -> (i32, i32) {
    let w = f64::from(width);
    let h = f64::from(height);
    let x = ((w - 1.0) * (540.0 - f64::from(longitude)) / 360.0).floor() as i64;
    let y = ((h - 1.0) * (90.0 - f64::from(latitude)) / 180.0).floor() as i64;
    (x.rem_euclid(i64::from(width.max(1))) as i32, y as i32)
}

/// A UDP socket connected to one tracking server.
#[derive(Debug)]
pub struct PredictLink {
    socket: UdpSocket,
    server: SocketAddr,
    timeout: Duration,
    receive: Box<[u8; SERVER_MTU]>,
}

impl PredictLink {
    pub fn connect(server: &str, timeout: Duration) -> Result<Self, ProtocolError> {
        let addresses: Vec<SocketAddr> = server
            .to_socket_addrs()
            .map_err(|source| ProtocolError::Unavailable {
                server: server.to_string(),
                source,
            })?
            .collect();
        // PREDICT listens on IPv4 only; prefer it when a name resolves to both
        let address = addresses
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addresses.first())
            .copied()
            .ok_or_else(|| ProtocolError::Unresolved(server.to_string()))?;

        let local: SocketAddr = if address.is_ipv4() {
            (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let unavailable = |source| ProtocolError::Unavailable {
            server: server.to_string(),
            source,
        };
        let socket = UdpSocket::bind(local).map_err(unavailable)?;
        socket.connect(address).map_err(unavailable)?;
        socket.set_read_timeout(Some(EXCHANGE_SLICE)).map_err(unavailable)?;

        debug!("tracking link {} -> {}", socket.local_addr().map_or_else(|_| "?".into(), |a| a.to_string()), address);

        Ok(Self {
            socket,
            server: address,
            timeout,
            receive: Box::new([0u8; SERVER_MTU]),
        })
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// One request/reply exchange: a single send, then wait in
    /// `EXCHANGE_SLICE` steps until a reply arrives, the timeout elapses, or
    /// `token` is cancelled.
    pub fn exchange(&mut self, request: Request<'_>, token: &CancellationToken) -> Result<String, ProtocolError> {
        let encoded = request.encode()?;
        self.discard_stale()?;
        self.socket
            .send(encoded.as_bytes())
            .map_err(|source| ProtocolError::Send {
                request: encoded.trim_end().to_string(),
                source,
            })?;

        let started = Instant::now();
        loop {
            if token.is_cancelled() {
                return Err(ProtocolError::Cancelled);
            }

            match self.socket.recv(&mut self.receive[..]) {
                Ok(len) if len >= SERVER_MTU => return Err(ProtocolError::Oversized(len)),
                Ok(len) => {
                    let reply = std::str::from_utf8(&self.receive[..len]).map_err(|_| ProtocolError::NotUtf8)?;
                    trace!("{:?} -> {} bytes", request, len);
                    return Ok(reply.to_string());
                }
                // A refused port shows up as an ICMP error on the next receive;
                // like silence, it only ends the exchange when the timeout does.
                Err(e) if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::ConnectionRefused
                ) => {}
                Err(e) => return Err(ProtocolError::Receive(e)),
            }

            let waited = started.elapsed();
            if waited >= self.timeout {
                return Err(ProtocolError::Timeout {
                    request: encoded.trim_end().to_string(),
                    waited,
                });
            }
        }
    }

    /// Drop replies that arrived after their exchange gave up, so they are
    /// not taken as the answer to the next request.
    fn discard_stale(&mut self) -> Result<(), ProtocolError> {
        self.socket.set_nonblocking(true).map_err(ProtocolError::Receive)?;
        let mut discarded = 0usize;
        let drained = loop {
            match self.socket.recv(&mut self.receive[..]) {
                Ok(_) => discarded += 1,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {}
                Err(e) => break Err(ProtocolError::Receive(e)),
            }
        };
        self.socket.set_nonblocking(false).map_err(ProtocolError::Receive)?;
        if discarded > 0 {
            debug!("discarded {} stale repl{}", discarded, if discarded == 1 { "y" } else { "ies" });
        }
        drained
    }

    pub fn satellite_list(&mut self, token: &CancellationToken) -> Result<SatelliteList, ProtocolError> {
        let reply = self.exchange(Request::GetList, token)?;
        Ok(parse_satellite_list(&reply))
    }

    pub fn satellite_fix(&mut self, name: &str, token: &CancellationToken) -> Result<SatelliteFix, ProtocolError> {
        let reply = self.exchange(Request::GetSat(name), token)?;
        check_reply_header(name, &reply)?;
        parse_satellite_fix(&reply)
    }
}
