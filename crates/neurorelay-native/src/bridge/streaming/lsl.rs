//! Lab Streaming Layer (LSL) compatible inlet
//!
//! Discovery uses multicast UDP, data uses TCP.
//!
//! # Protocol
//!
//! ```text
//! discovery   -> "LSL:shortinfo"                        (UDP, multicast)
//!             <- "LSL:shortinfo {json}"                 (UDP, unicast reply)
//! data link   <- "LSL:streaminfo/{len}:" + {len} bytes of stream XML
//!             <- [timestamp: f64 LE][sample: f32 LE × channels] ...
//! ```
//!
//! The JSON reply carries `name`, `type`, `channel_count`, `nominal_srate`
//! and the TCP `port`; channel labels come from `<label>` elements in the
//! stream XML.

use std::io::{ErrorKind, Read};
use std::net::{Ipv4Addr, SocketAddr, TcpStream, UdpSocket};
use std::time::{Duration, Instant};

use serde::Deserialize;

use super::{StreamMetadata, StreamQuery, Transport};
use crate::bridge::error::{StreamError, StreamResult};
use crate::bridge::ring_buffer::SampleBlock;

/// Default multicast address for LSL discovery
pub const LSL_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 183);

/// Default multicast port
pub const LSL_MULTICAST_PORT: u16 = 16571;

/// Discovery query and reply prefix
const SHORTINFO_PREFIX: &str = "LSL:shortinfo";

/// Stream info header prefix on the data link
const STREAMINFO_PREFIX: &[u8] = b"LSL:streaminfo/";

/// Largest stream info XML accepted
const MAX_STREAMINFO_LEN: usize = 1 << 20;

/// Bytes of the per-frame timestamp
const TIMESTAMP_BYTES: usize = 8;

/// A stream that answered discovery
#[derive(Clone, Debug, PartialEq)]
pub struct DiscoveredStream {
    /// Parsed reply
    pub info: ShortInfo,
    /// Data link address (reply source IP, advertised port)
    pub addr: SocketAddr,
}

/// Discovery reply payload
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ShortInfo {
    /// Stream name
    pub name: String,
    /// Content type (e.g. "EEG")
    #[serde(rename = "type")]
    pub stream_type: String,
    /// Channels per frame
    pub channel_count: usize,
    /// Nominal sample rate (Hz)
    pub nominal_srate: f64,
    /// Unique source id
    #[serde(default)]
    pub source_id: String,
    /// Publishing host
    #[serde(default)]
    pub hostname: String,
    /// TCP data port
    pub port: u16,
}

/// Parse a discovery reply; `None` for anything that is not one
#[must_use]
pub fn parse_shortinfo(reply: &str) -> Option<ShortInfo> {
    let body = reply.strip_prefix(SHORTINFO_PREFIX)?;
    let json = &body[body.find('{')?..];
    match serde_json::from_str(json) {
        Ok(info) => Some(info),
        Err(e) => {
            tracing::debug!("Ignoring malformed discovery reply: {}", e);
            None
        }
    }
}

/// Channel labels from the stream XML, in document order
#[must_use]
pub fn parse_channel_labels(xml: &str) -> Vec<String> {
    let Some(channels) = xml.find("<channels>").map(|start| &xml[start..]) else {
        return Vec::new();
    };
    let channels = channels.find("</channels>").map_or(channels, |end| &channels[..end]);

    let mut labels = Vec::new();
    let mut rest = channels;
    while let Some(open) = rest.find("<channel>") {
        rest = &rest[open + "<channel>".len()..];
        let end = rest.find("</channel>").unwrap_or(rest.len());
        let channel = &rest[..end];
        let label = channel
            .find("<label>")
            .and_then(|s| {
                let value = &channel[s + "<label>".len()..];
                value.find("</label>").map(|e| value[..e].trim().to_string())
            })
            .unwrap_or_default();
        labels.push(label);
        rest = &rest[end..];
    }
    labels
}

/// Connected data link
struct Inlet {
    stream: TcpStream,
    channel_count: usize,
    /// Bytes received but not yet forming a whole frame
    pending: Vec<u8>,
    read_buf: Vec<u8>,
}

impl Inlet {
    fn frame_bytes(&self) -> usize {
        TIMESTAMP_BYTES + 4 * self.channel_count
    }

    fn pending_frames(&self) -> usize {
        self.pending.len() / self.frame_bytes()
    }

    /// Decode up to `max_frames` whole frames from the front of `pending`
    fn drain_frames(&mut self, max_frames: usize) -> StreamResult<SampleBlock> {
        let frame_bytes = self.frame_bytes();
        let n = self.pending_frames().min(max_frames);
        let mut data = Vec::with_capacity(n * self.channel_count);
        let mut timestamps = Vec::with_capacity(n);

        for packet in self.pending[..n * frame_bytes].chunks_exact(frame_bytes) {
            let (ts, samples) = packet.split_at(TIMESTAMP_BYTES);
            let mut ts_bytes = [0u8; TIMESTAMP_BYTES];
            ts_bytes.copy_from_slice(ts);
            timestamps.push(f64::from_le_bytes(ts_bytes));
            data.extend(samples.chunks_exact(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])));
        }
        self.pending.drain(..n * frame_bytes);

        SampleBlock::new(self.channel_count, data, timestamps)
    }
}

/// LSL-compatible network inlet
pub struct LslTransport {
    discovery_addr: SocketAddr,
    inlet: Option<Inlet>,
}

impl Default for LslTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LslTransport {
    /// Inlet using the standard multicast discovery group
    #[must_use]
    pub fn new() -> Self {
        Self::with_discovery_addr(SocketAddr::new(LSL_MULTICAST_ADDR.into(), LSL_MULTICAST_PORT))
    }

    /// Inlet sending discovery queries to `addr`
    #[must_use]
    pub fn with_discovery_addr(addr: SocketAddr) -> Self {
        Self { discovery_addr: addr, inlet: None }
    }

    /// Query the network and collect replies of `stream_type`.
    ///
    /// Returns as soon as a stream named `preferred` answers, otherwise
    /// after `timeout`.
    ///
    /// # Errors
    ///
    /// Socket errors other than read timeouts.
    pub fn resolve(&self, stream_type: &str, preferred: Option<&str>, timeout: Duration) -> StreamResult<Vec<DiscoveredStream>> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.send_to(SHORTINFO_PREFIX.as_bytes(), self.discovery_addr)?;

        let mut streams: Vec<DiscoveredStream> = Vec::new();
        let start = Instant::now();
        let mut buf = [0u8; 4096];

        while let Some(remaining) = timeout.checked_sub(start.elapsed()).filter(|d| !d.is_zero()) {
            socket.set_read_timeout(Some(remaining))?;
            match socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    let Some(info) = std::str::from_utf8(&buf[..n]).ok().and_then(parse_shortinfo) else {
                        continue;
                    };
                    if info.stream_type != stream_type {
                        continue;
                    }
                    let addr = SocketAddr::new(from.ip(), info.port);
                    if streams.iter().any(|s| s.addr == addr) {
                        continue;
                    }
                    let done = preferred.is_some_and(|name| name == info.name);
                    streams.push(DiscoveredStream { info, addr });
                    if done {
                        break;
                    }
                }
                Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => break,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(streams)
    }

    /// Open the data link to a discovered stream and read its header.
    ///
    /// # Errors
    ///
    /// [`StreamError::Connection`] if the link cannot be opened or the
    /// header is malformed.
    pub fn attach(&mut self, stream: &DiscoveredStream, timeout: Duration) -> StreamResult<StreamMetadata> {
        let connect_timeout = timeout.max(Duration::from_millis(1));
        let mut tcp = TcpStream::connect_timeout(&stream.addr, connect_timeout)
            .map_err(|e| StreamError::Connection(format!("{}: {e}", stream.addr)))?;
        tcp.set_read_timeout(Some(connect_timeout))?;
        tcp.set_nodelay(true)?;

        let (xml, leftover) = read_streaminfo(&mut tcp)?;
        let labels = parse_channel_labels(&xml);

        let info = &stream.info;
        self.inlet = Some(Inlet {
            stream: tcp,
            channel_count: info.channel_count,
            pending: leftover,
            read_buf: vec![0u8; 64 * 1024],
        });

        Ok(StreamMetadata::new(
            info.name.clone(),
            info.stream_type.clone(),
            info.nominal_srate,
            info.channel_count,
            labels,
        ))
    }
}

/// Read `LSL:streaminfo/{len}:` and the XML that follows. Bytes past the
/// XML belong to the first frames and are returned as leftover.
fn read_streaminfo(tcp: &mut TcpStream) -> StreamResult<(String, Vec<u8>)> {
    let malformed = |what: &str| StreamError::Connection(format!("malformed stream header: {what}"));

    let mut received = Vec::new();
    let mut chunk = [0u8; 4096];
    let mut header: Option<(usize, usize)> = None;

    loop {
        if header.is_none() && received.len() >= STREAMINFO_PREFIX.len() {
            if !received.starts_with(STREAMINFO_PREFIX) {
                return Err(malformed("missing prefix"));
            }
            if let Some(colon) = received[STREAMINFO_PREFIX.len()..].iter().position(|&b| b == b':') {
                let digits = &received[STREAMINFO_PREFIX.len()..STREAMINFO_PREFIX.len() + colon];
                let len: usize = std::str::from_utf8(digits)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| malformed("bad length"))?;
                if len > MAX_STREAMINFO_LEN {
                    return Err(malformed("length too large"));
                }
                header = Some((STREAMINFO_PREFIX.len() + colon + 1, len));
            } else if received.len() > STREAMINFO_PREFIX.len() + 20 {
                return Err(malformed("length not terminated"));
            }
        }

        if let Some((start, len)) = header {
            if received.len() >= start + len {
                let xml = String::from_utf8_lossy(&received[start..start + len]).into_owned();
                let leftover = received.split_off(start + len);
                return Ok((xml, leftover));
            }
        }

        let n = tcp.read(&mut chunk).map_err(|e| StreamError::Connection(format!("reading stream header: {e}")))?;
        if n == 0 {
            return Err(malformed("connection closed"));
        }
        received.extend_from_slice(&chunk[..n]);
    }
}

impl Transport for LslTransport {
    fn kind(&self) -> &'static str {
        "lsl"
    }

    fn connect(&mut self, query: &StreamQuery, timeout: Duration) -> StreamResult<StreamMetadata> {
        tracing::info!("Looking for LSL streams of type '{}'...", query.stream_type);

        let streams = self.resolve(&query.stream_type, query.stream_name.as_deref(), timeout)?;
        let Some(first) = streams.first() else {
            return Err(StreamError::NoStreamsFound {
                stream_type: query.stream_type.clone(),
                timeout_seconds: timeout.as_secs_f64(),
            });
        };

        let chosen = match &query.stream_name {
            Some(name) => streams.iter().find(|s| &s.info.name == name).unwrap_or_else(|| {
                tracing::warn!("Stream '{}' not found, using first available '{}'", name, first.info.name);
                first
            }),
            None => first,
        };

        let meta = self.attach(chosen, timeout)?;
        tracing::info!(
            "Connected to LSL stream '{}': {} Hz, {} channels",
            meta.name,
            meta.sample_rate,
            meta.channel_count
        );
        Ok(meta)
    }

    fn pull_chunk(&mut self, timeout: Duration, max_frames: usize) -> StreamResult<SampleBlock> {
        let inlet = self.inlet.as_mut().ok_or(StreamError::NotConnected)?;

        if inlet.pending_frames() < max_frames {
            inlet.stream.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
            match inlet.stream.read(&mut inlet.read_buf) {
                Ok(0) => return Err(StreamError::Transport("stream closed by peer".to_string())),
                Ok(n) => {
                    let Inlet { pending, read_buf, .. } = inlet;
                    pending.extend_from_slice(&read_buf[..n]);
                }
                Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(e) => return Err(StreamError::Transport(e.to_string())),
            }
        }

        inlet.drain_frames(max_frames)
    }
}
