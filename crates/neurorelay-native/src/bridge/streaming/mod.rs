//! Upstream sample transports
//!
//! A [`Transport`] is the capability a stream source is built on: find and
//! attach to a stream, then hand over whatever frames are ready.
//!
//! - [`lsl`]: Lab Streaming Layer compatible network inlet
//! - [`synthetic`]: Deterministic SSVEP signal generator
//!
//! ```rust,ignore
//! use neurorelay_native::bridge::streaming::{StreamQuery, SyntheticConfig, SyntheticTransport, Transport};
//!
//! let mut transport = SyntheticTransport::new(SyntheticConfig::default());
//! let meta = transport.connect(&StreamQuery::default(), Duration::from_secs(1))?;
//! let block = transport.pull_chunk(Duration::from_millis(100), 256)?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use neurorelay_core::config::StreamConfig;

use super::error::StreamResult;
use super::ring_buffer::SampleBlock;

pub mod lsl;
pub mod synthetic;

pub use lsl::LslTransport;
pub use synthetic::{SyntheticConfig, SyntheticTransport};

/// Which stream to attach to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamQuery {
    /// Required stream type (e.g. "EEG")
    pub stream_type: String,
    /// Preferred stream name; other streams of the type are a fall-back
    pub stream_name: Option<String>,
}

impl Default for StreamQuery {
    fn default() -> Self {
        Self { stream_type: "EEG".to_string(), stream_name: None }
    }
}

impl From<&StreamConfig> for StreamQuery {
    fn from(config: &StreamConfig) -> Self {
        Self {
            stream_type: config.stream_type.clone(),
            stream_name: config.stream_name.clone(),
        }
    }
}

/// Description of an attached stream
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamMetadata {
    /// Stream name
    pub name: String,
    /// Stream content type
    pub stream_type: String,
    /// Nominal sample rate (Hz)
    pub sample_rate: f64,
    /// Channels per frame
    pub channel_count: usize,
    /// One name per channel
    pub channel_names: Vec<String>,
}

impl StreamMetadata {
    /// Metadata with channel names completed to `channel_count` entries.
    ///
    /// Missing or blank names become `Ch{index}`; extra names are dropped.
    #[must_use]
    pub fn new(name: String, stream_type: String, sample_rate: f64, channel_count: usize, names: Vec<String>) -> Self {
        let channel_names = (0..channel_count)
            .map(|i| {
                names
                    .get(i)
                    .map(|n| n.trim())
                    .filter(|n| !n.is_empty())
                    .map_or_else(|| placeholder_name(i), ToString::to_string)
            })
            .collect();

        Self { name, stream_type, sample_rate, channel_count, channel_names }
    }
}

/// Name used for a channel the transport did not label
#[must_use]
pub fn placeholder_name(index: usize) -> String {
    format!("Ch{index}")
}

/// Upstream source of multichannel frames.
///
/// `connect` is called once, on the caller's thread; afterwards the
/// transport is moved to the acquisition thread and only `pull_chunk` is
/// called.
pub trait Transport: Send {
    /// Short name for logs (e.g. "lsl")
    fn kind(&self) -> &'static str;

    /// Discover and attach to a stream matching `query` within `timeout`.
    ///
    /// # Errors
    ///
    /// [`StreamError::NoStreamsFound`](super::StreamError::NoStreamsFound)
    /// if nothing matches, [`StreamError::Connection`](super::StreamError::Connection)
    /// if attaching fails.
    fn connect(&mut self, query: &StreamQuery, timeout: Duration) -> StreamResult<StreamMetadata>;

    /// Wait up to `timeout` for frames and return at most `max_frames`.
    ///
    /// An empty block means nothing was ready and is not an error.
    ///
    /// # Errors
    ///
    /// Any error is treated as fatal for the stream.
    fn pull_chunk(&mut self, timeout: Duration, max_frames: usize) -> StreamResult<SampleBlock>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn kind(&self) -> &'static str {
        (**self).kind()
    }

    fn connect(&mut self, query: &StreamQuery, timeout: Duration) -> StreamResult<StreamMetadata> {
        (**self).connect(query, timeout)
    }

    fn pull_chunk(&mut self, timeout: Duration, max_frames: usize) -> StreamResult<SampleBlock> {
        (**self).pull_chunk(timeout, max_frames)
    }
}
