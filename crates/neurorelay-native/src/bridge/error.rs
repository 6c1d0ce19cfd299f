//! Stream acquisition errors

use thiserror::Error;

use neurorelay_core::ConfigError;

/// Stream acquisition error
#[derive(Debug, Error)]
pub enum StreamError {
    /// Discovery finished without a matching stream
    #[error("No {stream_type} streams found within {timeout_seconds} s")]
    NoStreamsFound {
        /// Requested stream type
        stream_type: String,
        /// Discovery timeout used
        timeout_seconds: f64,
    },

    /// A stream was found but attaching to it failed
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The transport failed while streaming
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation requires a connected source
    #[error("Stream source is not connected")]
    NotConnected,

    /// Sample and timestamp counts do not describe whole frames
    #[error("Shape mismatch: {samples} samples for {frames} frames of {channels} channels")]
    ShapeMismatch {
        /// Number of sample values supplied
        samples: usize,
        /// Number of timestamps supplied
        frames: usize,
        /// Expected channels per frame
        channels: usize,
    },

    /// The stream's parameters are unusable with the pipeline configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),

    /// Socket or file I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// True for discovery and attach failures
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::NoStreamsFound { .. } | Self::Connection(_))
    }
}

/// Result type for stream operations
pub type StreamResult<T> = Result<T, StreamError>;
