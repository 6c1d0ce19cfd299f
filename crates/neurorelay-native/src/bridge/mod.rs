//! Acquisition bridge
//!
//! Moves samples from an upstream transport to the detector:
//! - [`streaming`]: Transport capability and its LSL / synthetic implementations
//! - [`ring_buffer`]: Bounded, thread-safe store of recent frames
//! - [`source`]: Background acquisition thread feeding the ring buffer
//! - [`live`]: Periodic detection on the latest window
//!
//! # Data Flow
//!
//! ```text
//! Transport --pull_chunk--> [acquisition thread] --append--> RingBuffer
//!                                                               |
//!                              control thread --get_latest--> SsvepDetector
//! ```
//!
//! The ring buffer is the only object shared between the two threads.

pub mod error;
pub mod live;
pub mod ring_buffer;
pub mod source;
pub mod streaming;

// Re-export key types
pub use error::{StreamError, StreamResult};
pub use live::{LivePredictor, LiveStatus, PipelineEvent};
pub use ring_buffer::{RingBuffer, SampleBlock};
pub use source::{SourceStatus, StreamSource};
pub use streaming::{
    LslTransport, StreamMetadata, StreamQuery, SyntheticConfig, SyntheticTransport, Transport,
};
