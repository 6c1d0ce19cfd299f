//! Commit event dispatch
//!
//! A committed selection leaves the engine as one JSON object per line:
//!
//! ```json
//! {"ts":"2025-09-02T12:00:00.000Z","decoder":{"type":"SSVEP","version":"0.1.0"},
//!  "intent":{"name":"SELECT","args":{"label":"SUMMARIZE","index":0}},
//!  "confidence":0.85,"frequency":8.57,"context":{}}
//! ```
//!
//! The line is serialized completely before a single write, so a reader
//! never sees a partial event.

use std::io::Write;
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use neurorelay_core::types::CommitEvent;

/// Decoder name carried in every event
pub const DECODER_TYPE: &str = "SSVEP";

/// Intent name of a tile selection
pub const SELECT_INTENT: &str = "SELECT";

// ============================================================================
// Error Types
// ============================================================================

/// Dispatch error
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Writing the event failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The event could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;

// ============================================================================
// Event Record
// ============================================================================

/// Decoder identification
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderInfo {
    /// Decoder kind
    #[serde(rename = "type")]
    pub kind: String,
    /// Decoder version
    pub version: String,
}

/// Arguments of a SELECT intent
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectArgs {
    /// Selected label
    pub label: String,
    /// Selected tile index
    pub index: usize,
}

/// Intent carried by the event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    /// Intent name
    pub name: String,
    /// Intent arguments
    pub args: SelectArgs,
}

/// One line of the event stream
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectionRecord {
    /// UTC wall-clock time, ISO 8601 with milliseconds
    pub ts: String,
    /// Producing decoder
    pub decoder: DecoderInfo,
    /// What was selected
    pub intent: Intent,
    /// Winner confidence at commit
    pub confidence: f64,
    /// Stimulation frequency of the selected tile (Hz)
    pub frequency: f64,
    /// Free-form context for the consumer
    pub context: serde_json::Value,
}

impl SelectionRecord {
    /// Build the record for `event` stamped with `at`
    #[must_use]
    pub fn new(event: &CommitEvent, at: SystemTime, version: &str, context: serde_json::Value) -> Self {
        Self {
            ts: format_utc(at),
            decoder: DecoderInfo { kind: DECODER_TYPE.to_string(), version: version.to_string() },
            intent: Intent {
                name: SELECT_INTENT.to_string(),
                args: SelectArgs { label: event.label.clone(), index: event.index },
            },
            confidence: event.confidence,
            frequency: event.frequency,
            context,
        }
    }
}

// ============================================================================
// Dispatchers
// ============================================================================

/// Consumer of committed selections
pub trait CommandDispatcher {
    /// Hand one commit to the downstream consumer.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the event could not be delivered.
    fn dispatch(&mut self, event: &CommitEvent) -> DispatchResult<()>;
}

/// Writes each commit as a JSON line
pub struct JsonlDispatcher<W: Write> {
    writer: W,
    version: String,
    context: serde_json::Value,
    dispatched: u64,
}

impl<W: Write> JsonlDispatcher<W> {
    /// Dispatcher writing to `writer`, stamped with this crate's version
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            version: env!("CARGO_PKG_VERSION").to_string(),
            context: serde_json::Value::Object(serde_json::Map::new()),
            dispatched: 0,
        }
    }

    /// Attach a context object to every event
    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    /// Events written so far
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Write `event` stamped with `at`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if encoding or writing fails.
    pub fn dispatch_at(&mut self, event: &CommitEvent, at: SystemTime) -> DispatchResult<()> {
        let record = SelectionRecord::new(event, at, &self.version, self.context.clone());
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        self.writer.write_all(&line)?;
        self.writer.flush()?;
        self.dispatched += 1;

        tracing::info!("Dispatched SELECT {} (index {}, confidence {:.3})", event.label, event.index, event.confidence);
        Ok(())
    }

    /// Consume the dispatcher and return the writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> CommandDispatcher for JsonlDispatcher<W> {
    fn dispatch(&mut self, event: &CommitEvent) -> DispatchResult<()> {
        self.dispatch_at(event, SystemTime::now())
    }
}

/// `YYYY-MM-DDTHH:MM:SS.mmmZ` in UTC
#[must_use]
pub fn format_utc(at: SystemTime) -> String {
    DateTime::<Utc>::from(at).to_rfc3339_opts(SecondsFormat::Millis, true)
}
