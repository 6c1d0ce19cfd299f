//! Stream source: background acquisition into a ring buffer
//!
//! ```text
//! Disconnected --connect--> Connected --start--> Streaming --stop--> Stopped
//!                                                    |
//!                                              hard error
//!                                                    v
//!                                              Failed(reason)
//! ```
//!
//! The acquisition thread owns the transport while streaming and hands it
//! back when it exits, so a stopped source can be started again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use neurorelay_core::config::StreamConfig;

use super::error::{StreamError, StreamResult};
use super::live::PipelineEvent;
use super::ring_buffer::{RingBuffer, SampleBlock};
use super::streaming::{StreamMetadata, StreamQuery, Transport};

/// How often `stop()` checks whether the acquisition thread has exited
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Acquisition status
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceStatus {
    /// No stream attached
    Disconnected,
    /// Attached, not acquiring
    Connected,
    /// Acquisition thread running
    Streaming,
    /// Acquisition stopped on request
    Stopped,
    /// Acquisition ended by a transport error
    Failed(String),
}

impl SourceStatus {
    /// True while the acquisition thread is expected to be running
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }

    /// True while buffered data describes the attached stream
    #[must_use]
    pub fn has_live_data(&self) -> bool {
        matches!(self, Self::Connected | Self::Streaming | Self::Stopped)
    }
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connected => write!(f, "connected"),
            Self::Streaming => write!(f, "streaming"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Status cell shared with the acquisition thread
#[derive(Clone)]
struct StatusCell {
    status: Arc<Mutex<SourceStatus>>,
    events: Option<mpsc::UnboundedSender<PipelineEvent>>,
}

impl StatusCell {
    fn get(&self) -> SourceStatus {
        self.status.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Store `status` and publish it if it changed
    fn set(&self, status: SourceStatus) {
        {
            let mut current = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            if *current == status {
                return;
            }
            current.clone_from(&status);
        }
        tracing::debug!("Stream source status: {}", status);
        if let Some(events) = &self.events {
            // Receiver gone means nobody is listening
            let _ = events.send(PipelineEvent::StatusChanged(status));
        }
    }
}

/// Live stream source.
///
/// Owns the transport, the ring buffer and the acquisition thread.
pub struct StreamSource {
    config: StreamConfig,
    /// `None` while the acquisition thread holds it
    transport: Option<Box<dyn Transport>>,
    kind: &'static str,
    metadata: Option<StreamMetadata>,
    buffer: Option<Arc<RingBuffer>>,
    status: StatusCell,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<Box<dyn Transport>>>,
}

impl StreamSource {
    /// Create a source over `transport`
    #[must_use]
    pub fn new(transport: Box<dyn Transport>, config: StreamConfig) -> Self {
        let kind = transport.kind();
        Self {
            config,
            transport: Some(transport),
            kind,
            metadata: None,
            buffer: None,
            status: StatusCell { status: Arc::new(Mutex::new(SourceStatus::Disconnected)), events: None },
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Publish status changes on `events`
    #[must_use]
    pub fn with_events(mut self, events: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        self.status.events = Some(events);
        self
    }

    /// Source configuration
    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> SourceStatus {
        self.status.get()
    }

    /// Attached stream, if connected
    #[must_use]
    pub fn info(&self) -> Option<&StreamMetadata> {
        self.metadata.as_ref()
    }

    /// Frames currently buffered
    #[must_use]
    pub fn buffered_frames(&self) -> usize {
        self.buffer.as_ref().map_or(0, |b| b.len())
    }

    /// Discover and attach to a stream, allocating the ring buffer.
    ///
    /// # Errors
    ///
    /// - [`StreamError::NoStreamsFound`] / [`StreamError::Connection`] from
    ///   the transport
    /// - [`StreamError::Connection`] if the stream has no usable sample rate
    ///   or no channels
    /// - [`StreamError::NotConnected`] if called while streaming
    pub fn connect(&mut self) -> StreamResult<&StreamMetadata> {
        if self.handle.is_some() {
            return Err(StreamError::NotConnected);
        }
        let transport = self.transport.as_mut().ok_or(StreamError::NotConnected)?;

        let query = StreamQuery::from(&self.config);
        let meta = transport.connect(&query, self.config.timeout())?;

        if !(meta.sample_rate.is_finite() && meta.sample_rate > 0.0) {
            return Err(StreamError::Connection(format!(
                "stream '{}' has irregular sample rate {}",
                meta.name, meta.sample_rate
            )));
        }
        if meta.channel_count == 0 {
            return Err(StreamError::Connection(format!("stream '{}' has no channels", meta.name)));
        }

        let capacity = self.config.buffer_capacity(meta.sample_rate);
        tracing::info!(
            "Connected to {} stream '{}': {} Hz, {} channels {:?}, buffer {} frames",
            self.kind,
            meta.name,
            meta.sample_rate,
            meta.channel_count,
            meta.channel_names,
            capacity
        );

        self.buffer = Some(Arc::new(RingBuffer::new(capacity, meta.channel_count)));
        self.status.set(SourceStatus::Connected);
        Ok(self.metadata.insert(meta))
    }

    /// Launch the acquisition thread. Calling it while streaming is a no-op.
    ///
    /// # Errors
    ///
    /// [`StreamError::NotConnected`] before a successful `connect()`, or
    /// [`StreamError::Io`] if the thread cannot be spawned.
    pub fn start(&mut self) -> StreamResult<()> {
        if self.handle.is_some() && self.running.load(Ordering::Acquire) {
            return Ok(());
        }
        // A previous thread that ended on its own
        if let Some(handle) = self.handle.take() {
            self.join_worker(handle);
        }

        let buffer = self.buffer.clone().ok_or(StreamError::NotConnected)?;
        let transport = self.transport.take().ok_or(StreamError::NotConnected)?;

        if matches!(self.status.get(), SourceStatus::Failed(_)) {
            buffer.clear();
        }

        let worker = AcquisitionWorker {
            transport,
            buffer,
            running: Arc::clone(&self.running),
            status: self.status.clone(),
            pull_timeout: self.config.pull_timeout(),
            max_chunk: self.config.max_chunk_size.max(1),
        };

        self.running.store(true, Ordering::Release);
        self.status.set(SourceStatus::Streaming);

        let spawned = std::thread::Builder::new().name("neurorelay-acquisition".to_string()).spawn(move || worker.run());
        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Acquisition started");
                Ok(())
            }
            Err(e) => {
                // The transport moved into the failed closure and is gone
                self.running.store(false, Ordering::Release);
                self.status.set(SourceStatus::Failed(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Signal the acquisition thread to exit and wait up to the join
    /// timeout. A thread that does not exit in time is detached. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);

        let Some(handle) = self.handle.take() else {
            return;
        };
        self.join_worker(handle);

        if self.status.get().is_streaming() {
            self.status.set(SourceStatus::Stopped);
        }
        tracing::info!("Acquisition stopped");
    }

    /// Stop and drop the stream and its buffer
    pub fn disconnect(&mut self) {
        self.stop();
        self.metadata = None;
        self.buffer = None;
        self.status.set(SourceStatus::Disconnected);
    }

    /// The most recent `seconds` of data with the stream description;
    /// `None` if not connected, failed, or nothing has arrived yet
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn get_latest_data(&self, seconds: f64) -> Option<(SampleBlock, &StreamMetadata)> {
        if !self.status.get().has_live_data() {
            return None;
        }
        let meta = self.metadata.as_ref()?;
        let buffer = self.buffer.as_ref()?;
        let frames = (seconds.max(0.0) * meta.sample_rate) as usize;
        buffer.get_latest(frames).map(|block| (block, meta))
    }

    /// Wait up to the join timeout for an acquisition thread whose running
    /// flag is cleared and take back its transport; detach it otherwise
    fn join_worker(&mut self, handle: JoinHandle<Box<dyn Transport>>) {
        let deadline = Instant::now() + self.config.join_timeout();
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(JOIN_POLL_INTERVAL);
        }

        if handle.is_finished() {
            match handle.join() {
                Ok(transport) => self.transport = Some(transport),
                Err(_) => tracing::warn!("Acquisition thread panicked"),
            }
        } else {
            tracing::warn!(
                "Acquisition thread did not stop within {:?}, detaching it",
                self.config.join_timeout()
            );
        }
    }
}

impl Drop for StreamSource {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

// ============================================================================
// Acquisition Thread
// ============================================================================

struct AcquisitionWorker {
    transport: Box<dyn Transport>,
    buffer: Arc<RingBuffer>,
    running: Arc<AtomicBool>,
    status: StatusCell,
    pull_timeout: Duration,
    max_chunk: usize,
}

impl AcquisitionWorker {
    fn run(mut self) -> Box<dyn Transport> {
        let mut frames: u64 = 0;

        while self.running.load(Ordering::Acquire) {
            let result = self
                .transport
                .pull_chunk(self.pull_timeout, self.max_chunk)
                .and_then(|block| self.buffer.append_block(&block).map(|()| block.len()));

            match result {
                Ok(n) => frames += n as u64,
                Err(e) => {
                    tracing::warn!("Acquisition failed after {} frames: {}", frames, e);
                    self.running.store(false, Ordering::Release);
                    self.status.set(SourceStatus::Failed(e.to_string()));
                    break;
                }
            }
        }

        tracing::debug!("Acquisition thread exiting after {} frames", frames);
        self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays scripted pulls, then returns empty blocks
    struct ScriptedTransport {
        rate: f64,
        channels: usize,
        script: VecDeque<StreamResult<SampleBlock>>,
        connect_error: bool,
        pull_delay: Duration,
    }

    impl ScriptedTransport {
        fn new(script: Vec<StreamResult<SampleBlock>>) -> Self {
            Self {
                rate: 100.0,
                channels: 2,
                script: script.into(),
                connect_error: false,
                pull_delay: Duration::ZERO,
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn kind(&self) -> &'static str {
            "scripted"
        }

        fn connect(&mut self, query: &StreamQuery, timeout: Duration) -> StreamResult<StreamMetadata> {
            if self.connect_error {
                return Err(StreamError::NoStreamsFound {
                    stream_type: query.stream_type.clone(),
                    timeout_seconds: timeout.as_secs_f64(),
                });
            }
            Ok(StreamMetadata::new("scripted".into(), "EEG".into(), self.rate, self.channels, Vec::new()))
        }

        fn pull_chunk(&mut self, timeout: Duration, _max_frames: usize) -> StreamResult<SampleBlock> {
            std::thread::sleep(self.pull_delay);
            match self.script.pop_front() {
                Some(item) => item,
                None => {
                    std::thread::sleep(timeout);
                    Ok(SampleBlock::empty(self.channels))
                }
            }
        }
    }

    /// Two-channel block of frames `start..start+n`
    fn block(start: usize, n: usize) -> SampleBlock {
        let data = (start..start + n).flat_map(|i| [i as f32, -(i as f32)]).collect();
        let timestamps = (start..start + n).map(|i| i as f64 / 100.0).collect();
        SampleBlock::new(2, data, timestamps).unwrap()
    }

    fn config() -> StreamConfig {
        StreamConfig { buffer_seconds: 1.0, pull_timeout_ms: 5, join_timeout_ms: 500, ..Default::default() }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_connect_failure() {
        let mut transport = ScriptedTransport::new(Vec::new());
        transport.connect_error = true;
        let mut source = StreamSource::new(Box::new(transport), config());

        let err = source.connect().unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(source.status(), SourceStatus::Disconnected);
        assert!(source.info().is_none());
        assert!(source.get_latest_data(1.0).is_none());
    }

    #[test]
    fn test_start_requires_connect() {
        let mut source = StreamSource::new(Box::new(ScriptedTransport::new(Vec::new())), config());
        assert!(matches!(source.start(), Err(StreamError::NotConnected)));
    }

    #[test]
    fn test_placeholder_channel_names() {
        let mut source = StreamSource::new(Box::new(ScriptedTransport::new(Vec::new())), config());
        let meta = source.connect().unwrap();
        assert_eq!(meta.channel_names, vec!["Ch0", "Ch1"]);
        assert_eq!(source.status(), SourceStatus::Connected);
    }

    #[test]
    fn test_acquisition_with_empty_pulls() {
        let script = vec![
            Ok(block(0, 40)),
            Ok(SampleBlock::empty(2)),
            Ok(block(40, 40)),
            Ok(SampleBlock::empty(2)),
            Ok(block(80, 50)),
        ];
        let mut source = StreamSource::new(Box::new(ScriptedTransport::new(script)), config());
        source.connect().unwrap();
        source.start().unwrap();
        assert_eq!(source.status(), SourceStatus::Streaming);

        // Capacity is one second at 100 Hz
        assert!(wait_for(|| source.buffered_frames() == 100));
        let (latest, meta) = source.get_latest_data(0.1).unwrap();
        assert_eq!(meta.sample_rate, 100.0);
        assert_eq!(latest.len(), 10);
        assert_eq!(latest.timestamps()[0], 1.2);
        assert_eq!(latest.frame(9), Some(&[129.0_f32, -129.0][..]));

        source.stop();
        assert_eq!(source.status(), SourceStatus::Stopped);
        source.stop();
        assert_eq!(source.status(), SourceStatus::Stopped);
        // Data stays readable after stopping
        assert!(source.get_latest_data(1.0).is_some());
    }

    #[test]
    fn test_hard_error_marks_failed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let script = vec![Ok(block(0, 10)), Err(StreamError::Transport("cable pulled".to_string()))];
        let mut source = StreamSource::new(Box::new(ScriptedTransport::new(script)), config()).with_events(tx);
        source.connect().unwrap();
        source.start().unwrap();

        assert!(wait_for(|| matches!(source.status(), SourceStatus::Failed(_))));
        assert_eq!(source.buffered_frames(), 10);
        // Frames from a dead stream are not served
        assert!(source.get_latest_data(1.0).is_none());

        let mut statuses = Vec::new();
        while let Ok(PipelineEvent::StatusChanged(status)) = rx.try_recv() {
            statuses.push(status);
        }
        assert_eq!(statuses[0], SourceStatus::Connected);
        assert_eq!(statuses[1], SourceStatus::Streaming);
        assert!(matches!(&statuses[2], SourceStatus::Failed(reason) if reason.contains("cable pulled")));

        // Failure is not overwritten by stop
        source.stop();
        assert!(matches!(source.status(), SourceStatus::Failed(_)));
    }

    #[test]
    fn test_restart_right_after_failure() {
        for _ in 0..20 {
            let script = vec![Ok(block(0, 10)), Err(StreamError::Transport("glitch".to_string()))];
            let mut source = StreamSource::new(Box::new(ScriptedTransport::new(script)), config());
            source.connect().unwrap();
            source.start().unwrap();
            assert!(wait_for(|| matches!(source.status(), SourceStatus::Failed(_))));

            // The exiting thread hands the transport back before the restart
            source.start().unwrap();
            assert_eq!(source.status(), SourceStatus::Streaming);
            assert_eq!(source.buffered_frames(), 0);
            assert!(source.get_latest_data(1.0).is_none());
            source.stop();
        }
    }

    #[test]
    fn test_shape_mismatch_is_fatal() {
        let wrong = SampleBlock::new(3, vec![0.0; 3], vec![0.0]).unwrap();
        let mut source = StreamSource::new(Box::new(ScriptedTransport::new(vec![Ok(wrong)])), config());
        source.connect().unwrap();
        source.start().unwrap();
        assert!(wait_for(|| matches!(source.status(), SourceStatus::Failed(_))));
    }

    #[test]
    fn test_restart_after_stop() {
        let mut source = StreamSource::new(Box::new(ScriptedTransport::new(vec![Ok(block(0, 5))])), config());
        source.connect().unwrap();
        source.start().unwrap();
        assert!(wait_for(|| source.buffered_frames() == 5));
        source.stop();

        source.start().unwrap();
        assert_eq!(source.status(), SourceStatus::Streaming);
        source.stop();
        assert_eq!(source.status(), SourceStatus::Stopped);
    }

    #[test]
    fn test_stop_detaches_stuck_thread() {
        let mut transport = ScriptedTransport::new(Vec::new());
        transport.pull_delay = Duration::from_millis(300);
        let config = StreamConfig { join_timeout_ms: 20, ..config() };
        let mut source = StreamSource::new(Box::new(transport), config);
        source.connect().unwrap();
        source.start().unwrap();

        let started = Instant::now();
        source.stop();
        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(source.status(), SourceStatus::Stopped);
        // The transport went with the detached thread
        assert!(matches!(source.start(), Err(StreamError::NotConnected)));
    }

    #[test]
    fn test_disconnect() {
        let mut source = StreamSource::new(Box::new(ScriptedTransport::new(vec![Ok(block(0, 5))])), config());
        source.connect().unwrap();
        source.start().unwrap();
        assert!(wait_for(|| source.buffered_frames() == 5));

        source.disconnect();
        assert_eq!(source.status(), SourceStatus::Disconnected);
        assert!(source.get_latest_data(1.0).is_none());
        assert_eq!(source.buffered_frames(), 0);
    }
}
