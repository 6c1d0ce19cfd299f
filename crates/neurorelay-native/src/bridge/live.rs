//! Live prediction loop
//!
//! [`LivePredictor`] ties a [`StreamSource`] to an [`SsvepDetector`]. The
//! control thread calls [`LivePredictor::tick`] at the prediction interval;
//! results and status changes are also published as [`PipelineEvent`]s on
//! an unbounded channel. The receiver must either be drained every tick or
//! dropped: a held but unread receiver grows without bound, while a dropped
//! one turns publishing into a no-op.
//!
//! ```rust,ignore
//! let (mut live, mut events) = LivePredictor::new(Box::new(transport), &config)?;
//! live.start()?;
//! loop {
//!     live.tick();
//!     while let Ok(event) = events.try_recv() { ... }
//!     std::thread::sleep(live.prediction_interval());
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use neurorelay_core::config::{prediction_interval, PipelineConfig, SsvepConfig, SsvepConfigDelta, StreamConfig};
use neurorelay_core::error::ConfigResult;
use neurorelay_core::types::Prediction;

use super::error::StreamResult;
use super::source::{SourceStatus, StreamSource};
use super::streaming::{StreamMetadata, Transport};
use crate::ssvep::{ConfigUpdate, SsvepDetector};

/// Fewest frames a window must hold before detection runs
pub const MIN_WINDOW_FRAMES: usize = 10;

/// Frames required on top of the filters' edge padding
pub const PADLEN_MARGIN: usize = 8;

/// Event published by the live pipeline
#[derive(Clone, Debug, PartialEq)]
pub enum PipelineEvent {
    /// A detection result
    Prediction(Prediction),
    /// The stream source changed status
    StatusChanged(SourceStatus),
    /// A window was read for detection
    DataReceived {
        /// Frames in the window
        frames: usize,
        /// Timestamp of the newest frame
        latest_timestamp: f64,
    },
}

/// Snapshot of the live pipeline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LiveStatus {
    /// Stream source status
    pub source: SourceStatus,
    /// Attached stream
    pub stream: Option<StreamMetadata>,
    /// Frames buffered
    pub buffered_frames: usize,
    /// Detector configuration in effect
    pub detector: SsvepConfig,
    /// Interval between predictions
    pub prediction_interval: Duration,
    /// Predictions made since start
    pub predictions: u64,
}

/// Stream source plus detector, driven by the control thread
pub struct LivePredictor {
    source: StreamSource,
    detector: SsvepDetector,
    interval: Duration,
    events: mpsc::UnboundedSender<PipelineEvent>,
    predictions: u64,
}

impl LivePredictor {
    /// Build the pipeline over `transport`.
    ///
    /// The detector starts at the configured nominal sample rate and is
    /// retuned to the stream's rate by [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`](neurorelay_core::ConfigError) if `config` is
    /// invalid.
    pub fn new(
        transport: Box<dyn Transport>,
        config: &PipelineConfig,
    ) -> ConfigResult<(Self, mpsc::UnboundedReceiver<PipelineEvent>)> {
        config.validate()?;
        Self::with_parts(transport, config.ssvep_config(config.sample_rate_hz), config.stream.clone(), config.prediction_rate_hz)
    }

    /// Build the pipeline from individual configurations.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`](neurorelay_core::ConfigError) if any part is
    /// invalid.
    pub fn with_parts(
        transport: Box<dyn Transport>,
        detector: SsvepConfig,
        stream: StreamConfig,
        prediction_rate_hz: f64,
    ) -> ConfigResult<(Self, mpsc::UnboundedReceiver<PipelineEvent>)> {
        stream.validate()?;
        let interval = prediction_interval(prediction_rate_hz)?;
        let detector = SsvepDetector::new(detector)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let source = StreamSource::new(transport, stream).with_events(tx.clone());

        Ok((Self { source, detector, interval, events: tx, predictions: 0 }, rx))
    }

    /// Connect, match the detector to the stream's sample rate and start
    /// acquisition.
    ///
    /// # Errors
    ///
    /// Connection errors from the source, or
    /// [`StreamError::InvalidConfiguration`](super::StreamError::InvalidConfiguration)
    /// if the detector cannot run at the stream's sample rate. The source is
    /// disconnected again in that case.
    pub fn start(&mut self) -> StreamResult<()> {
        let sample_rate = self.source.connect()?.sample_rate;

        if (sample_rate - self.detector.config().sample_rate).abs() > f64::EPSILON {
            match self.detector.apply_delta(&SsvepConfigDelta::sample_rate(sample_rate)) {
                Ok(_) => tracing::info!("Detector retuned to {} Hz", sample_rate),
                Err(e) => {
                    self.source.disconnect();
                    return Err(e.into());
                }
            }
        }

        self.source.start()?;
        self.predictions = 0;
        tracing::info!(
            "Live prediction started: window {} s every {:?}, method {}",
            self.detector.config().window_seconds,
            self.interval,
            self.detector.config().method.as_str()
        );
        Ok(())
    }

    /// Stop acquisition
    pub fn stop(&mut self) {
        self.source.stop();
    }

    /// Run one detection on the latest window.
    ///
    /// Returns `None` without detecting when the window is still shorter
    /// than `max(10, min_padlen + 8)` frames, no stream is attached, or
    /// acquisition has failed.
    ///
    /// The result is also published on the event channel unless its
    /// receiver was dropped.
    pub fn tick(&mut self) -> Option<Prediction> {
        let window_seconds = self.detector.config().window_seconds;
        let (block, meta) = self.source.get_latest_data(window_seconds)?;

        let required = self.min_window_frames();
        if block.len() < required {
            tracing::debug!("Waiting for data: {}/{} frames", block.len(), required);
            return None;
        }

        let latest_timestamp = block.timestamps().last().copied().unwrap_or_default();
        self.publish(PipelineEvent::DataReceived { frames: block.len(), latest_timestamp });

        let prediction = self.detector.detect(&block.to_matrix(), Some(&meta.channel_names));
        self.predictions += 1;
        tracing::debug!(
            "Prediction #{}: {:.2} Hz (confidence {:.3})",
            self.predictions,
            prediction.frequency,
            prediction.confidence
        );

        self.publish(PipelineEvent::Prediction(prediction.clone()));
        Some(prediction)
    }

    fn publish(&self, event: PipelineEvent) {
        if !self.events.is_closed() {
            // Receiver dropped between the check and the send
            let _ = self.events.send(event);
        }
    }

    /// Frames a window needs before [`tick`](Self::tick) detects
    #[must_use]
    pub fn min_window_frames(&self) -> usize {
        MIN_WINDOW_FRAMES.max(self.detector.min_padlen() + PADLEN_MARGIN)
    }

    /// Replace the candidate frequencies.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`](neurorelay_core::ConfigError) for an invalid
    /// frequency list; the detector is left unchanged.
    pub fn update_frequencies(&mut self, frequencies: Vec<f64>) -> ConfigResult<ConfigUpdate> {
        tracing::info!("Updating frequencies to {:?}", frequencies);
        self.apply_delta(&SsvepConfigDelta::frequencies(frequencies))
    }

    /// Apply any detector configuration change.
    ///
    /// # Errors
    ///
    /// See [`SsvepDetector::apply_delta`].
    pub fn apply_delta(&mut self, delta: &SsvepConfigDelta) -> ConfigResult<ConfigUpdate> {
        self.detector.apply_delta(delta)
    }

    /// Change the prediction rate; the interval is floored at 50 ms.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPredictionRate`](neurorelay_core::ConfigError::InvalidPredictionRate)
    /// for a non-positive rate.
    pub fn update_prediction_rate(&mut self, rate_hz: f64) -> ConfigResult<Duration> {
        self.interval = prediction_interval(rate_hz)?;
        tracing::info!("Prediction interval set to {:?}", self.interval);
        Ok(self.interval)
    }

    /// Interval between ticks
    #[must_use]
    pub fn prediction_interval(&self) -> Duration {
        self.interval
    }

    /// The detector
    #[must_use]
    pub fn detector(&self) -> &SsvepDetector {
        &self.detector
    }

    /// The stream source
    #[must_use]
    pub fn source(&self) -> &StreamSource {
        &self.source
    }

    /// Pipeline snapshot
    #[must_use]
    pub fn status(&self) -> LiveStatus {
        LiveStatus {
            source: self.source.status(),
            stream: self.source.info().cloned(),
            buffered_frames: self.source.buffered_frames(),
            detector: self.detector.config().clone(),
            prediction_interval: self.interval,
            predictions: self.predictions,
        }
    }
}
