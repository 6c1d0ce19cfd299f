//! Pipeline configuration
//!
//! Configuration is plain data. Each struct validates itself with
//! `validate()`; the engine calls it when a component is built or changed so
//! that a mis-specified session fails before any sample is processed.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::types::DetectionMethod;

/// Labels of the four selection tiles, in stimulus order.
pub const DEFAULT_LABELS: [&str; 4] = ["SUMMARIZE", "TODOS", "DEADLINES", "EMAIL"];

/// Default stimulation frequencies (Hz), one per tile.
pub const DEFAULT_FREQUENCIES: [f64; 4] = [8.57, 10.0, 12.0, 15.0];

/// Monitor refresh divisors used by [`PipelineConfig::auto_frequencies`].
pub const AUTO_FREQUENCY_DIVISORS: [f64; 4] = [7.0, 6.0, 5.0, 4.0];

/// Shortest prediction interval accepted by the live predictor.
pub const MIN_PREDICTION_INTERVAL: Duration = Duration::from_millis(50);

/// Longest accepted discovery timeout (s).
pub const MAX_DISCOVERY_TIMEOUT_SECONDS: f64 = 86_400.0;

// ============================================================================
// Detector Configuration
// ============================================================================

/// SSVEP detector configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsvepConfig {
    /// Candidate stimulation frequencies (Hz)
    pub frequencies: Vec<f64>,
    /// Sample rate of incoming windows (Hz)
    pub sample_rate: f64,
    /// Analysis window length (s)
    pub window_seconds: f64,
    /// Channel subset by name; `None` uses every channel
    pub channels: Option<Vec<String>>,
    /// Bandpass edges (low, high) in Hz; `None` disables the bandpass
    pub bandpass_hz: Option<(f64, f64)>,
    /// Line-noise notch frequency (Hz)
    pub notch_hz: Option<f64>,
    /// Number of harmonics in each reference set (fundamental included)
    pub harmonics: usize,
    /// Scoring method
    pub method: DetectionMethod,
}

impl Default for SsvepConfig {
    fn default() -> Self {
        Self {
            frequencies: DEFAULT_FREQUENCIES.to_vec(),
            sample_rate: 250.0,
            window_seconds: 3.0,
            channels: None,
            bandpass_hz: Some((5.0, 40.0)),
            notch_hz: None,
            harmonics: 2,
            method: DetectionMethod::Cca,
        }
    }
}

impl SsvepConfig {
    /// Half the sample rate
    #[must_use]
    pub fn nyquist(&self) -> f64 {
        self.sample_rate / 2.0
    }

    /// Number of samples in one analysis window
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn window_samples(&self) -> usize {
        (self.window_seconds * self.sample_rate) as usize
    }

    /// Check the configuration against the sampling constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the sample rate, window or harmonic count
    /// are out of range, if a frequency is not positive, or if a filter edge
    /// is at or above Nyquist.
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(ConfigError::InvalidSampleRate(self.sample_rate));
        }
        if !(self.window_seconds.is_finite() && self.window_seconds > 0.0) {
            return Err(ConfigError::InvalidWindow(self.window_seconds));
        }
        if self.harmonics == 0 {
            return Err(ConfigError::InvalidHarmonics);
        }
        if let Some(bad) = self.frequencies.iter().find(|f| !(f.is_finite() && **f > 0.0)) {
            return Err(ConfigError::InvalidFrequencies(format!("{bad} Hz is not a positive frequency")));
        }

        let nyquist = self.nyquist();

        if let Some((low, high)) = self.bandpass_hz {
            for cutoff in [low, high] {
                if cutoff >= nyquist {
                    return Err(ConfigError::CutoffAboveNyquist { cutoff_hz: cutoff, nyquist_hz: nyquist });
                }
            }
            if !(low > 0.0 && low < high) {
                return Err(ConfigError::InvalidBand { low_hz: low, high_hz: high });
            }
        }

        if let Some(notch) = self.notch_hz {
            if notch >= nyquist {
                return Err(ConfigError::NotchAboveNyquist { notch_hz: notch, nyquist_hz: nyquist });
            }
            if notch <= 0.0 {
                return Err(ConfigError::InvalidFrequencies(format!("notch {notch} Hz is not positive")));
            }
        }

        Ok(())
    }
}

/// Partial detector configuration.
///
/// `None` leaves a field unchanged. For the optional fields the inner
/// `Option` is the new value, so `Some(None)` switches the stage off.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsvepConfigDelta {
    /// New candidate frequencies
    pub frequencies: Option<Vec<f64>>,
    /// New sample rate
    pub sample_rate: Option<f64>,
    /// New window length
    pub window_seconds: Option<f64>,
    /// New channel subset
    pub channels: Option<Option<Vec<String>>>,
    /// New bandpass edges
    pub bandpass_hz: Option<Option<(f64, f64)>>,
    /// New notch frequency
    pub notch_hz: Option<Option<f64>>,
    /// New harmonic count
    pub harmonics: Option<usize>,
    /// New scoring method
    pub method: Option<DetectionMethod>,
}

impl SsvepConfigDelta {
    /// Delta that only changes the sample rate
    #[must_use]
    pub fn sample_rate(sample_rate: f64) -> Self {
        Self { sample_rate: Some(sample_rate), ..Self::default() }
    }

    /// Delta that only changes the candidate frequencies
    #[must_use]
    pub fn frequencies(frequencies: Vec<f64>) -> Self {
        Self { frequencies: Some(frequencies), ..Self::default() }
    }

    /// True if applying this delta invalidates cached reference signals
    #[must_use]
    pub fn affects_references(&self) -> bool {
        self.frequencies.is_some()
            || self.window_seconds.is_some()
            || self.sample_rate.is_some()
            || self.harmonics.is_some()
    }

    /// True if applying this delta invalidates filter coefficients
    #[must_use]
    pub fn affects_filters(&self) -> bool {
        self.sample_rate.is_some() || self.bandpass_hz.is_some() || self.notch_hz.is_some()
    }

    /// Produce the configuration that results from applying this delta
    #[must_use]
    pub fn apply_to(&self, base: &SsvepConfig) -> SsvepConfig {
        let mut next = base.clone();
        if let Some(frequencies) = &self.frequencies {
            next.frequencies.clone_from(frequencies);
        }
        if let Some(rate) = self.sample_rate {
            next.sample_rate = rate;
        }
        if let Some(window) = self.window_seconds {
            next.window_seconds = window;
        }
        if let Some(channels) = &self.channels {
            next.channels.clone_from(channels);
        }
        if let Some(band) = self.bandpass_hz {
            next.bandpass_hz = band;
        }
        if let Some(notch) = self.notch_hz {
            next.notch_hz = notch;
        }
        if let Some(harmonics) = self.harmonics {
            next.harmonics = harmonics;
        }
        if let Some(method) = self.method {
            next.method = method;
        }
        next
    }
}

// ============================================================================
// Selection Configuration
// ============================================================================

/// Selection state machine configuration.
///
/// The margin, stability count and cooldown defaults were tuned on
/// recorded sessions; treat them as starting points.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Tile labels, parallel to `frequencies`
    pub labels: Vec<String>,
    /// Tile stimulation frequencies (Hz)
    pub frequencies: Vec<f64>,
    /// Minimum winner confidence (τ)
    pub tau: f64,
    /// Time the gate must hold before a commit (s)
    pub dwell_seconds: f64,
    /// Minimum winner minus runner-up confidence
    pub min_margin: f64,
    /// Consecutive identical winners required
    pub stability_count: u32,
    /// Minimum time between commits (s)
    pub cooldown_seconds: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            labels: DEFAULT_LABELS.iter().map(|l| (*l).to_string()).collect(),
            frequencies: DEFAULT_FREQUENCIES.to_vec(),
            tau: 0.65,
            dwell_seconds: 1.2,
            min_margin: 0.05,
            stability_count: 3,
            cooldown_seconds: 0.75,
        }
    }
}

impl SelectionConfig {
    /// Check that labels and frequencies line up and thresholds are sane.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSelection`] or
    /// [`ConfigError::InvalidFrequencies`] describing the first problem.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.frequencies.is_empty() {
            return Err(ConfigError::InvalidFrequencies("no selection tiles configured".to_string()));
        }
        if self.labels.len() != self.frequencies.len() {
            return Err(ConfigError::InvalidSelection(format!(
                "{} labels for {} frequencies",
                self.labels.len(),
                self.frequencies.len()
            )));
        }
        if !(0.0..=1.0).contains(&self.tau) {
            return Err(ConfigError::InvalidSelection(format!("tau {} outside [0, 1]", self.tau)));
        }
        if !(self.dwell_seconds.is_finite() && self.dwell_seconds >= 0.0) {
            return Err(ConfigError::InvalidSelection(format!("dwell {} s", self.dwell_seconds)));
        }
        if !(self.cooldown_seconds.is_finite() && self.cooldown_seconds >= 0.0) {
            return Err(ConfigError::InvalidSelection(format!("cooldown {} s", self.cooldown_seconds)));
        }
        if !(self.min_margin.is_finite() && self.min_margin >= 0.0) {
            return Err(ConfigError::InvalidSelection(format!("margin {}", self.min_margin)));
        }
        if self.stability_count == 0 {
            return Err(ConfigError::InvalidSelection("stability count must be at least 1".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Stream Configuration
// ============================================================================

/// Stream source configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Stream type to discover (e.g. "EEG")
    pub stream_type: String,
    /// Preferred stream name
    pub stream_name: Option<String>,
    /// Discovery timeout (s)
    pub timeout_seconds: f64,
    /// Ring buffer length (s)
    pub buffer_seconds: f64,
    /// Maximum frames requested per pull
    pub max_chunk_size: usize,
    /// Pull timeout of the acquisition loop (ms)
    pub pull_timeout_ms: u64,
    /// How long `stop()` waits for the acquisition thread (ms)
    pub join_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stream_type: "EEG".to_string(),
            stream_name: None,
            timeout_seconds: 5.0,
            buffer_seconds: 10.0,
            max_chunk_size: 1024,
            pull_timeout_ms: 100,
            join_timeout_ms: 1000,
        }
    }
}

impl StreamConfig {
    /// Discovery timeout as a [`Duration`], clamped to
    /// [`MAX_DISCOVERY_TIMEOUT_SECONDS`]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        let seconds = if self.timeout_seconds.is_nan() { 0.0 } else { self.timeout_seconds };
        Duration::from_secs_f64(seconds.clamp(0.0, MAX_DISCOVERY_TIMEOUT_SECONDS))
    }

    /// Pull timeout as a [`Duration`]
    #[must_use]
    pub fn pull_timeout(&self) -> Duration {
        Duration::from_millis(self.pull_timeout_ms)
    }

    /// Join timeout as a [`Duration`]
    #[must_use]
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Ring buffer capacity in frames for a given sample rate
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn buffer_capacity(&self, sample_rate: f64) -> usize {
        ((self.buffer_seconds * sample_rate) as usize).max(1)
    }

    /// Check buffering parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidStream`] on a non-positive buffer length,
    /// a timeout outside `[0, MAX_DISCOVERY_TIMEOUT_SECONDS]` or a zero chunk
    /// size.
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.buffer_seconds.is_finite() && self.buffer_seconds > 0.0) {
            return Err(ConfigError::InvalidStream(format!("buffer {} s", self.buffer_seconds)));
        }
        if !(0.0..=MAX_DISCOVERY_TIMEOUT_SECONDS).contains(&self.timeout_seconds) {
            return Err(ConfigError::InvalidStream(format!("timeout {} s", self.timeout_seconds)));
        }
        if self.max_chunk_size == 0 {
            return Err(ConfigError::InvalidStream("max chunk size must be positive".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Pipeline Configuration (configuration file)
// ============================================================================

/// Full pipeline configuration as stored in the JSON configuration file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Display refresh rate used for monitor-locked frequencies (Hz)
    pub monitor_hz: f64,
    /// Tile stimulation frequencies (Hz)
    pub freqs_hz: Vec<f64>,
    /// Tile labels
    pub labels: Vec<String>,
    /// Analysis window (s)
    pub window_sec: f64,
    /// Dwell time before a commit (s)
    pub dwell_sec: f64,
    /// Confidence threshold
    pub tau: f64,
    /// Channel subset by name
    pub channels: Option<Vec<String>>,
    /// Bandpass edges (Hz)
    pub bandpass_hz: Option<(f64, f64)>,
    /// Notch frequency (Hz)
    pub notch_hz: Option<f64>,
    /// Reference harmonics
    pub harmonics: usize,
    /// Scoring method
    pub method: DetectionMethod,
    /// Minimum winner/runner-up confidence gap
    pub min_margin: f64,
    /// Consecutive identical winners required
    pub stability_count: u32,
    /// Minimum time between commits (s)
    pub cooldown_sec: f64,
    /// Detection rate (Hz)
    pub prediction_rate_hz: f64,
    /// Nominal sample rate until the stream reports its own (Hz)
    pub sample_rate_hz: f64,
    /// Stream source settings
    pub stream: StreamConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let detector = SsvepConfig::default();
        let selection = SelectionConfig::default();
        Self {
            monitor_hz: 60.0,
            freqs_hz: selection.frequencies,
            labels: selection.labels,
            window_sec: detector.window_seconds,
            dwell_sec: selection.dwell_seconds,
            tau: selection.tau,
            channels: detector.channels,
            bandpass_hz: detector.bandpass_hz,
            notch_hz: detector.notch_hz,
            harmonics: detector.harmonics,
            method: detector.method,
            min_margin: selection.min_margin,
            stability_count: selection.stability_count,
            cooldown_sec: selection.cooldown_seconds,
            prediction_rate_hz: 4.0,
            sample_rate_hz: detector.sample_rate,
            stream: StreamConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Monitor-locked tile frequencies: `monitor_hz / [7, 6, 5, 4]`
    #[must_use]
    pub fn auto_frequencies(monitor_hz: f64) -> Vec<f64> {
        let monitor = monitor_hz.max(1.0);
        AUTO_FREQUENCY_DIVISORS.iter().map(|d| monitor / d).collect()
    }

    /// Replace the tile frequencies with monitor-locked ones
    #[must_use]
    pub fn with_auto_frequencies(mut self) -> Self {
        self.freqs_hz = Self::auto_frequencies(self.monitor_hz);
        self
    }

    /// Detector configuration at the given sample rate
    #[must_use]
    pub fn ssvep_config(&self, sample_rate: f64) -> SsvepConfig {
        SsvepConfig {
            frequencies: self.freqs_hz.clone(),
            sample_rate,
            window_seconds: self.window_sec,
            channels: self.channels.clone(),
            bandpass_hz: self.bandpass_hz,
            notch_hz: self.notch_hz,
            harmonics: self.harmonics,
            method: self.method,
        }
    }

    /// Selection state machine configuration
    #[must_use]
    pub fn selection_config(&self) -> SelectionConfig {
        SelectionConfig {
            labels: self.labels.clone(),
            frequencies: self.freqs_hz.clone(),
            tau: self.tau,
            dwell_seconds: self.dwell_sec,
            min_margin: self.min_margin,
            stability_count: self.stability_count,
            cooldown_seconds: self.cooldown_sec,
        }
    }

    /// Interval between detection calls, floored at 50 ms
    #[must_use]
    pub fn prediction_interval(&self) -> Duration {
        prediction_interval(self.prediction_rate_hz).unwrap_or(MIN_PREDICTION_INTERVAL)
    }

    /// Validate every section of the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> ConfigResult<()> {
        self.ssvep_config(self.sample_rate_hz).validate()?;
        self.selection_config().validate()?;
        self.stream.validate()?;
        prediction_interval(self.prediction_rate_hz)?;
        Ok(())
    }
}

/// Convert a prediction rate into a timer interval, floored at 50 ms.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidPredictionRate`] for non-positive rates and
/// for rates so small their period does not fit a [`Duration`].
pub fn prediction_interval(rate_hz: f64) -> ConfigResult<Duration> {
    if !(rate_hz.is_finite() && rate_hz > 0.0) {
        return Err(ConfigError::InvalidPredictionRate(rate_hz));
    }
    let period = Duration::try_from_secs_f64(1.0 / rate_hz).map_err(|_| ConfigError::InvalidPredictionRate(rate_hz))?;
    Ok(period.max(MIN_PREDICTION_INTERVAL))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SsvepConfig::default().validate().is_ok());
        assert!(SelectionConfig::default().validate().is_ok());
        assert!(StreamConfig::default().validate().is_ok());
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_bandpass_above_nyquist_rejected() {
        let config = SsvepConfig {
            sample_rate: 100.0,
            bandpass_hz: Some((5.0, 50.0)),
            ..Default::default()
        };

        assert_eq!(
            config.validate(),
            Err(ConfigError::CutoffAboveNyquist { cutoff_hz: 50.0, nyquist_hz: 50.0 })
        );
    }

    #[test]
    fn test_notch_above_nyquist_rejected() {
        let config = SsvepConfig {
            sample_rate: 100.0,
            bandpass_hz: Some((5.0, 40.0)),
            notch_hz: Some(60.0),
            ..Default::default()
        };

        assert!(matches!(config.validate(), Err(ConfigError::NotchAboveNyquist { .. })));
    }

    #[test]
    fn test_inverted_band_rejected() {
        let config = SsvepConfig {
            bandpass_hz: Some((40.0, 5.0)),
            ..Default::default()
        };

        assert!(matches!(config.validate(), Err(ConfigError::InvalidBand { .. })));
    }

    #[test]
    fn test_window_samples() {
        let config = SsvepConfig {
            sample_rate: 250.0,
            window_seconds: 2.5,
            ..Default::default()
        };
        assert_eq!(config.window_samples(), 625);
    }

    #[test]
    fn test_delta_flags() {
        let delta = SsvepConfigDelta::sample_rate(500.0);
        assert!(delta.affects_references());
        assert!(delta.affects_filters());

        let delta = SsvepConfigDelta {
            bandpass_hz: Some(Some((6.0, 30.0))),
            ..Default::default()
        };
        assert!(!delta.affects_references());
        assert!(delta.affects_filters());

        let delta = SsvepConfigDelta {
            channels: Some(Some(vec!["Oz".to_string()])),
            ..Default::default()
        };
        assert!(!delta.affects_references());
        assert!(!delta.affects_filters());
    }

    #[test]
    fn test_delta_apply() {
        let base = SsvepConfig::default();
        let delta = SsvepConfigDelta {
            frequencies: Some(vec![7.5, 12.0]),
            notch_hz: Some(Some(50.0)),
            ..Default::default()
        };

        let next = delta.apply_to(&base);
        assert_eq!(next.frequencies, vec![7.5, 12.0]);
        assert_eq!(next.notch_hz, Some(50.0));
        assert_eq!(next.bandpass_hz, base.bandpass_hz);
    }

    #[test]
    fn test_selection_label_mismatch() {
        let config = SelectionConfig {
            labels: vec!["A".to_string()],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidSelection(_))));
    }

    #[test]
    fn test_auto_frequencies() {
        let freqs = PipelineConfig::auto_frequencies(60.0);
        assert_eq!(freqs.len(), 4);
        assert!((freqs[0] - 60.0 / 7.0).abs() < 1e-12);
        assert!((freqs[3] - 15.0).abs() < 1e-12);
    }

    #[test]
    fn test_prediction_interval() {
        assert_eq!(prediction_interval(4.0), Ok(Duration::from_millis(250)));
        assert_eq!(prediction_interval(100.0), Ok(MIN_PREDICTION_INTERVAL));
        assert!(prediction_interval(0.0).is_err());
        assert!(prediction_interval(-2.0).is_err());
        assert_eq!(prediction_interval(1e-30), Err(ConfigError::InvalidPredictionRate(1e-30)));
        assert_eq!(prediction_interval(f64::MIN_POSITIVE), Err(ConfigError::InvalidPredictionRate(f64::MIN_POSITIVE)));
    }

    #[test]
    fn test_tiny_prediction_rate_rejected() {
        let config = PipelineConfig { prediction_rate_hz: 1e-30, ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::InvalidPredictionRate(1e-30)));
        assert_eq!(config.prediction_interval(), MIN_PREDICTION_INTERVAL);
    }

    #[test]
    fn test_discovery_timeout_bounds() {
        let huge = StreamConfig { timeout_seconds: 1e30, ..Default::default() };
        assert!(matches!(huge.validate(), Err(ConfigError::InvalidStream(_))));
        assert_eq!(huge.timeout(), Duration::from_secs_f64(MAX_DISCOVERY_TIMEOUT_SECONDS));

        let negative = StreamConfig { timeout_seconds: -1.0, ..Default::default() };
        assert!(negative.validate().is_err());
        assert_eq!(negative.timeout(), Duration::ZERO);

        let nan = StreamConfig { timeout_seconds: f64::NAN, ..Default::default() };
        assert!(nan.validate().is_err());
        assert_eq!(nan.timeout(), Duration::ZERO);

        let edge = StreamConfig { timeout_seconds: MAX_DISCOVERY_TIMEOUT_SECONDS, ..Default::default() };
        assert!(edge.validate().is_ok());
    }

    #[test]
    fn test_pipeline_config_from_json() {
        let json = r#"{
            "monitor_hz": 60.0,
            "freqs_hz": [8.57, 10.0, 12.0, 15.0],
            "window_sec": 3.0,
            "dwell_sec": 1.2,
            "tau": 0.65,
            "channels": ["O1", "Oz", "O2"],
            "bandpass_hz": [5, 40],
            "notch_hz": 60,
            "ui_intensity": 0.85
        }"#;

        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.channels.as_deref().map(<[String]>::len), Some(3));
        assert_eq!(config.bandpass_hz, Some((5.0, 40.0)));
        assert_eq!(config.notch_hz, Some(60.0));
        assert_eq!(config.labels.len(), 4);
        assert!(config.validate().is_ok());

        let detector = config.ssvep_config(250.0);
        assert_eq!(detector.frequencies, config.freqs_hz);
        assert_eq!(detector.sample_rate, 250.0);
    }
}
