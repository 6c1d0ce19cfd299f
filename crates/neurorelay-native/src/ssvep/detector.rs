//! SSVEP frequency detector
//!
//! Scores an analysis window (samples x channels) against each candidate
//! stimulation frequency and turns the raw scores into a confidence.
//!
//! Filters and reference sets are derived from [`SsvepConfig`] once and
//! rebuilt only when a configuration change touches them.

use std::sync::atomic::{AtomicBool, Ordering};

use nalgebra::DMatrix;

use neurorelay_core::config::{SsvepConfig, SsvepConfigDelta};
use neurorelay_core::error::ConfigResult;
use neurorelay_core::types::{DetectionMethod, FrequencyScore, Prediction};

use crate::processing::cca::canonical_correlation;
use crate::processing::fft::ChannelSpectra;
use crate::processing::filters::{ZeroPhaseFilter, BANDPASS_ORDER, NOTCH_Q};
use crate::processing::references::reference_set;
use crate::processing::stats::{argmax, softmax_zscore};

/// Which derived state a configuration change rebuilt
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConfigUpdate {
    /// Reference sets were regenerated
    pub references_regenerated: bool,
    /// Filter coefficients were regenerated
    pub filters_regenerated: bool,
}

/// SSVEP detector
#[derive(Debug)]
pub struct SsvepDetector {
    config: SsvepConfig,
    /// Bandpass first, then notch
    filters: Vec<ZeroPhaseFilter>,
    references: Vec<(f64, DMatrix<f64>)>,
    /// Set once the configured channel subset failed to match a window
    channel_fallback_reported: AtomicBool,
}

impl SsvepDetector {
    /// Create a detector.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`](neurorelay_core::ConfigError) if the
    /// configuration is invalid, including filter edges at or above Nyquist.
    pub fn new(config: SsvepConfig) -> ConfigResult<Self> {
        config.validate()?;
        let filters = build_filters(&config)?;
        let references = build_references(&config);

        Ok(Self {
            config,
            filters,
            references,
            channel_fallback_reported: AtomicBool::new(false),
        })
    }

    /// Current configuration
    #[must_use]
    pub fn config(&self) -> &SsvepConfig {
        &self.config
    }

    /// Candidate frequencies in scoring order
    #[must_use]
    pub fn frequencies(&self) -> &[f64] {
        &self.config.frequencies
    }

    /// Minimum window length for zero-phase filtering without shortened
    /// edge extension. Callers should add a margin on top.
    #[must_use]
    pub fn min_padlen(&self) -> usize {
        self.filters.iter().map(ZeroPhaseFilter::edge_padding).max().unwrap_or(0)
    }

    /// Apply a partial configuration.
    ///
    /// The delta is validated and any new filters are built before anything
    /// is replaced, so a rejected delta leaves the detector unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`](neurorelay_core::ConfigError) if the resulting
    /// configuration is invalid.
    pub fn apply_delta(&mut self, delta: &SsvepConfigDelta) -> ConfigResult<ConfigUpdate> {
        let next = delta.apply_to(&self.config);
        next.validate()?;

        let filters = if delta.affects_filters() { Some(build_filters(&next)?) } else { None };
        let references = if delta.affects_references() { Some(build_references(&next)) } else { None };

        let update = ConfigUpdate {
            references_regenerated: references.is_some(),
            filters_regenerated: filters.is_some(),
        };

        if let Some(filters) = filters {
            self.filters = filters;
        }
        if let Some(references) = references {
            self.references = references;
        }
        if delta.channels.is_some() {
            self.channel_fallback_reported.store(false, Ordering::Relaxed);
        }
        self.config = next;

        tracing::debug!(
            "Detector reconfigured (references: {}, filters: {})",
            update.references_regenerated,
            update.filters_regenerated
        );

        Ok(update)
    }

    /// Zero-phase filter every column of `data`
    #[must_use]
    pub fn preprocess(&self, data: &DMatrix<f64>) -> DMatrix<f64> {
        if data.is_empty() || self.filters.is_empty() {
            return data.clone();
        }

        let mut filtered = data.clone();
        for mut column in filtered.column_iter_mut() {
            let mut samples: Vec<f64> = column.iter().copied().collect();
            for filter in &self.filters {
                samples = filter.filtfilt(&samples);
            }
            for (dst, src) in column.iter_mut().zip(samples) {
                *dst = src;
            }
        }
        filtered
    }

    /// Detect the attended frequency in a window.
    ///
    /// `data` is samples x channels. When a channel subset is configured
    /// and `channel_names` is given, only the named columns are used; if
    /// none of them are present every channel is used.
    #[must_use]
    pub fn detect(&self, data: &DMatrix<f64>, channel_names: Option<&[String]>) -> Prediction {
        if data.nrows() == 0 || data.ncols() == 0 || self.config.frequencies.is_empty() {
            return Prediction::empty();
        }

        let selected = self.select_channels(data, channel_names);
        let filtered = self.preprocess(selected.as_ref().unwrap_or(data));

        let mut spectra: Option<ChannelSpectra> = None;
        let scores: Vec<FrequencyScore> = self
            .config
            .frequencies
            .iter()
            .enumerate()
            .map(|(i, &frequency)| {
                let reference = self.references.get(i).map(|(_, r)| r).filter(|r| r.nrows() > 0);
                let score = match (self.config.method, reference) {
                    (DetectionMethod::Cca, Some(reference)) => {
                        let min_len = filtered.nrows().min(reference.nrows());
                        let x = filtered.rows(0, min_len).into_owned();
                        let y = reference.rows(0, min_len).into_owned();
                        canonical_correlation(&x, &y)
                    }
                    _ => spectra
                        .get_or_insert_with(|| ChannelSpectra::compute(&filtered, self.config.sample_rate))
                        .mean_power_at(frequency),
                };
                FrequencyScore { frequency, score }
            })
            .collect();

        let values: Vec<f64> = scores.iter().map(|s| s.score).collect();
        let Some(best) = argmax(&values) else {
            return Prediction::empty();
        };
        let confidence = softmax_zscore(&values)[best];

        let prediction = Prediction { frequency: scores[best].frequency, confidence, scores };
        tracing::debug!("Detected {:.2} Hz (confidence {:.3})", prediction.frequency, prediction.confidence);
        prediction
    }

    /// Columns matching the configured channel names, or `None` to use all
    fn select_channels(&self, data: &DMatrix<f64>, channel_names: Option<&[String]>) -> Option<DMatrix<f64>> {
        let wanted = self.config.channels.as_ref().filter(|c| !c.is_empty())?;
        let names = channel_names?;

        let indices: Vec<usize> = wanted
            .iter()
            .filter_map(|w| names.iter().position(|n| n == w))
            .filter(|&i| i < data.ncols())
            .collect();

        if indices.is_empty() {
            if !self.channel_fallback_reported.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    "None of the configured channels {:?} found in stream channels {:?}; using all channels",
                    wanted,
                    names
                );
            }
            return None;
        }

        Some(data.select_columns(indices.iter()))
    }
}

/// Bandpass (if configured) followed by notch (if configured)
fn build_filters(config: &SsvepConfig) -> ConfigResult<Vec<ZeroPhaseFilter>> {
    let mut filters = Vec::with_capacity(2);
    if let Some((low, high)) = config.bandpass_hz {
        filters.push(ZeroPhaseFilter::butterworth_bandpass(config.sample_rate, low, high, BANDPASS_ORDER)?);
    }
    if let Some(notch) = config.notch_hz {
        filters.push(ZeroPhaseFilter::notch(config.sample_rate, notch, NOTCH_Q)?);
    }
    Ok(filters)
}

fn build_references(config: &SsvepConfig) -> Vec<(f64, DMatrix<f64>)> {
    reference_set(&config.frequencies, config.sample_rate, config.window_samples(), config.harmonics)
}
