//! Configuration error types
//!
//! Every variant here is raised while a configuration is being built or
//! changed, never while a window is being scored.

use thiserror::Error;

/// Invalid configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A bandpass cutoff is at or above the Nyquist frequency
    #[error("Bandpass cutoff {cutoff_hz} Hz is not below the Nyquist frequency {nyquist_hz} Hz")]
    CutoffAboveNyquist {
        /// Offending cutoff
        cutoff_hz: f64,
        /// Half the sample rate
        nyquist_hz: f64,
    },

    /// The notch frequency is at or above the Nyquist frequency
    #[error("Notch frequency {notch_hz} Hz is not below the Nyquist frequency {nyquist_hz} Hz")]
    NotchAboveNyquist {
        /// Offending notch frequency
        notch_hz: f64,
        /// Half the sample rate
        nyquist_hz: f64,
    },

    /// Bandpass edges are not `0 < low < high`
    #[error("Invalid bandpass band: low {low_hz} Hz, high {high_hz} Hz")]
    InvalidBand {
        /// Low cutoff
        low_hz: f64,
        /// High cutoff
        high_hz: f64,
    },

    /// Sample rate is not a positive finite number
    #[error("Invalid sample rate: {0} Hz")]
    InvalidSampleRate(f64),

    /// Window duration is not a positive finite number
    #[error("Invalid analysis window: {0} s")]
    InvalidWindow(f64),

    /// Harmonic count is zero
    #[error("Harmonic count must be at least 1")]
    InvalidHarmonics,

    /// A stimulation frequency list is empty or contains a non-positive value
    #[error("Invalid stimulation frequencies: {0}")]
    InvalidFrequencies(String),

    /// Selection parameters are inconsistent
    #[error("Invalid selection configuration: {0}")]
    InvalidSelection(String),

    /// Prediction rate is not a positive finite number
    #[error("Invalid prediction rate: {0} Hz")]
    InvalidPredictionRate(f64),

    /// Stream buffering parameters are inconsistent
    #[error("Invalid stream configuration: {0}")]
    InvalidStream(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
