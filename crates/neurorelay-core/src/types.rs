//! Core data types for SSVEP decoding
//!
//! - [`DetectionMethod`]: how a window is scored against each frequency
//! - [`Prediction`]: winner, confidence and raw per-frequency scores
//! - [`CommitEvent`]: a debounced selection handed to the dispatcher

use serde::{Deserialize, Serialize};

// ============================================================================
// Detection Method
// ============================================================================

/// Scoring method used by the detector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    /// Canonical correlation against sine/cosine references
    #[default]
    Cca,
    /// Spectral power at the nearest FFT bin
    Power,
}

impl DetectionMethod {
    /// Name used in configuration files
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cca => "cca",
            Self::Power => "power",
        }
    }
}

impl core::str::FromStr for DetectionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cca" => Ok(Self::Cca),
            "power" => Ok(Self::Power),
            other => Err(format!("unknown detection method '{other}' (expected cca or power)")),
        }
    }
}

// ============================================================================
// Prediction
// ============================================================================

/// Raw score of one candidate frequency.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrequencyScore {
    /// Candidate stimulation frequency (Hz)
    pub frequency: f64,
    /// Canonical correlation (CCA) or mean bin power (power method)
    pub score: f64,
}

/// Output of one detection call.
///
/// `scores` keeps the configured frequency order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Winning frequency (Hz), 0.0 when nothing was scored
    pub frequency: f64,
    /// Confidence of the winner in [0, 1]
    pub confidence: f64,
    /// Score for every candidate frequency
    pub scores: Vec<FrequencyScore>,
}

impl Prediction {
    /// Degenerate result for empty windows or empty frequency sets
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when no frequency was scored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Raw score for a frequency, if it was a candidate
    #[must_use]
    pub fn score_for(&self, frequency: f64) -> Option<f64> {
        self.scores
            .iter()
            .find(|s| (s.frequency - frequency).abs() < f64::EPSILON)
            .map(|s| s.score)
    }

    /// Raw scores in candidate order
    #[must_use]
    pub fn score_values(&self) -> Vec<f64> {
        self.scores.iter().map(|s| s.score).collect()
    }
}

// ============================================================================
// Commit Event
// ============================================================================

/// A debounced selection produced by the selection state machine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommitEvent {
    /// Selected label (e.g. "SUMMARIZE")
    pub label: String,
    /// Index of the selected tile
    pub index: usize,
    /// Stimulation frequency of the selected tile (Hz)
    pub frequency: f64,
    /// Winner confidence at commit time
    pub confidence: f64,
    /// Time of the commit, in the clock the predictions were stamped with (s)
    pub timestamp: f64,
}
