//! Selection state machine
//!
//! Turns a stream of predictions into debounced commit events:
//!
//! 1. The winner is the configured tile nearest the predicted frequency.
//! 2. Consecutive identical winners build up a stability count.
//! 3. The gate opens when the count, the winner confidence and its margin
//!    over the runner-up all clear their thresholds.
//! 4. While the gate stays open the winner dwells; after the dwell time a
//!    commit is emitted unless the previous commit is still cooling down.
//!
//! Time is supplied by the caller on every update, in seconds.

use neurorelay_core::config::SelectionConfig;
use neurorelay_core::error::ConfigResult;
use neurorelay_core::types::{CommitEvent, Prediction};

use crate::processing::stats::softmax_zscore;

/// Evaluation state, switched by the caller
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SelectionState {
    /// Predictions are tracked but never committed
    #[default]
    Idle,
    /// Commits are allowed
    Evaluating,
}

/// Feedback for one tile after an update
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TileFeedback {
    /// Confidence assigned to the tile's frequency
    pub confidence: f64,
    /// Dwell progress in [0, 1]; non-zero only for the dwelling tile
    pub dwell: f64,
    /// Tile is the current winner
    pub is_winner: bool,
}

/// Result of one [`SelectionMachine::update`]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectionUpdate {
    /// Winning tile index, `None` for an empty prediction
    pub winner: Option<usize>,
    /// Consecutive updates with the same winner
    pub stability: u32,
    /// Stability, confidence and margin thresholds all held
    pub gated: bool,
    /// Dwell progress of the winner in [0, 1]
    pub dwell_progress: f64,
    /// Per-tile feedback in tile order
    pub tiles: Vec<TileFeedback>,
    /// Commit emitted by this update
    pub commit: Option<CommitEvent>,
}

/// Selection state machine
#[derive(Clone, Debug)]
pub struct SelectionMachine {
    config: SelectionConfig,
    state: SelectionState,
    paused: bool,
    stable_index: Option<usize>,
    stability: u32,
    dwell_index: Option<usize>,
    dwell_start: Option<f64>,
    last_commit: Option<f64>,
}

impl SelectionMachine {
    /// Create an idle machine.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`](neurorelay_core::ConfigError) if labels and
    /// frequencies do not line up or a threshold is out of range.
    pub fn new(config: SelectionConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: SelectionState::Idle,
            paused: false,
            stable_index: None,
            stability: 0,
            dwell_index: None,
            dwell_start: None,
            last_commit: None,
        })
    }

    /// Current configuration
    #[must_use]
    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }

    /// Replace the configuration and reset tracking.
    ///
    /// # Errors
    ///
    /// Returns the validation error and keeps the old configuration.
    pub fn set_config(&mut self, config: SelectionConfig) -> ConfigResult<()> {
        config.validate()?;
        self.config = config;
        self.reset();
        Ok(())
    }

    /// Current evaluation state
    #[must_use]
    pub fn state(&self) -> SelectionState {
        self.state
    }

    /// True while commits are suppressed by [`pause`](Self::pause)
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Enter the evaluating state
    pub fn start(&mut self) {
        if self.state != SelectionState::Evaluating {
            tracing::info!("Selection evaluation started");
        }
        self.state = SelectionState::Evaluating;
    }

    /// Return to idle and drop any running dwell
    pub fn stop(&mut self) {
        if self.state != SelectionState::Idle {
            tracing::info!("Selection evaluation stopped");
        }
        self.state = SelectionState::Idle;
        self.clear_dwell();
    }

    /// Suppress commits without leaving the evaluating state
    pub fn pause(&mut self) {
        self.paused = true;
        self.clear_dwell();
    }

    /// Allow commits again after [`pause`](Self::pause)
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Forget stability, dwell and the last commit
    pub fn reset(&mut self) {
        self.stable_index = None;
        self.stability = 0;
        self.clear_dwell();
        self.last_commit = None;
    }

    fn clear_dwell(&mut self) {
        self.dwell_index = None;
        self.dwell_start = None;
    }

    /// Index of the tile whose frequency is nearest `frequency`
    #[must_use]
    pub fn nearest_index(&self, frequency: f64) -> Option<usize> {
        self.config
            .frequencies
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| (*a - frequency).abs().total_cmp(&(*b - frequency).abs()))
            .map(|(i, _)| i)
    }

    fn dwell_progress(&self, now: f64) -> f64 {
        let Some(start) = self.dwell_start else {
            return 0.0;
        };
        if self.config.dwell_seconds <= 0.0 {
            return 1.0;
        }
        ((now - start) / self.config.dwell_seconds).clamp(0.0, 1.0)
    }

    /// Feed one prediction taken at time `now` (seconds).
    ///
    /// Predictions must arrive with non-decreasing timestamps.
    pub fn update(&mut self, prediction: &Prediction, now: f64) -> SelectionUpdate {
        let n_tiles = self.config.frequencies.len();

        if prediction.is_empty() {
            self.stable_index = None;
            self.stability = 0;
            self.clear_dwell();
            return SelectionUpdate { tiles: vec![TileFeedback::default(); n_tiles], ..SelectionUpdate::default() };
        }

        let Some(winner) = self.nearest_index(prediction.frequency) else {
            return SelectionUpdate::default();
        };

        if self.stable_index == Some(winner) {
            self.stability = self.stability.saturating_add(1);
        } else {
            self.stable_index = Some(winner);
            self.stability = 1;
        }

        let confidences = softmax_zscore(&prediction.score_values());
        let runner_up = runner_up_confidence(&confidences);
        let margin = prediction.confidence - runner_up;

        let gated = self.stability >= self.config.stability_count
            && prediction.confidence >= self.config.tau
            && margin >= self.config.min_margin;

        let active = self.state == SelectionState::Evaluating && !self.paused;

        if gated && active {
            if self.dwell_index != Some(winner) {
                self.dwell_index = Some(winner);
                self.dwell_start = Some(now);
            }
        } else {
            self.clear_dwell();
        }

        let dwell_progress = self.dwell_progress(now);
        let mut commit = None;

        if let (Some(index), Some(start)) = (self.dwell_index, self.dwell_start) {
            let dwell_elapsed = now - start >= self.config.dwell_seconds;
            let cooled_down = self.last_commit.map_or(true, |t| now - t > self.config.cooldown_seconds);

            if dwell_elapsed && cooled_down {
                let event = CommitEvent {
                    label: self.config.labels.get(index).cloned().unwrap_or_default(),
                    index,
                    frequency: self.config.frequencies[index],
                    confidence: prediction.confidence,
                    timestamp: now,
                };
                tracing::info!(
                    "Commit {} ({:.2} Hz, confidence {:.3})",
                    event.label,
                    event.frequency,
                    event.confidence
                );
                self.clear_dwell();
                self.last_commit = Some(now);
                commit = Some(event);
            }
        }

        let tiles = self
            .config
            .frequencies
            .iter()
            .enumerate()
            .map(|(i, &f)| TileFeedback {
                confidence: tile_confidence(prediction, &confidences, f),
                dwell: if Some(i) == self.dwell_index || (commit.is_some() && i == winner) {
                    dwell_progress
                } else {
                    0.0
                },
                is_winner: i == winner,
            })
            .collect();

        tracing::debug!(
            "Selection winner {} stability {} gated {} dwell {:.2}",
            winner,
            self.stability,
            gated,
            dwell_progress
        );

        SelectionUpdate {
            winner: Some(winner),
            stability: self.stability,
            gated,
            dwell_progress,
            tiles,
            commit,
        }
    }
}

/// Second-largest confidence, 0.0 with fewer than two candidates
fn runner_up_confidence(confidences: &[f64]) -> f64 {
    let mut best = f64::NEG_INFINITY;
    let mut second = f64::NEG_INFINITY;
    for &c in confidences {
        if c > best {
            second = best;
            best = c;
        } else if c > second {
            second = c;
        }
    }
    if second.is_finite() {
        second
    } else {
        0.0
    }
}

/// Confidence of the scored frequency nearest a tile
fn tile_confidence(prediction: &Prediction, confidences: &[f64], frequency: f64) -> f64 {
    prediction
        .scores
        .iter()
        .zip(confidences)
        .min_by(|(a, _), (b, _)| (a.frequency - frequency).abs().total_cmp(&(b.frequency - frequency).abs()))
        .map_or(0.0, |(_, &c)| c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use neurorelay_core::types::FrequencyScore;

    const FREQS: [f64; 4] = [8.57, 10.0, 12.0, 15.0];
    const STEP: f64 = 0.25;

    /// Prediction with one dominant frequency; confidence ≈ 0.77
    fn dominant(index: usize) -> Prediction {
        let scores: Vec<FrequencyScore> = FREQS
            .iter()
            .enumerate()
            .map(|(i, &frequency)| FrequencyScore { frequency, score: if i == index { 0.9 } else { 0.1 } })
            .collect();
        let values: Vec<f64> = scores.iter().map(|s| s.score).collect();
        let confidence = softmax_zscore(&values)[index];
        Prediction { frequency: FREQS[index], confidence, scores }
    }

    /// Prediction with the given winner and an explicit confidence
    fn weak(index: usize, confidence: f64) -> Prediction {
        Prediction { confidence, ..dominant(index) }
    }

    fn machine(config: SelectionConfig) -> SelectionMachine {
        let mut machine = SelectionMachine::new(config).unwrap();
        machine.start();
        machine
    }

    fn run(machine: &mut SelectionMachine, predictions: &[Prediction]) -> Vec<(f64, CommitEvent)> {
        predictions
            .iter()
            .enumerate()
            .filter_map(|(i, p)| {
                let now = i as f64 * STEP;
                machine.update(p, now).commit.map(|c| (now, c))
            })
            .collect()
    }

    #[test]
    fn test_nearest_index() {
        let machine = machine(SelectionConfig::default());
        assert_eq!(machine.nearest_index(8.0), Some(0));
        assert_eq!(machine.nearest_index(11.2), Some(2));
        assert_eq!(machine.nearest_index(40.0), Some(3));
    }

    #[test]
    fn test_changing_winner_never_commits() {
        let mut machine = machine(SelectionConfig::default());
        let predictions: Vec<Prediction> = (0..40).map(|i| dominant(i % 4)).collect();
        assert!(run(&mut machine, &predictions).is_empty());

        let predictions: Vec<Prediction> = (0..40).map(|i| dominant(i % 2)).collect();
        assert!(run(&mut machine, &predictions).is_empty());
    }

    #[test]
    fn test_stability_count() {
        let mut machine = machine(SelectionConfig::default());
        let p = dominant(1);
        assert_eq!(machine.update(&p, 0.0).stability, 1);
        assert!(!machine.update(&p, 0.25).gated);
        let update = machine.update(&p, 0.5);
        assert_eq!(update.stability, 3);
        assert!(update.gated);
        assert_eq!(update.winner, Some(1));

        assert_eq!(machine.update(&dominant(2), 0.75).stability, 1);
    }

    #[test]
    fn test_single_commit_when_dwell_elapses() {
        let config = SelectionConfig { cooldown_seconds: 3.0, ..Default::default() };
        let mut machine = machine(config);
        let predictions = vec![dominant(2); 16];

        let commits = run(&mut machine, &predictions);
        // Gate opens at 0.5 s, dwell of 1.2 s elapses at the 1.75 s tick
        assert_eq!(commits.len(), 1);
        let (at, event) = &commits[0];
        assert_eq!(*at, 1.75);
        assert_eq!(event.label, "DEADLINES");
        assert_eq!(event.index, 2);
        assert_eq!(event.frequency, 12.0);
        assert_eq!(event.timestamp, 1.75);
    }

    #[test]
    fn test_cooldown_blocks_second_commit() {
        let config = SelectionConfig { cooldown_seconds: 3.0, ..Default::default() };
        let mut machine = machine(config);
        let predictions = vec![dominant(0); 30];

        let commits = run(&mut machine, &predictions);
        // Dwell restarts at 2.0 s; the cooldown holds until strictly after 4.75 s
        let times: Vec<f64> = commits.iter().map(|(t, _)| *t).collect();
        assert_eq!(times, vec![1.75, 5.0]);
    }

    #[test]
    fn test_default_cooldown_allows_repeat_after_dwell() {
        let mut machine = machine(SelectionConfig::default());
        let commits = run(&mut machine, &vec![dominant(3); 16]);
        let times: Vec<f64> = commits.iter().map(|(t, _)| *t).collect();
        assert_eq!(times, vec![1.75, 3.25]);
    }

    #[test]
    fn test_low_confidence_blocks_gate() {
        let mut machine = machine(SelectionConfig::default());
        let predictions = vec![weak(1, 0.5); 20];
        assert!(run(&mut machine, &predictions).is_empty());
    }

    #[test]
    fn test_small_margin_blocks_gate() {
        let mut machine = machine(SelectionConfig { tau: 0.3, ..Default::default() });
        // Two frequencies nearly tied: runner-up confidence is close to the winner's
        let scores = vec![
            FrequencyScore { frequency: 8.57, score: 0.1 },
            FrequencyScore { frequency: 10.0, score: 0.9 },
            FrequencyScore { frequency: 12.0, score: 0.89 },
            FrequencyScore { frequency: 15.0, score: 0.1 },
        ];
        let values: Vec<f64> = scores.iter().map(|s| s.score).collect();
        let confidence = softmax_zscore(&values)[1];
        let p = Prediction { frequency: 10.0, confidence, scores };

        let update = (0..10).map(|i| machine.update(&p, f64::from(i) * STEP)).last().unwrap();
        assert_eq!(update.stability, 10);
        assert!(!update.gated);
        assert!(update.commit.is_none());
    }

    #[test]
    fn test_idle_and_paused_never_commit() {
        let mut machine = SelectionMachine::new(SelectionConfig::default()).unwrap();
        assert_eq!(machine.state(), SelectionState::Idle);
        let predictions = vec![dominant(1); 20];
        assert!(run(&mut machine, &predictions).is_empty());

        machine.start();
        machine.pause();
        assert!(machine.is_paused());
        assert!(run(&mut machine, &predictions).is_empty());

        machine.resume();
        machine.reset();
        let times: Vec<f64> = run(&mut machine, &predictions).iter().map(|(t, _)| *t).collect();
        assert_eq!(times, vec![1.75, 3.25, 4.75]);
    }

    #[test]
    fn test_winner_change_restarts_dwell() {
        let mut machine = machine(SelectionConfig::default());
        let mut predictions = vec![dominant(0); 6];
        predictions.extend(vec![dominant(1); 10]);

        let commits = run(&mut machine, &predictions);
        // Tile 0 dwells from 0.5 s but loses at 1.5 s; tile 1 is stable at 2.0 s
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].1.index, 1);
        assert_eq!(commits[0].0, 3.25);
    }

    #[test]
    fn test_empty_prediction_resets() {
        let mut machine = machine(SelectionConfig::default());
        let p = dominant(1);
        machine.update(&p, 0.0);
        machine.update(&p, 0.25);
        let update = machine.update(&Prediction::empty(), 0.5);
        assert_eq!(update.winner, None);
        assert_eq!(update.tiles.len(), 4);
        assert_eq!(machine.update(&p, 0.75).stability, 1);
    }

    #[test]
    fn test_dwell_progress_feedback() {
        let mut machine = machine(SelectionConfig::default());
        let p = dominant(3);
        for i in 0..3 {
            machine.update(&p, f64::from(i) * STEP);
        }
        let update = machine.update(&p, 1.1);
        assert!((update.dwell_progress - 0.5).abs() < 1e-9);
        assert!((update.tiles[3].dwell - 0.5).abs() < 1e-9);
        assert!(update.tiles[3].is_winner);
        assert_eq!(update.tiles[0].dwell, 0.0);
        assert!(update.tiles[3].confidence > update.tiles[0].confidence);
    }

    #[test]
    fn test_rejects_mismatched_labels() {
        let config = SelectionConfig { labels: vec!["ONLY".to_string()], ..Default::default() };
        assert!(SelectionMachine::new(config).is_err());

        let mut machine = machine(SelectionConfig::default());
        assert!(machine.set_config(SelectionConfig { tau: 2.0, ..Default::default() }).is_err());
        assert_eq!(machine.config().tau, 0.65);
    }

    #[test]
    fn test_runner_up() {
        assert_eq!(runner_up_confidence(&[0.2, 0.5, 0.3]), 0.3);
        assert_eq!(runner_up_confidence(&[1.0]), 0.0);
        assert_eq!(runner_up_confidence(&[0.25, 0.25]), 0.25);
    }
}
