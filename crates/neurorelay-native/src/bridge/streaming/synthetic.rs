//! Synthetic SSVEP stream
//!
//! Generates three occipital channels (O1, Oz, O2) following a block
//! schedule. Each scheduled tile gets a focus block, a stronger dwell block
//! and a silent rest block:
//!
//! ```text
//! base(t) = g · (sin 2πft + 0.35 · sin 2π·2f·t)     g = 1.0 focus, 1.35 dwell, 0 rest
//! O1 = 0.90·base + n    Oz = 1.10·base + n    O2 = 0.95·base + n    n ~ N(0, σ²)
//! ```
//!
//! Without real-time pacing frames are produced as fast as they are pulled,
//! which makes the whole session available to tests in milliseconds.

use std::f64::consts::PI;
use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use neurorelay_core::config::{DEFAULT_FREQUENCIES, DEFAULT_LABELS};

use super::{StreamMetadata, StreamQuery, Transport};
use crate::bridge::error::{StreamError, StreamResult};
use crate::bridge::ring_buffer::SampleBlock;

/// Channel labels of the generated stream
pub const SYNTHETIC_CHANNELS: [&str; 3] = ["O1", "Oz", "O2"];

/// Per-channel gain applied to the stimulus response
const CHANNEL_GAINS: [f64; 3] = [0.9, 1.1, 0.95];

/// Relative amplitude of the second harmonic
const SECOND_HARMONIC: f64 = 0.35;

/// Generator settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Stream name reported on connect
    pub stream_name: String,
    /// Sample rate (Hz)
    pub sample_rate: f64,
    /// Tile frequencies (Hz)
    pub frequencies: Vec<f64>,
    /// Tiles to attend, in order
    pub block_order: Vec<usize>,
    /// Focus block length (s)
    pub focus_seconds: f64,
    /// Dwell block length (s)
    pub dwell_seconds: f64,
    /// Rest block length (s)
    pub rest_seconds: f64,
    /// Noise standard deviation
    pub noise_sigma: f64,
    /// RNG seed; `None` seeds from entropy
    pub seed: Option<u64>,
    /// Pace output to the wall clock
    pub realtime: bool,
    /// Restart the schedule after the last block instead of ending
    pub repeat: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            stream_name: "NeuroRelaySynthetic".to_string(),
            sample_rate: 250.0,
            frequencies: DEFAULT_FREQUENCIES.to_vec(),
            block_order: vec![0, 1, 2, 3, 0, 2, 1, 3],
            focus_seconds: 3.0,
            dwell_seconds: 1.2,
            rest_seconds: 0.8,
            noise_sigma: 0.15,
            seed: None,
            realtime: true,
            repeat: true,
        }
    }
}

/// Kind of a schedule block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    /// Attending a tile
    Focus,
    /// Holding attention for the commit
    Dwell,
    /// No stimulus
    Rest,
}

impl BlockKind {
    fn gain(self) -> f64 {
        match self {
            Self::Focus => 1.0,
            Self::Dwell => 1.35,
            Self::Rest => 0.0,
        }
    }
}

/// One block of the schedule
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Block {
    /// Block kind
    pub kind: BlockKind,
    /// Attended tile, `None` during rest
    pub tile: Option<usize>,
    /// Stimulus frequency (Hz), 0 during rest
    pub frequency: f64,
    /// Length in frames
    pub frames: usize,
}

impl Block {
    /// Label of the attended tile, empty during rest
    #[must_use]
    pub fn label(&self) -> &'static str {
        self.tile.and_then(|t| DEFAULT_LABELS.get(t).copied()).unwrap_or("")
    }
}

/// Synthetic SSVEP transport
pub struct SyntheticTransport {
    config: SyntheticConfig,
    schedule: Vec<Block>,
    rng: SmallRng,
    /// Frames produced so far
    produced: u64,
    started: Option<Instant>,
    connected: bool,
}

impl SyntheticTransport {
    /// Create a generator; the schedule is fixed at construction
    #[must_use]
    pub fn new(config: SyntheticConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        let schedule = build_schedule(&config);
        Self { config, schedule, rng, produced: 0, started: None, connected: false }
    }

    /// Generator settings
    #[must_use]
    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    /// The block schedule
    #[must_use]
    pub fn schedule(&self) -> &[Block] {
        &self.schedule
    }

    /// Frames in one pass of the schedule
    #[must_use]
    pub fn session_frames(&self) -> u64 {
        self.schedule.iter().map(|b| b.frames as u64).sum()
    }

    /// Block active at absolute frame `frame`, `None` past the end of a
    /// non-repeating schedule
    #[must_use]
    pub fn block_at(&self, frame: u64) -> Option<&Block> {
        let total = self.session_frames();
        if total == 0 {
            return None;
        }
        if frame >= total && !self.config.repeat {
            return None;
        }
        let mut offset = frame % total;
        for block in &self.schedule {
            let len = block.frames as u64;
            if offset < len {
                return Some(block);
            }
            offset -= len;
        }
        None
    }

    /// Standard normal sample (Box-Muller)
    fn gaussian(&mut self) -> f64 {
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    /// Generate the next `n` frames
    #[allow(clippy::cast_possible_truncation)]
    fn generate(&mut self, n: usize) -> StreamResult<SampleBlock> {
        let ch = SYNTHETIC_CHANNELS.len();
        let mut data = Vec::with_capacity(n * ch);
        let mut timestamps = Vec::with_capacity(n);
        let sigma = self.config.noise_sigma;

        for _ in 0..n {
            let frame = self.produced;
            let Some(block) = self.block_at(frame).copied() else {
                break;
            };
            let t = frame as f64 / self.config.sample_rate;
            let base = if block.frequency > 0.0 {
                let phase = 2.0 * PI * block.frequency * t;
                block.kind.gain() * (phase.sin() + SECOND_HARMONIC * (2.0 * phase).sin())
            } else {
                0.0
            };

            for gain in CHANNEL_GAINS {
                let noise = sigma * self.gaussian();
                data.push((gain * base + noise) as f32);
            }
            timestamps.push(t);
            self.produced += 1;
        }

        SampleBlock::new(ch, data, timestamps)
    }

    /// Frames due by the wall clock that have not been produced yet
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn frames_due(&self, now: Instant) -> u64 {
        let Some(started) = self.started else {
            return 0;
        };
        let due = (now.duration_since(started).as_secs_f64() * self.config.sample_rate) as u64;
        due.saturating_sub(self.produced)
    }
}

impl Transport for SyntheticTransport {
    fn kind(&self) -> &'static str {
        "synthetic"
    }

    fn connect(&mut self, query: &StreamQuery, _timeout: Duration) -> StreamResult<StreamMetadata> {
        if !query.stream_type.eq_ignore_ascii_case("EEG") {
            return Err(StreamError::NoStreamsFound {
                stream_type: query.stream_type.clone(),
                timeout_seconds: 0.0,
            });
        }
        if !(self.config.sample_rate.is_finite() && self.config.sample_rate > 0.0) {
            return Err(StreamError::Connection(format!(
                "synthetic sample rate {} Hz is not positive",
                self.config.sample_rate
            )));
        }
        if let Some(name) = &query.stream_name {
            if name != &self.config.stream_name {
                tracing::warn!("Stream '{}' not found, using '{}'", name, self.config.stream_name);
            }
        }

        self.connected = true;
        tracing::info!(
            "Synthetic stream '{}' ready: {} Hz, {} blocks",
            self.config.stream_name,
            self.config.sample_rate,
            self.schedule.len()
        );

        Ok(StreamMetadata::new(
            self.config.stream_name.clone(),
            "EEG".to_string(),
            self.config.sample_rate,
            SYNTHETIC_CHANNELS.len(),
            SYNTHETIC_CHANNELS.iter().map(|s| (*s).to_string()).collect(),
        ))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn pull_chunk(&mut self, timeout: Duration, max_frames: usize) -> StreamResult<SampleBlock> {
        if !self.connected {
            return Err(StreamError::NotConnected);
        }

        let finished = !self.config.repeat && self.produced >= self.session_frames();
        if finished {
            std::thread::sleep(timeout);
            return Ok(SampleBlock::empty(SYNTHETIC_CHANNELS.len()));
        }

        if !self.config.realtime {
            return self.generate(max_frames);
        }

        let now = Instant::now();
        let started = *self.started.get_or_insert(now);
        let mut due = self.frames_due(now);
        if due == 0 {
            let next_frame = (self.produced + 1) as f64 / self.config.sample_rate;
            let wait = Duration::from_secs_f64(next_frame).saturating_sub(now.duration_since(started));
            std::thread::sleep(wait.min(timeout));
            due = self.frames_due(Instant::now());
        }

        self.generate((due as usize).min(max_frames))
    }
}

/// Expand the block order into focus, dwell and rest blocks
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn build_schedule(config: &SyntheticConfig) -> Vec<Block> {
    let frames = |seconds: f64| (seconds * config.sample_rate).round().max(0.0) as usize;

    config
        .block_order
        .iter()
        .filter_map(|&tile| config.frequencies.get(tile).map(|&f| (tile, f)))
        .flat_map(|(tile, frequency)| {
            [
                Block { kind: BlockKind::Focus, tile: Some(tile), frequency, frames: frames(config.focus_seconds) },
                Block { kind: BlockKind::Dwell, tile: Some(tile), frequency, frames: frames(config.dwell_seconds) },
                Block { kind: BlockKind::Rest, tile: None, frequency: 0.0, frames: frames(config.rest_seconds) },
            ]
        })
        .filter(|b| b.frames > 0)
        .collect()
}
