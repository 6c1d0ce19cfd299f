//! Multichannel ring buffer
//!
//! Fixed-capacity storage of interleaved frames and their timestamps,
//! shared between one acquisition thread and any number of readers.
//! A single lock guards samples, timestamps and the write cursor, and is
//! held for the whole copy in and copy out, so readers never see a frame
//! that is being overwritten.

use std::sync::{Mutex, MutexGuard, PoisonError};

use nalgebra::DMatrix;

use super::error::{StreamError, StreamResult};

// ============================================================================
// Sample Block
// ============================================================================

/// A run of frames: row-major samples (`frame * channels + channel`) plus
/// one timestamp per frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleBlock {
    channel_count: usize,
    data: Vec<f32>,
    timestamps: Vec<f64>,
}

impl SampleBlock {
    /// Build a block, checking that the data covers whole frames.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ShapeMismatch`] if `data.len()` is not
    /// `timestamps.len() * channel_count`.
    pub fn new(channel_count: usize, data: Vec<f32>, timestamps: Vec<f64>) -> StreamResult<Self> {
        if data.len() != timestamps.len() * channel_count {
            return Err(StreamError::ShapeMismatch {
                samples: data.len(),
                frames: timestamps.len(),
                channels: channel_count,
            });
        }
        Ok(Self { channel_count, data, timestamps })
    }

    /// Block without frames
    #[must_use]
    pub fn empty(channel_count: usize) -> Self {
        Self { channel_count, data: Vec::new(), timestamps: Vec::new() }
    }

    /// Channels per frame
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Number of frames
    #[must_use]
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// True if the block has no frames
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Row-major samples
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Per-frame timestamps
    #[must_use]
    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    /// Samples of frame `i`
    #[must_use]
    pub fn frame(&self, i: usize) -> Option<&[f32]> {
        let start = i.checked_mul(self.channel_count)?;
        self.data.get(start..start + self.channel_count)
    }

    /// Frames as a samples x channels matrix
    #[must_use]
    pub fn to_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_row_iterator(self.len(), self.channel_count, self.data.iter().map(|&v| f64::from(v)))
    }
}

// ============================================================================
// Ring Buffer
// ============================================================================

#[derive(Debug)]
struct RingState {
    data: Vec<f32>,
    timestamps: Vec<f64>,
    /// Next frame slot to write
    head: usize,
    /// Frames stored, at most `capacity`
    count: usize,
}

/// Thread-safe ring buffer of multichannel frames
#[derive(Debug)]
pub struct RingBuffer {
    capacity: usize,
    channel_count: usize,
    state: Mutex<RingState>,
}

impl RingBuffer {
    /// Create a buffer holding `capacity` frames of `channel_count` channels.
    ///
    /// A zero capacity is raised to one frame.
    #[must_use]
    pub fn new(capacity: usize, channel_count: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            channel_count,
            state: Mutex::new(RingState {
                data: vec![0.0; capacity * channel_count],
                timestamps: vec![0.0; capacity],
                head: 0,
                count: 0,
            }),
        }
    }

    /// Lock the state, recovering from poisoning
    fn lock(&self) -> MutexGuard<'_, RingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Capacity in frames
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Channels per frame
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Frames currently stored
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().count
    }

    /// True if nothing has been appended since creation or the last clear
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append frames in order. Only the last `capacity` frames of an
    /// oversized batch are kept.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ShapeMismatch`] if `samples` does not hold
    /// `timestamps.len()` whole frames.
    pub fn append(&self, samples: &[f32], timestamps: &[f64]) -> StreamResult<()> {
        let frames = timestamps.len();
        if samples.len() != frames * self.channel_count {
            return Err(StreamError::ShapeMismatch {
                samples: samples.len(),
                frames,
                channels: self.channel_count,
            });
        }
        if frames == 0 {
            return Ok(());
        }

        let skip = frames.saturating_sub(self.capacity);
        let ch = self.channel_count;
        let mut state = self.lock();

        for frame in skip..frames {
            let slot = state.head;
            state.data[slot * ch..(slot + 1) * ch].copy_from_slice(&samples[frame * ch..(frame + 1) * ch]);
            state.timestamps[slot] = timestamps[frame];
            state.head = (slot + 1) % self.capacity;
        }
        state.count = (state.count + frames - skip).min(self.capacity);
        Ok(())
    }

    /// Append a block.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ShapeMismatch`] if the block's channel count
    /// differs from the buffer's.
    pub fn append_block(&self, block: &SampleBlock) -> StreamResult<()> {
        if block.channel_count() != self.channel_count && !block.is_empty() {
            return Err(StreamError::ShapeMismatch {
                samples: block.data().len(),
                frames: block.len(),
                channels: self.channel_count,
            });
        }
        self.append(block.data(), block.timestamps())
    }

    /// The most recent `min(n, len)` frames, oldest first; `None` if empty
    #[must_use]
    pub fn get_latest(&self, n: usize) -> Option<SampleBlock> {
        let state = self.lock();
        let n = n.min(state.count);
        if n == 0 {
            return None;
        }

        let ch = self.channel_count;
        let start = (state.head + self.capacity - n) % self.capacity;
        let mut data = Vec::with_capacity(n * ch);
        let mut timestamps = Vec::with_capacity(n);

        // At most two contiguous runs: [start, end) then [0, rest)
        let first = n.min(self.capacity - start);
        data.extend_from_slice(&state.data[start * ch..(start + first) * ch]);
        timestamps.extend_from_slice(&state.timestamps[start..start + first]);
        let rest = n - first;
        data.extend_from_slice(&state.data[..rest * ch]);
        timestamps.extend_from_slice(&state.timestamps[..rest]);
        drop(state);

        Some(SampleBlock { channel_count: ch, data, timestamps })
    }

    /// Drop all frames
    pub fn clear(&self) {
        let mut state = self.lock();
        state.head = 0;
        state.count = 0;
    }
}
