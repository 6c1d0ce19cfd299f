//! FFT-based spectral power
//!
//! Per-channel spectra of an analysis window, queried at the bin nearest a
//! stimulation frequency.

use nalgebra::DMatrix;
use rustfft::{num_complex::Complex, FftPlanner};

/// One-sided power spectra of every channel in a window
pub struct ChannelSpectra {
    n_samples: usize,
    sample_rate: f64,
    /// Squared magnitudes, `[channel][bin]` for bins `0..=n/2`
    power: Vec<Vec<f64>>,
}

impl ChannelSpectra {
    /// Transform each column of `data` (samples x channels).
    ///
    /// No window function is applied and the spectrum is not normalized, so
    /// values scale with `n²`.
    #[must_use]
    pub fn compute(data: &DMatrix<f64>, sample_rate: f64) -> Self {
        let n_samples = data.nrows();
        if n_samples == 0 {
            return Self { n_samples, sample_rate, power: Vec::new() };
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n_samples);
        let mut scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        let n_bins = n_samples / 2 + 1;

        let power = data
            .column_iter()
            .map(|column| {
                let mut buffer: Vec<Complex<f64>> = column.iter().map(|&s| Complex::new(s, 0.0)).collect();
                fft.process_with_scratch(&mut buffer, &mut scratch);
                buffer[..n_bins].iter().map(Complex::norm_sqr).collect()
            })
            .collect();

        Self { n_samples, sample_rate, power }
    }

    /// Frequency resolution (Hz per bin)
    #[must_use]
    pub fn frequency_resolution(&self) -> f64 {
        if self.n_samples == 0 {
            return 0.0;
        }
        self.sample_rate / self.n_samples as f64
    }

    /// Index of the one-sided bin closest to `freq_hz`; ties go to the lower bin
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn nearest_bin(&self, freq_hz: f64) -> usize {
        let resolution = self.frequency_resolution();
        if resolution <= 0.0 || freq_hz <= 0.0 {
            return 0;
        }
        let max_bin = self.n_samples / 2;
        let exact = freq_hz / resolution;
        let lower = exact.floor();
        let bin = if exact - lower <= 0.5 { lower } else { lower + 1.0 };
        (bin as usize).min(max_bin)
    }

    /// Power at the bin nearest `freq_hz`, averaged across channels
    #[must_use]
    pub fn mean_power_at(&self, freq_hz: f64) -> f64 {
        if self.power.is_empty() {
            return 0.0;
        }
        let bin = self.nearest_bin(freq_hz);
        let total: f64 = self.power.iter().map(|channel| channel[bin]).sum();
        total / self.power.len() as f64
    }
}
