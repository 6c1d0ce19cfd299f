//! Sine/cosine reference sets for CCA

use std::f64::consts::PI;

use nalgebra::DMatrix;

/// Reference matrix for one stimulation frequency.
///
/// Shape is `n_samples x 2·harmonics`; columns are
/// `sin(2π·h·f·t), cos(2π·h·f·t)` for `h = 1..=harmonics` with `t = i / fs`.
#[must_use]
pub fn reference_signals(frequency: f64, sample_rate: f64, n_samples: usize, harmonics: usize) -> DMatrix<f64> {
    DMatrix::from_fn(n_samples, 2 * harmonics, |i, col| {
        let h = (col / 2 + 1) as f64;
        let phase = 2.0 * PI * h * frequency * i as f64 / sample_rate;
        if col % 2 == 0 {
            phase.sin()
        } else {
            phase.cos()
        }
    })
}

/// Reference matrices for each frequency, in the given order
#[must_use]
pub fn reference_set(frequencies: &[f64], sample_rate: f64, n_samples: usize, harmonics: usize) -> Vec<(f64, DMatrix<f64>)> {
    frequencies
        .iter()
        .map(|&f| (f, reference_signals(f, sample_rate, n_samples, harmonics)))
        .collect()
}
