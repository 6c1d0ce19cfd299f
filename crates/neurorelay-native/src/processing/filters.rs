//! Digital filters for SSVEP preprocessing
//!
//! Floating-point IIR filters built from second-order sections:
//! - Butterworth bandpass of arbitrary even or odd order (bilinear transform)
//! - Notch with a given quality factor
//! - Zero-phase (forward-backward) application with odd edge extension and
//!   steady-state initial conditions

use std::f64::consts::PI;

use rustfft::num_complex::Complex64;

use neurorelay_core::error::{ConfigError, ConfigResult};

/// Order of the preprocessing bandpass
pub const BANDPASS_ORDER: usize = 4;

/// Quality factor of the line-noise notch
pub const NOTCH_Q: f64 = 30.0;

/// Biquad coefficients (second-order section)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BiquadCoeffs {
    /// Numerator coefficients [b0, b1, b2]
    pub b: [f64; 3],
    /// Denominator coefficients [a0=1, a1, a2]
    pub a: [f64; 3],
}

impl BiquadCoeffs {
    /// Section whose denominator has the two given roots (z-plane poles).
    fn from_poles(b: [f64; 3], p1: Complex64, p2: Complex64) -> Self {
        let sum = p1 + p2;
        let product = p1 * p2;
        Self { b, a: [1.0, -sum.re, product.re] }
    }

    /// Complex frequency response at normalized angular frequency `omega` (rad/sample)
    #[must_use]
    pub fn response(&self, omega: f64) -> Complex64 {
        let z1 = Complex64::from_polar(1.0, -omega);
        let z2 = z1 * z1;
        let num = self.b[0] + z1 * self.b[1] + z2 * self.b[2];
        let den = self.a[0] + z1 * self.a[1] + z2 * self.a[2];
        num / den
    }

    /// Gain at DC (z = 1)
    #[must_use]
    pub fn dc_gain(&self) -> f64 {
        (self.b[0] + self.b[1] + self.b[2]) / (self.a[0] + self.a[1] + self.a[2])
    }

    /// Transposed direct-form II state after a unit step has settled
    fn step_state(&self) -> [f64; 2] {
        let gain = self.dc_gain();
        [gain - self.b[0], self.b[2] - self.a[2] * gain]
    }
}

/// Second-order section with transposed direct-form II state
#[derive(Clone, Debug)]
pub struct Biquad {
    coeffs: BiquadCoeffs,
    /// State: [z1, z2]
    state: [f64; 2],
}

impl Biquad {
    /// Create a new biquad section with given coefficients
    #[must_use]
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self { coeffs, state: [0.0, 0.0] }
    }

    /// Notch filter coefficients for power line interference.
    ///
    /// Bandwidth is `notch_freq / q` at the -3 dB points.
    #[must_use]
    pub fn notch_coeffs(sample_rate: f64, notch_freq: f64, q: f64) -> BiquadCoeffs {
        let w0 = 2.0 * PI * notch_freq / sample_rate;
        let bw = w0 / q;
        let beta = (bw / 2.0).tan();
        let gain = 1.0 / (1.0 + beta);
        let cos_w0 = w0.cos();

        BiquadCoeffs {
            b: [gain, -2.0 * cos_w0 * gain, gain],
            a: [1.0, -2.0 * cos_w0 * gain, 2.0 * gain - 1.0],
        }
    }

    /// Process a single sample
    pub fn filter(&mut self, input: f64) -> f64 {
        let BiquadCoeffs { b, a } = self.coeffs;
        let output = b[0] * input + self.state[0];
        self.state[0] = b[1] * input - a[1] * output + self.state[1];
        self.state[1] = b[2] * input - a[2] * output;
        output
    }

    /// Set the internal state directly
    pub fn set_state(&mut self, state: [f64; 2]) {
        self.state = state;
    }

    /// Reset filter state
    pub fn reset(&mut self) {
        self.state = [0.0, 0.0];
    }
}

/// Cascade of second-order sections applied forward and backward.
#[derive(Clone, Debug)]
pub struct ZeroPhaseFilter {
    sections: Vec<BiquadCoeffs>,
    /// Settled state per section for a unit input, already scaled by the
    /// DC gain of the preceding sections
    step_states: Vec<[f64; 2]>,
}

impl ZeroPhaseFilter {
    /// Build from second-order sections
    #[must_use]
    pub fn from_sections(sections: Vec<BiquadCoeffs>) -> Self {
        let mut step_states = Vec::with_capacity(sections.len());
        let mut upstream_gain = 1.0;
        for section in &sections {
            let [z1, z2] = section.step_state();
            step_states.push([z1 * upstream_gain, z2 * upstream_gain]);
            upstream_gain *= section.dc_gain();
        }
        Self { sections, step_states }
    }

    /// Butterworth bandpass between `low_hz` and `high_hz`.
    ///
    /// `order` is the order of the lowpass prototype; the resulting filter
    /// has `2 * order` poles.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if either edge is at or above Nyquist or the
    /// edges are not `0 < low < high`.
    pub fn butterworth_bandpass(sample_rate: f64, low_hz: f64, high_hz: f64, order: usize) -> ConfigResult<Self> {
        let nyquist = sample_rate / 2.0;
        for cutoff in [low_hz, high_hz] {
            if cutoff >= nyquist {
                return Err(ConfigError::CutoffAboveNyquist { cutoff_hz: cutoff, nyquist_hz: nyquist });
            }
        }
        if !(low_hz > 0.0 && low_hz < high_hz) || order == 0 {
            return Err(ConfigError::InvalidBand { low_hz, high_hz });
        }

        // Pre-warped analog band edges
        let fs2 = 2.0 * sample_rate;
        let w_low = fs2 * (PI * low_hz / sample_rate).tan();
        let w_high = fs2 * (PI * high_hz / sample_rate).tan();
        let bandwidth = w_high - w_low;
        let w0_sq = w_low * w_high;

        let bilinear = |s: Complex64| (fs2 + s) / (fs2 - s);
        let numerator = [1.0, 0.0, -1.0];

        let mut sections = Vec::with_capacity(order);
        for k in 1..=order {
            let theta = PI * (2 * k + order - 1) as f64 / (2 * order) as f64;
            let proto = Complex64::from_polar(1.0, theta);

            // Lower-half prototype poles are the conjugates of upper-half ones
            if proto.im < -1e-12 {
                continue;
            }

            let scaled = proto * (bandwidth / 2.0);
            let disc = (scaled * scaled - w0_sq).sqrt();
            let (s1, s2) = (scaled + disc, scaled - disc);

            if proto.im > 1e-12 {
                for s in [s1, s2] {
                    let z = bilinear(s);
                    sections.push(BiquadCoeffs::from_poles(numerator, z, z.conj()));
                }
            } else {
                // Real prototype pole (odd order): its two band poles pair up
                sections.push(BiquadCoeffs::from_poles(numerator, bilinear(s1), bilinear(s2)));
            }
        }

        // Unity gain at the geometric centre of the band
        let center = 2.0 * (w0_sq.sqrt() / fs2).atan();
        let magnitude: f64 = sections.iter().map(|s| s.response(center).norm()).product();
        if magnitude > 0.0 && magnitude.is_finite() {
            if let Some(first) = sections.first_mut() {
                for coeff in &mut first.b {
                    *coeff /= magnitude;
                }
            }
        }

        Ok(Self::from_sections(sections))
    }

    /// Notch at `notch_hz` with quality factor `q`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotchAboveNyquist`] if the notch is at or above
    /// Nyquist.
    pub fn notch(sample_rate: f64, notch_hz: f64, q: f64) -> ConfigResult<Self> {
        let nyquist = sample_rate / 2.0;
        if notch_hz >= nyquist {
            return Err(ConfigError::NotchAboveNyquist { notch_hz, nyquist_hz: nyquist });
        }
        if notch_hz <= 0.0 {
            return Err(ConfigError::InvalidFrequencies(format!("notch {notch_hz} Hz is not positive")));
        }
        Ok(Self::from_sections(vec![Biquad::notch_coeffs(sample_rate, notch_hz, q)]))
    }

    /// Second-order sections of this filter
    #[must_use]
    pub fn sections(&self) -> &[BiquadCoeffs] {
        &self.sections
    }

    /// Length of the equivalent single transfer-function coefficient vectors
    #[must_use]
    pub fn coefficient_len(&self) -> usize {
        2 * self.sections.len() + 1
    }

    /// Samples of odd extension added at each edge before filtering
    #[must_use]
    pub fn edge_padding(&self) -> usize {
        3 * (self.coefficient_len() - 1)
    }

    /// Magnitude response at `freq_hz`
    #[must_use]
    pub fn gain_at(&self, freq_hz: f64, sample_rate: f64) -> f64 {
        let omega = 2.0 * PI * freq_hz / sample_rate;
        self.sections.iter().map(|s| s.response(omega).norm()).product()
    }

    /// Single causal pass, state initialised as if `x[0]` had been constant forever
    fn filter_settled(&self, x: &[f64]) -> Vec<f64> {
        let Some(&first) = x.first() else {
            return Vec::new();
        };

        let mut stages: Vec<Biquad> = self
            .sections
            .iter()
            .zip(&self.step_states)
            .map(|(coeffs, step)| {
                let mut stage = Biquad::new(*coeffs);
                stage.set_state([step[0] * first, step[1] * first]);
                stage
            })
            .collect();

        x.iter()
            .map(|&sample| stages.iter_mut().fold(sample, |acc, stage| stage.filter(acc)))
            .collect()
    }

    /// Forward-backward filtering with odd extension at both edges.
    ///
    /// The edge extension is shortened when the input is shorter than
    /// [`edge_padding`](Self::edge_padding) + 1 samples.
    #[must_use]
    pub fn filtfilt(&self, x: &[f64]) -> Vec<f64> {
        let n = x.len();
        if n < 2 || self.sections.is_empty() {
            return x.to_vec();
        }

        let pad = self.edge_padding().min(n - 1);
        let (head, tail) = (x[0], x[n - 1]);

        let mut extended = Vec::with_capacity(n + 2 * pad);
        extended.extend((1..=pad).rev().map(|i| 2.0 * head - x[i]));
        extended.extend_from_slice(x);
        extended.extend((n - 1 - pad..n - 1).rev().map(|i| 2.0 * tail - x[i]));

        let mut forward = self.filter_settled(&extended);
        forward.reverse();
        let mut backward = self.filter_settled(&forward);
        backward.reverse();

        backward[pad..pad + n].to_vec()
    }
}
