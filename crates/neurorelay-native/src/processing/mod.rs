//! Signal processing
//!
//! - [`filters`]: Butterworth bandpass, notch and zero-phase filtering
//! - [`fft`]: Per-channel spectral power at stimulation frequencies
//! - [`cca`]: Canonical correlation analysis
//! - [`references`]: Sine/cosine reference sets
//! - [`stats`]: Score normalization

pub mod cca;
pub mod fft;
pub mod filters;
pub mod references;
pub mod stats;
