//! NeuroRelay Native - host-side SSVEP decoding engine
//!
//! This crate turns a live EEG stream into debounced selections:
//! - Acquisition from LSL-compatible or synthetic streams
//! - Zero-phase bandpass / notch filtering
//! - CCA and spectral-power frequency scoring
//! - Stability, dwell and cooldown gating of predictions
//! - JSON-lines dispatch of committed selections
//!
//! # Modules
//!
//! - [`bridge`]: Transports, ring buffer, stream source and live prediction
//! - [`processing`]: Signal processing primitives
//! - [`ssvep`]: Detector and selection state machine
//! - [`dispatch`]: Commit event sink

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod bridge;
pub mod dispatch;
pub mod processing;
pub mod ssvep;

// Re-export key types
pub use bridge::{LivePredictor, PipelineEvent, SourceStatus, StreamSource};
pub use dispatch::{CommandDispatcher, JsonlDispatcher};
pub use ssvep::{SelectionMachine, SsvepDetector};
