//! NeuroRelay Core - configuration and result types
//!
//! This crate provides the plain data shared by the NeuroRelay SSVEP
//! pipeline. It performs no I/O and spawns no threads; the signal engine
//! lives in `neurorelay-native`.
//!
//! # Modules
//!
//! - [`config`]: Detector, selection, stream and pipeline configuration
//! - [`error`]: Configuration validation errors
//! - [`types`]: Detection method, prediction results and commit events
//!
//! # Example
//!
//! ```rust
//! use neurorelay_core::config::SsvepConfig;
//!
//! let config = SsvepConfig {
//!     frequencies: vec![8.0, 10.0, 12.0, 15.0],
//!     sample_rate: 250.0,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types at crate root
pub use config::{
    PipelineConfig, SelectionConfig, SsvepConfig, SsvepConfigDelta, StreamConfig, DEFAULT_LABELS,
};
pub use error::{ConfigError, ConfigResult};
pub use types::{CommitEvent, DetectionMethod, FrequencyScore, Prediction};
