//! SSVEP decoding
//!
//! - [`detector`]: Scores analysis windows against candidate frequencies
//! - [`selection`]: Debounces predictions into commit events

pub mod detector;
pub mod selection;

pub use detector::{ConfigUpdate, SsvepDetector};
pub use selection::{SelectionMachine, SelectionState, SelectionUpdate, TileFeedback};
