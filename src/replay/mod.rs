//! Prioritized retention of observed bus traffic for replay and analysis.

mod buffer;

pub use buffer::{ExperienceEntry, Outcome, ReplayBuffer, ReplayBufferStats};
