//! Audio buffers and PII muting.

pub mod muter;
pub mod wav;

pub use muter::{AudioMuter, DEFAULT_FADE_DURATION_SECS, MuteRange, merge_ranges};
pub use wav::{AudioBuffer, AudioError};
