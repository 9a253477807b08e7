//! Word-level audio alignment and PII time-range resolution.

pub mod aligner;
pub mod mfa;
pub mod timing;

pub use aligner::{
    AlignmentOutcome, FallbackReason, WordTiming, WordTimingAligner, locate_words, segment_fallback,
};
pub use mfa::{AlignError, ExternalAligner, MfaAligner, MfaConfig, parse_textgrid};
pub use timing::{GapPolicy, PiiTimeRange, TimingResolution, match_pii_to_timings};
