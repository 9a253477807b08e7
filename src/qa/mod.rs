//! Quality assurance: re-detection over redacted output, statistics, reports
//! and spot-check samples.

pub mod report;
pub mod spot_check;
pub mod verifier;

pub use report::{ConversationStats, DatasetStats, QaReport, QaStatus, VerificationSummary};
pub use spot_check::{
    DEFAULT_SPOT_CHECK_SAMPLES, DEFAULT_SPOT_CHECK_SEED, SPOT_CHECK_FILE, SpotCheckSample, SpotChecker,
    save_samples,
};
pub use verifier::{
    ConversationVerification, DatasetVerification, FailedConversation, FailedSegment, ResidualPii,
    SegmentVerification, Verifier,
};
