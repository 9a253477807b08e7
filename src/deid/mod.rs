//! De-identification: category configuration, PII detection and text redaction.

pub mod config;
pub mod detector;
pub mod redactor;

pub use config::{CategoryEntry, PiiCategory, PiiConfig, derive_tag};
pub use detector::{PiiDetector, PiiMatch, TranscriptDetection, summarize};
pub use redactor::{RedactionLog, RedactionLogEntry, redact, redact_segments};
