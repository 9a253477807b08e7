//! De-identification of conversational speech datasets.
//!
//! Each conversation is a WAV recording plus a timestamped transcript. PII is
//! detected in the transcript, replaced with category tags, located in the
//! audio through word alignment and muted there. The redacted transcript is
//! then checked again by a verifier.

pub mod align;
pub mod audio;
pub mod config;
pub mod deid;
pub mod error;
pub mod pipeline;
pub mod qa;
pub mod transcript;

pub use config::{AppConfig, ConfigError};
pub use error::DeidError;
pub use pipeline::{Conversation, Pipeline};
