use crate::audio::AudioError;
use crate::config::ConfigError;
use crate::transcript::ParseError;
use thiserror::Error;

/// Errors that abort processing of one conversation (or, for
/// configuration errors, the whole run)
#[derive(Error, Debug)]
pub enum DeidError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Transcript error: {0}")]
    Parse(#[from] ParseError),
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{count} PII instances in {conversation_id} have no audio timing: {values:?}")]
    RedactionGap {
        conversation_id: String,
        count: usize,
        values: Vec<String>,
    },
    #[error("Conversation {conversation_id} task failed: {message}")]
    Task {
        conversation_id: String,
        message: String,
    },
}
