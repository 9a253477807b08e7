//! Per-conversation de-identification and the batch driver around it.

pub mod batch;
pub mod conversation;

pub use batch::{
    BatchReport, ConversationInput, ConversationSummary, FailedInput, OutputLayout, discover_inputs,
};
pub use conversation::{Conversation, ConversationOutcome, Pipeline, RedactedTranscript};
