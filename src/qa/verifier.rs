//! Closed-loop verification of redacted transcripts.
//!
//! The verifier does not look at the redaction log. It runs detection again
//! over the redacted text and reports whatever it finds.

use crate::deid::{PiiDetector, PiiMatch};
use crate::transcript::TranscriptSegment;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// A PII occurrence that survived redaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidualPii {
    pub value: String,
    pub category: String,
    /// Local offset within the segment
    pub position: usize,
}

impl From<&PiiMatch> for ResidualPii {
    fn from(m: &PiiMatch) -> Self {
        Self {
            value: m.value.clone(),
            category: m.category.clone(),
            position: m.start,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentVerification {
    pub passed: bool,
    pub pii_found: usize,
    pub matches: Vec<ResidualPii>,
}

/// A segment that still contains PII
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedSegment {
    pub segment_index: usize,
    pub speaker: String,
    pub text: String,
    pub matches: Vec<ResidualPii>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationVerification {
    pub conversation_id: String,
    pub passed: bool,
    pub total_segments: usize,
    pub pii_found: usize,
    pub failed_segments: Vec<FailedSegment>,
}

/// A conversation that failed verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedConversation {
    pub conversation_id: String,
    pub pii_found: usize,
    pub failed_segments: Vec<FailedSegment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetVerification {
    pub passed: bool,
    pub total_conversations: usize,
    pub failed_conversations: Vec<FailedConversation>,
    pub total_pii_found: usize,
    /// `1 - failed / total`, 1.0 for an empty dataset
    pub pass_rate: f64,
}

impl DatasetVerification {
    /// Aggregate per-conversation results
    pub fn aggregate(results: &[ConversationVerification]) -> Self {
        let failed_conversations: Vec<FailedConversation> = results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| FailedConversation {
                conversation_id: r.conversation_id.clone(),
                pii_found: r.pii_found,
                failed_segments: r.failed_segments.clone(),
            })
            .collect();

        let total_conversations = results.len();
        let total_pii_found = failed_conversations.iter().map(|c| c.pii_found).sum();
        let pass_rate = if total_conversations == 0 {
            1.0
        } else {
            1.0 - failed_conversations.len() as f64 / total_conversations as f64
        };

        info!(
            "Dataset verification: {} PII found, pass rate: {:.2}%",
            total_pii_found,
            pass_rate * 100.0
        );

        Self {
            passed: failed_conversations.is_empty(),
            total_conversations,
            failed_conversations,
            total_pii_found,
            pass_rate,
        }
    }
}

pub struct Verifier {
    detector: Arc<PiiDetector>,
}

impl Verifier {
    pub fn new(detector: Arc<PiiDetector>) -> Self {
        Self { detector }
    }

    pub fn verify_text(&self, text: &str) -> SegmentVerification {
        let matches: Vec<ResidualPii> = self
            .detector
            .detect(text)
            .iter()
            .map(ResidualPii::from)
            .collect();
        SegmentVerification {
            passed: matches.is_empty(),
            pii_found: matches.len(),
            matches,
        }
    }

    /// Verify every segment of one redacted conversation
    pub fn verify_conversation(
        &self,
        conversation_id: &str,
        segments: &[TranscriptSegment],
    ) -> ConversationVerification {
        let mut failed_segments = Vec::new();
        let mut pii_found = 0;

        for (segment_index, segment) in segments.iter().enumerate() {
            let result = self.verify_text(&segment.text);
            if result.passed {
                continue;
            }
            pii_found += result.pii_found;
            failed_segments.push(FailedSegment {
                segment_index,
                speaker: segment.speaker.clone(),
                text: segment.text.clone(),
                matches: result.matches,
            });
        }

        if pii_found > 0 {
            warn!(
                "Verification failed for {}: {} PII instances in {} segments",
                conversation_id,
                pii_found,
                failed_segments.len()
            );
        }

        ConversationVerification {
            conversation_id: conversation_id.to_string(),
            passed: failed_segments.is_empty(),
            total_segments: segments.len(),
            pii_found,
            failed_segments,
        }
    }

    pub fn verify_dataset<'a>(
        &self,
        conversations: impl IntoIterator<Item = (&'a str, &'a [TranscriptSegment])>,
    ) -> DatasetVerification {
        let results: Vec<ConversationVerification> = conversations
            .into_iter()
            .map(|(id, segments)| self.verify_conversation(id, segments))
            .collect();
        DatasetVerification::aggregate(&results)
    }
}
