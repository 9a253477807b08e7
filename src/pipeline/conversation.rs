//! De-identification of a single conversation.

use crate::align::{
    ExternalAligner, FallbackReason, GapPolicy, MfaAligner, MfaConfig, PiiTimeRange,
    WordTimingAligner, match_pii_to_timings,
};
use crate::audio::{AudioBuffer, AudioMuter};
use crate::config::{AppConfig, ConfigError};
use crate::deid::{PiiDetector, PiiMatch, RedactionLog, redact_segments, summarize};
use crate::error::DeidError;
use crate::qa::{ConversationStats, ConversationVerification, Verifier};
use crate::transcript::{Transcript, TranscriptParser, TranscriptSegment};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Audio and transcript of one recording
#[derive(Debug, Clone)]
pub struct Conversation {
    pub transcript: Transcript,
    pub audio: AudioBuffer,
}

impl Conversation {
    pub fn new(transcript: Transcript, audio: AudioBuffer) -> Self {
        Self { transcript, audio }
    }

    pub fn id(&self) -> &str {
        &self.transcript.conversation_id
    }

    /// Load a WAV file and its transcript. The last segment is closed at the
    /// end of the audio.
    pub fn load(
        conversation_id: &str,
        audio_path: &Path,
        transcript_path: &Path,
        parser: &TranscriptParser,
    ) -> Result<Self, DeidError> {
        let audio = AudioBuffer::load(audio_path)?;
        let segments = parser.parse_file(transcript_path)?;
        let transcript =
            Transcript::with_audio_duration(conversation_id, segments, audio.duration_secs());
        Ok(Self::new(transcript, audio))
    }
}

/// Redacted transcript as written to `transcripts/<id>.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactedTranscript {
    pub conversation_id: String,
    pub segments: Vec<TranscriptSegment>,
    pub redaction_log: RedactionLog,
    /// PII found per category
    pub pii_summary: BTreeMap<String, usize>,
    /// `"mfa"` or `"segment"`; absent when the conversation had no PII
    pub alignment_method: Option<String>,
    pub fallback_reason: Option<FallbackReason>,
    pub muted_ranges: Vec<PiiTimeRange>,
    /// PII redacted in text that has no muted audio
    pub redaction_gaps: Vec<PiiMatch>,
}

/// Everything produced for one conversation
#[derive(Debug, Clone)]
pub struct ConversationOutcome {
    pub redacted: RedactedTranscript,
    pub audio: AudioBuffer,
    pub verification: ConversationVerification,
    pub stats: ConversationStats,
}

impl ConversationOutcome {
    pub fn conversation_id(&self) -> &str {
        &self.redacted.conversation_id
    }

    pub fn passed(&self) -> bool {
        self.verification.passed
    }
}

/// The de-identification pipeline.
///
/// Holds only read-only state, so one instance is shared by every
/// concurrently processed conversation.
pub struct Pipeline {
    pub(super) detector: Arc<PiiDetector>,
    pub(super) parser: TranscriptParser,
    aligner: WordTimingAligner,
    muter: AudioMuter,
    verifier: Verifier,
    gap_policy: GapPolicy,
    pub(super) workers: usize,
}

impl Pipeline {
    pub fn new(detector: Arc<PiiDetector>, aligner: WordTimingAligner) -> Self {
        Self {
            verifier: Verifier::new(Arc::clone(&detector)),
            detector,
            parser: TranscriptParser::new(),
            aligner,
            muter: AudioMuter::default(),
            gap_policy: GapPolicy::default(),
            workers: 1,
        }
    }

    /// Build the pipeline described by `config`, compiling all PII patterns
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let detector = Arc::new(PiiDetector::new(&config.pii)?);

        let aligner = if config.aligner.enabled {
            let mfa = MfaAligner::new(MfaConfig::from(&config.aligner));
            if !mfa.is_available() {
                warn!(
                    "Aligner '{}' not found, conversations will use segment timings",
                    config.aligner.binary
                );
            }
            WordTimingAligner::new(Arc::new(mfa))
        } else {
            info!("Forced alignment disabled, using segment timings");
            WordTimingAligner::segment_only()
        };

        Ok(Self::new(detector, aligner)
            .with_muter(AudioMuter::new(config.audio.fade_duration_secs))
            .with_gap_policy(config.pipeline.gap_policy)
            .with_workers(config.pipeline.workers))
    }

    pub fn with_muter(mut self, muter: AudioMuter) -> Self {
        self.muter = muter;
        self
    }

    pub fn with_gap_policy(mut self, gap_policy: GapPolicy) -> Self {
        self.gap_policy = gap_policy;
        self
    }

    /// Maximum number of conversations processed at once
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn detector(&self) -> &PiiDetector {
        &self.detector
    }

    /// De-identify one conversation.
    ///
    /// Detection runs once over the joined transcript. Conversations without
    /// PII skip alignment and keep their audio as is.
    pub async fn process(
        &self,
        conversation: &Conversation,
    ) -> Result<ConversationOutcome, DeidError> {
        let id = conversation.id();
        let segments = &conversation.transcript.segments;
        info!("Processing {} ({} segments)", id, segments.len());

        let detection = self.detector.detect_transcript(segments);
        let (redacted_segments, redaction_log) =
            redact_segments(segments, &detection.by_segment, &detection.offsets);
        let pii_summary = summarize(&detection.matches);

        let mut alignment_method = None;
        let mut fallback_reason = None;
        let mut muted_ranges = Vec::new();
        let mut redaction_gaps = Vec::new();

        let audio = if detection.is_empty() {
            debug!("No PII in {}, audio left unchanged", id);
            conversation.audio.clone()
        } else {
            let alignment = self.aligner.align(id, &conversation.audio, segments).await;
            let resolution = match_pii_to_timings(&detection.matches, alignment.timings());

            if resolution.has_gaps() && self.gap_policy == GapPolicy::Fail {
                return Err(DeidError::RedactionGap {
                    conversation_id: id.to_string(),
                    count: resolution.gaps.len(),
                    values: resolution.gaps.iter().map(|m| m.value.clone()).collect(),
                });
            }

            let audio = self.muter.mute(&conversation.audio, &resolution.mute_ranges());

            alignment_method = Some(alignment.method().to_string());
            fallback_reason = alignment.fallback_reason().cloned();
            muted_ranges = resolution.ranges;
            redaction_gaps = resolution.gaps;
            audio
        };

        let verification = self.verifier.verify_conversation(id, &redacted_segments);

        let stats = ConversationStats {
            conversation_id: id.to_string(),
            total_segments: segments.len(),
            duration_secs: conversation.transcript.duration_secs(),
            speakers: conversation
                .transcript
                .speakers()
                .into_iter()
                .map(str::to_string)
                .collect(),
            pii_found: detection.matches.len(),
            pii_by_category: pii_summary.clone(),
            total_replacements: redaction_log.total_replacements,
            alignment_method: alignment_method.clone(),
        };

        info!(
            "Finished {}: {} PII, {} muted ranges, verification {}",
            id,
            detection.matches.len(),
            muted_ranges.len(),
            if verification.passed { "passed" } else { "FAILED" }
        );

        Ok(ConversationOutcome {
            redacted: RedactedTranscript {
                conversation_id: id.to_string(),
                segments: redacted_segments,
                redaction_log,
                pii_summary,
                alignment_method,
                fallback_reason,
                muted_ranges,
                redaction_gaps,
            },
            audio,
            verification,
            stats,
        })
    }
}
