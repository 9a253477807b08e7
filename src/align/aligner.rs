//! Word-level timing for a conversation.
//!
//! Precise timings come from an [`ExternalAligner`]; whenever it is disabled,
//! missing, slow or broken the aligner degrades to one timing per segment.
//! The tier actually used is part of the returned [`AlignmentOutcome`].

use super::mfa::{AlignError, ExternalAligner};
use crate::audio::AudioBuffer;
use crate::transcript::{TranscriptSegment, project};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Audio timing of one word, or of a whole segment in fallback mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start_time: f64,
    pub end_time: f64,
    /// Global offsets of the word in the joined transcript, when known
    pub char_start: Option<usize>,
    pub char_end: Option<usize>,
}

impl WordTiming {
    pub fn new(word: impl Into<String>, start_time: f64, end_time: f64) -> Self {
        Self {
            word: word.into(),
            start_time,
            end_time,
            char_start: None,
            char_end: None,
        }
    }

    pub fn with_span(mut self, char_start: usize, char_end: usize) -> Self {
        self.char_start = Some(char_start);
        self.char_end = Some(char_end);
        self
    }

    /// `(char_start, char_end)` when both are known
    pub fn span(&self) -> Option<(usize, usize)> {
        self.char_start.zip(self.char_end)
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// Why precise alignment was not used
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FallbackReason {
    Disabled,
    Unavailable,
    Timeout,
    Failed(String),
    EmptyOutput,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::Disabled => write!(f, "aligner disabled"),
            FallbackReason::Unavailable => write!(f, "aligner unavailable"),
            FallbackReason::Timeout => write!(f, "aligner timed out"),
            FallbackReason::Failed(message) => write!(f, "aligner failed: {}", message),
            FallbackReason::EmptyOutput => write!(f, "aligner returned no words"),
        }
    }
}

impl From<&AlignError> for FallbackReason {
    fn from(err: &AlignError) -> Self {
        match err {
            AlignError::Unavailable(_) => FallbackReason::Unavailable,
            AlignError::Timeout(_) => FallbackReason::Timeout,
            other => FallbackReason::Failed(other.to_string()),
        }
    }
}

/// Timings together with the tier that produced them
#[derive(Debug, Clone, PartialEq)]
pub enum AlignmentOutcome {
    Precise(Vec<WordTiming>),
    Fallback {
        timings: Vec<WordTiming>,
        reason: FallbackReason,
    },
}

impl AlignmentOutcome {
    /// `"mfa"` for precise timings, `"segment"` for the fallback
    pub fn method(&self) -> &'static str {
        match self {
            AlignmentOutcome::Precise(_) => "mfa",
            AlignmentOutcome::Fallback { .. } => "segment",
        }
    }

    pub fn timings(&self) -> &[WordTiming] {
        match self {
            AlignmentOutcome::Precise(timings) => timings,
            AlignmentOutcome::Fallback { timings, .. } => timings,
        }
    }

    pub fn is_precise(&self) -> bool {
        matches!(self, AlignmentOutcome::Precise(_))
    }

    pub fn fallback_reason(&self) -> Option<&FallbackReason> {
        match self {
            AlignmentOutcome::Precise(_) => None,
            AlignmentOutcome::Fallback { reason, .. } => Some(reason),
        }
    }
}

/// Two-tier aligner: external forced alignment, then segment timings
#[derive(Clone)]
pub struct WordTimingAligner {
    external: Option<Arc<dyn ExternalAligner>>,
    timeout: Option<Duration>,
}

impl WordTimingAligner {
    pub fn new(external: Arc<dyn ExternalAligner>) -> Self {
        Self {
            external: Some(external),
            timeout: None,
        }
    }

    /// Aligner that always uses segment timings
    pub fn segment_only() -> Self {
        Self {
            external: None,
            timeout: None,
        }
    }

    /// Bound every external alignment call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Align a conversation.
    ///
    /// Never fails: every problem with the external aligner turns into a
    /// [`AlignmentOutcome::Fallback`] for this conversation only.
    pub async fn align(
        &self,
        conversation_id: &str,
        audio: &AudioBuffer,
        segments: &[TranscriptSegment],
    ) -> AlignmentOutcome {
        let Some(external) = &self.external else {
            return fallback(segments, FallbackReason::Disabled);
        };

        if !external.is_available() {
            warn!(
                "{} aligner not available for {}, using segment timings",
                external.name(),
                conversation_id
            );
            return fallback(segments, FallbackReason::Unavailable);
        }

        let (transcript, _) = project(segments);
        info!(
            "Aligning {} with {} ({} chars)",
            conversation_id,
            external.name(),
            transcript.len()
        );

        let attempt = external.align(conversation_id, audio, &transcript);
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => Err(AlignError::Timeout(limit)),
            },
            None => attempt.await,
        };

        match result {
            Ok(words) if words.is_empty() => {
                warn!("{} aligner returned no words for {}", external.name(), conversation_id);
                fallback(segments, FallbackReason::EmptyOutput)
            }
            Ok(words) => {
                let timings = locate_words(&transcript, words);
                let located = timings.iter().filter(|t| t.span().is_some()).count();
                info!(
                    "Aligned {} words for {} ({} located in transcript)",
                    timings.len(),
                    conversation_id,
                    located
                );
                AlignmentOutcome::Precise(timings)
            }
            Err(e) => {
                warn!("Alignment failed for {}: {}", conversation_id, e);
                fallback(segments, FallbackReason::from(&e))
            }
        }
    }
}

fn fallback(segments: &[TranscriptSegment], reason: FallbackReason) -> AlignmentOutcome {
    info!(
        "Using segment timings for {} segments ({})",
        segments.len(),
        reason
    );
    AlignmentOutcome::Fallback {
        timings: segment_fallback(segments),
        reason,
    }
}

/// One timing per segment, covering the segment's full text
pub fn segment_fallback(segments: &[TranscriptSegment]) -> Vec<WordTiming> {
    segments
        .iter()
        .map(|s| WordTiming::new(s.text.clone(), s.start_time, s.end_time_or_default()))
        .collect()
}

/// Recover each word's span in `transcript`.
///
/// Words are searched case-insensitively from the end of the previously
/// located word, so a repeated word resolves to its next occurrence. A word
/// that cannot be found keeps its timing but gets no span.
pub fn locate_words(transcript: &str, words: Vec<WordTiming>) -> Vec<WordTiming> {
    let mut cursor = 0;

    words
        .into_iter()
        .map(|timing| {
            let needle = timing.word.trim();
            if needle.is_empty() {
                return timing;
            }

            let found = RegexBuilder::new(&regex::escape(needle))
                .case_insensitive(true)
                .build()
                .ok()
                .and_then(|pattern| pattern.find_at(transcript, cursor));

            match found {
                Some(m) => {
                    cursor = m.end();
                    WordTiming {
                        char_start: Some(m.start()),
                        char_end: Some(m.end()),
                        ..timing
                    }
                }
                None => {
                    debug!("Word '{}' not found after offset {}", timing.word, cursor);
                    WordTiming {
                        char_start: None,
                        char_end: None,
                        ..timing
                    }
                }
            }
        })
        .collect()
}
