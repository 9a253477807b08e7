//! Transcript segment model.
//!
//! Segments are produced once by parsing and never mutated afterwards;
//! redaction builds new segment values instead.

use serde::{Deserialize, Serialize};

/// Duration assumed for a segment whose end time is unknown
pub const DEFAULT_SEGMENT_DURATION_SECS: f64 = 5.0;

/// One speaker turn of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Speaker identifier (e.g. "Speaker_1")
    pub speaker: String,
    /// Spoken text
    pub text: String,
    /// Start time in seconds
    pub start_time: f64,
    /// End time in seconds (unset until backfilled)
    pub end_time: Option<f64>,
}

impl TranscriptSegment {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>, start_time: f64) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
            start_time,
            end_time: None,
        }
    }

    pub fn with_end_time(mut self, end_time: f64) -> Self {
        self.end_time = Some(end_time);
        self
    }

    /// End time, or `start_time + 5.0` when it was never resolved
    pub fn end_time_or_default(&self) -> f64 {
        self.end_time
            .unwrap_or(self.start_time + DEFAULT_SEGMENT_DURATION_SECS)
    }

    /// Copy of this segment carrying different text
    pub fn with_text(&self, text: String) -> Self {
        Self {
            speaker: self.speaker.clone(),
            text,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

/// An ordered conversation whose segment end times have been resolved
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub conversation_id: String,
    pub segments: Vec<TranscriptSegment>,
}

impl Transcript {
    /// Build a transcript, backfilling missing end times from the next
    /// segment's start and closing the final segment at `start + 5.0`.
    pub fn new(conversation_id: impl Into<String>, segments: Vec<TranscriptSegment>) -> Self {
        Self::resolve(conversation_id.into(), segments, None)
    }

    /// Like [`Transcript::new`] but closes the final segment at the audio duration.
    pub fn with_audio_duration(
        conversation_id: impl Into<String>,
        segments: Vec<TranscriptSegment>,
        duration_secs: f64,
    ) -> Self {
        Self::resolve(conversation_id.into(), segments, Some(duration_secs))
    }

    fn resolve(
        conversation_id: String,
        mut segments: Vec<TranscriptSegment>,
        duration_secs: Option<f64>,
    ) -> Self {
        let next_starts: Vec<Option<f64>> = segments
            .iter()
            .skip(1)
            .map(|s| Some(s.start_time))
            .chain(std::iter::once(None))
            .collect();

        for (segment, next_start) in segments.iter_mut().zip(next_starts) {
            if segment.end_time.is_some() {
                continue;
            }
            let end = match (next_start, duration_secs) {
                (Some(next), _) => next,
                (None, Some(duration)) if duration > segment.start_time => duration,
                (None, _) => segment.start_time + DEFAULT_SEGMENT_DURATION_SECS,
            };
            segment.end_time = Some(end);
        }

        Self {
            conversation_id,
            segments,
        }
    }

    /// Distinct speakers in order of first appearance
    pub fn speakers(&self) -> Vec<&str> {
        let mut speakers: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if !speakers.contains(&segment.speaker.as_str()) {
                speakers.push(&segment.speaker);
            }
        }
        speakers
    }

    /// End of the last segment, or 0 for an empty transcript
    pub fn duration_secs(&self) -> f64 {
        self.segments
            .last()
            .map(|s| s.end_time_or_default())
            .unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}
