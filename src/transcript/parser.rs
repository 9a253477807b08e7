//! Parser for timestamped conversation transcripts.
//!
//! Format: `[0.000] <Speaker_1> text here [5.500] <Speaker_2> more text`

use super::segment::TranscriptSegment;
use regex::Regex;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

const TIMESTAMP_PATTERN: &str = r"\[(\d+(?:\.\d+)?)\]";
const SPEAKER_PATTERN: &str = r"<(Speaker_\d+)>";
const UNKNOWN_SPEAKER: &str = "Unknown";

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

pub struct TranscriptParser {
    timestamp: Regex,
    speaker: Regex,
}

impl Default for TranscriptParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptParser {
    pub fn new() -> Self {
        Self {
            timestamp: Regex::new(TIMESTAMP_PATTERN).expect("timestamp pattern is valid"),
            speaker: Regex::new(SPEAKER_PATTERN).expect("speaker pattern is valid"),
        }
    }

    /// Parse a transcript file into segments
    pub fn parse_file(&self, path: &Path) -> Result<Vec<TranscriptSegment>, ParseError> {
        let content = std::fs::read_to_string(path)?;
        let segments = self.parse_content(&content)?;
        info!("Parsed {} segments from {:?}", segments.len(), path);
        Ok(segments)
    }

    /// Parse transcript content into segments.
    ///
    /// End times are backfilled from the following segment's start; the last
    /// segment's end stays unset.
    pub fn parse_content(&self, content: &str) -> Result<Vec<TranscriptSegment>, ParseError> {
        let stamps: Vec<(f64, usize, usize)> = self
            .timestamp
            .captures_iter(content)
            .map(|caps| {
                let whole = caps.get(0).expect("group 0 always present");
                let raw = &caps[1];
                raw.parse::<f64>()
                    .map(|t| (t, whole.start(), whole.end()))
                    .map_err(|_| ParseError::InvalidTimestamp(raw.to_string()))
            })
            .collect::<Result<_, _>>()?;

        let mut segments: Vec<TranscriptSegment> = Vec::new();

        for (i, &(timestamp, _, chunk_start)) in stamps.iter().enumerate() {
            let chunk_end = stamps
                .get(i + 1)
                .map(|&(_, next_start, _)| next_start)
                .unwrap_or(content.len());
            let chunk = content[chunk_start..chunk_end].trim();

            if chunk.is_empty() {
                continue;
            }
            if let Some(segment) = self.parse_chunk(timestamp, chunk) {
                segments.push(segment);
            }
        }

        for i in 1..segments.len() {
            let next_start = segments[i].start_time;
            segments[i - 1].end_time = Some(next_start);
        }

        debug!("Parsed {} segments from {} timestamps", segments.len(), stamps.len());

        Ok(segments)
    }

    fn parse_chunk(&self, timestamp: f64, chunk: &str) -> Option<TranscriptSegment> {
        let (speaker, text) = match self.speaker.captures(chunk) {
            Some(caps) => {
                let speaker = caps[1].to_string();
                let text = self.speaker.replace_all(chunk, "").trim().to_string();
                (speaker, text)
            }
            None => (UNKNOWN_SPEAKER.to_string(), chunk.trim().to_string()),
        };

        if text.is_empty() {
            return None;
        }

        Some(TranscriptSegment::new(speaker, text, timestamp))
    }
}
