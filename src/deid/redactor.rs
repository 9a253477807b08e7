//! Replace detected PII with category tags.
//!
//! Redaction always happens in one coordinate space at a time: matches are
//! converted to segment-local offsets before touching segment text, since a
//! tag is usually not as long as the text it replaces.

use super::detector::PiiMatch;
use crate::transcript::{OffsetTable, TranscriptSegment};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// One replacement made by the redactor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionLogEntry {
    pub original: String,
    pub category: String,
    pub tag: String,
    /// Local offset of the original text within its segment
    pub position: usize,
}

/// Replacements across a whole conversation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionLog {
    pub total_replacements: usize,
    pub by_segment: BTreeMap<usize, Vec<RedactionLogEntry>>,
    pub by_category: BTreeMap<String, usize>,
}

impl RedactionLog {
    fn record(&mut self, segment_index: usize, entries: Vec<RedactionLogEntry>) {
        self.total_replacements += entries.len();
        for entry in &entries {
            *self.by_category.entry(entry.category.clone()).or_insert(0) += 1;
        }
        self.by_segment.insert(segment_index, entries);
    }
}

/// Replace `matches` (local offsets into `text`) with their tags.
///
/// Replacements are applied right to left so earlier offsets stay valid; the
/// returned log is in left-to-right order.
pub fn redact(text: &str, matches: &[PiiMatch]) -> (String, Vec<RedactionLogEntry>) {
    if matches.is_empty() {
        return (text.to_string(), Vec::new());
    }

    let mut ordered: Vec<&PiiMatch> = matches.iter().collect();
    ordered.sort_by(|a, b| b.start.cmp(&a.start));

    let mut redacted = text.to_string();
    let mut log = Vec::with_capacity(ordered.len());
    let mut floor = usize::MAX;

    for m in ordered {
        let in_bounds = m.start < m.end
            && m.end <= redacted.len()
            && m.end <= floor
            && redacted.is_char_boundary(m.start)
            && redacted.is_char_boundary(m.end);

        if !in_bounds {
            warn!(
                "Skipping {} '{}' with invalid span {}..{} for text of length {}",
                m.category,
                m.value,
                m.start,
                m.end,
                text.len()
            );
            continue;
        }

        redacted.replace_range(m.start..m.end, &m.tag);
        floor = m.start;

        log.push(RedactionLogEntry {
            original: m.value.clone(),
            category: m.category.clone(),
            tag: m.tag.clone(),
            position: m.start,
        });
    }

    log.reverse();

    debug!("Redacted {} PII instances", log.len());

    (redacted, log)
}

/// Redact every segment that has matches.
///
/// `matches` holds global offsets keyed by segment index; each is converted
/// to local offsets with `offsets` before redaction. Segments without
/// matches are passed through as they are.
pub fn redact_segments(
    segments: &[TranscriptSegment],
    matches: &BTreeMap<usize, Vec<PiiMatch>>,
    offsets: &OffsetTable,
) -> (Vec<TranscriptSegment>, RedactionLog) {
    let mut redacted_segments = Vec::with_capacity(segments.len());
    let mut log = RedactionLog::default();

    for (index, segment) in segments.iter().enumerate() {
        let (Some(global), Some(origin)) = (matches.get(&index), offsets.start_of(index)) else {
            redacted_segments.push(segment.clone());
            continue;
        };

        let local: Vec<PiiMatch> = global.iter().map(|m| m.relative_to(origin)).collect();
        let (text, entries) = redact(&segment.text, &local);

        redacted_segments.push(segment.with_text(text));
        log.record(index, entries);
    }

    info!(
        "Redacted {} PII instances across {} segments",
        log.total_replacements,
        log.by_segment.len()
    );

    (redacted_segments, log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deid::detector::tests::test_detector;
    use crate::transcript::project;

    fn pii(category: &str, value: &str, start: usize, tag: &str) -> PiiMatch {
        PiiMatch {
            category: category.to_string(),
            value: value.to_string(),
            start,
            end: start + value.len(),
            tag: tag.to_string(),
        }
    }

    #[test]
    fn test_redact_text() {
        let text = "I'm from Dallas, Texas and I visited Houston.";
        let matches = vec![
            pii("cities", "Dallas", 9, "[CITY]"),
            pii("states", "Texas", 17, "[STATE]"),
            pii("cities", "Houston", 37, "[CITY]"),
        ];

        let (redacted, log) = redact(text, &matches);

        assert_eq!(redacted, "I'm from [CITY], [STATE] and I visited [CITY].");
        let positions: Vec<usize> = log.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![9, 17, 37]);
        assert_eq!(log[0].original, "Dallas");
        assert_eq!(log[1].tag, "[STATE]");
    }

    #[test]
    fn test_redact_unsorted_input() {
        let matches = vec![pii("days", "Friday", 8, "[DAY]"), pii("cities", "Dallas", 0, "[CITY]")];
        let (redacted, log) = redact("Dallas, Friday", &matches);
        assert_eq!(redacted, "[CITY], [DAY]");
        assert_eq!(log[0].original, "Dallas");
    }

    #[test]
    fn test_redact_no_matches_is_identity() {
        let (redacted, log) = redact("nothing to see", &[]);
        assert_eq!(redacted, "nothing to see");
        assert!(log.is_empty());
    }

    #[test]
    fn test_redact_skips_out_of_range_span() {
        let matches = vec![pii("cities", "Dallas", 20, "[CITY]")];
        let (redacted, log) = redact("short", &matches);
        assert_eq!(redacted, "short");
        assert!(log.is_empty());
    }

    #[test]
    fn test_redact_segments_scenario() {
        let detector = test_detector();
        let segments = vec![
            TranscriptSegment::new("S1", "Hello from Dallas", 0.0),
            TranscriptSegment::new("S2", "Nice weather", 2.0),
            TranscriptSegment::new("S1", "I like Houston", 4.0),
        ];
        let (_, offsets) = project(&segments);
        let matches = detector.detect_over_segments(&segments);

        let (redacted, log) = redact_segments(&segments, &matches, &offsets);

        let texts: Vec<&str> = redacted.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["Hello from [CITY]", "Nice weather", "I like [CITY]"]);
        assert_eq!(redacted[1], segments[1]);
        assert_eq!(redacted[2].start_time, 4.0);

        assert_eq!(log.total_replacements, 2);
        assert_eq!(log.by_category.get("cities"), Some(&2));
        assert_eq!(log.by_segment[&2][0].position, 7);
        assert!(!log.by_segment.contains_key(&1));
    }

    #[test]
    fn test_redacted_output_has_no_residual_pii() {
        let detector = test_detector();
        let segments = vec![
            TranscriptSegment::new("S1", "New York on Friday, then Dallas in May", 0.0),
            TranscriptSegment::new("S2", "texas TEXAS Texas", 2.0),
            TranscriptSegment::new("S1", "went to New", 4.0),
            TranscriptSegment::new("S2", "York in January", 6.0),
        ];
        let (_, offsets) = project(&segments);
        let matches = detector.detect_over_segments(&segments);
        let (redacted, _) = redact_segments(&segments, &matches, &offsets);

        for segment in &redacted {
            assert!(detector.detect(&segment.text).is_empty(), "{}", segment.text);
        }
    }
}
