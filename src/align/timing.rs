//! Map PII character spans onto audio time ranges.

use super::aligner::WordTiming;
use crate::audio::MuteRange;
use crate::deid::PiiMatch;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// What to do with PII that no timing covers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapPolicy {
    /// Log the gap and keep going; the text is still redacted
    #[default]
    Warn,
    /// Abort the conversation
    Fail,
}

/// Audio time range holding one PII occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiiTimeRange {
    pub value: String,
    pub category: String,
    pub tag: String,
    pub start_time: f64,
    pub end_time: f64,
}

impl PiiTimeRange {
    pub fn mute_range(&self) -> MuteRange {
        MuteRange::new(self.start_time, self.end_time)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimingResolution {
    pub ranges: Vec<PiiTimeRange>,
    /// Matches with no overlapping timing (redacted in text only)
    pub gaps: Vec<PiiMatch>,
}

impl TimingResolution {
    pub fn has_gaps(&self) -> bool {
        !self.gaps.is_empty()
    }

    pub fn mute_ranges(&self) -> Vec<MuteRange> {
        self.ranges.iter().map(PiiTimeRange::mute_range).collect()
    }
}

/// Resolve global PII matches to audio time ranges.
///
/// When any timing carries a character span only spanned timings are used.
/// Otherwise timings are laid out left to right, one space apart, which
/// reproduces the joined transcript when each timing is a whole segment.
pub fn match_pii_to_timings(pii_matches: &[PiiMatch], timings: &[WordTiming]) -> TimingResolution {
    let positions: Vec<(usize, usize, &WordTiming)> =
        if timings.iter().any(|t| t.span().is_some()) {
            timings
                .iter()
                .filter_map(|t| t.span().map(|(start, end)| (start, end, t)))
                .collect()
        } else {
            let mut cursor = 0;
            timings
                .iter()
                .map(|t| {
                    let start = cursor;
                    let end = start + t.word.len();
                    cursor = end + 1;
                    (start, end, t)
                })
                .collect()
        };

    let mut resolution = TimingResolution::default();

    for pii in pii_matches {
        let overlapping: Vec<&WordTiming> = positions
            .iter()
            .filter(|(start, end, _)| !(*end <= pii.start || *start >= pii.end))
            .map(|(_, _, timing)| *timing)
            .collect();

        let span = match (overlapping.first(), overlapping.last()) {
            (Some(first), Some(last)) => Some((first.start_time, last.end_time)),
            _ => None,
        };

        match span {
            Some((start_time, end_time)) if end_time > start_time => {
                resolution.ranges.push(PiiTimeRange {
                    value: pii.value.clone(),
                    category: pii.category.clone(),
                    tag: pii.tag.clone(),
                    start_time,
                    end_time,
                })
            }
            Some((start_time, end_time)) => {
                warn!(
                    "Redaction gap: {} '{}' at {}..{} resolves to empty time range {:.3}..{:.3}",
                    pii.category, pii.value, pii.start, pii.end, start_time, end_time
                );
                resolution.gaps.push(pii.clone());
            }
            None => {
                warn!(
                    "Redaction gap: {} '{}' at {}..{} has no audio timing",
                    pii.category, pii.value, pii.start, pii.end
                );
                resolution.gaps.push(pii.clone());
            }
        }
    }

    info!(
        "Matched {} of {} PII instances to timings",
        resolution.ranges.len(),
        pii_matches.len()
    );

    resolution
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::aligner::segment_fallback;
    use crate::deid::detector::tests::test_detector;
    use crate::transcript::TranscriptSegment;

    fn pii(value: &str, start: usize) -> PiiMatch {
        PiiMatch {
            category: "cities".to_string(),
            value: value.to_string(),
            start,
            end: start + value.len(),
            tag: "[CITY]".to_string(),
        }
    }

    #[test]
    fn test_precise_match_selects_located_word() {
        let timings = vec![
            WordTiming::new("houston", 1.0, 1.5).with_span(20, 27),
            WordTiming::new("i", 6.0, 6.1).with_span(103, 104),
            WordTiming::new("like", 6.1, 6.5).with_span(105, 109),
            WordTiming::new("houston", 6.5, 7.2).with_span(110, 117),
            WordTiming::new("uh", 7.2, 7.4),
        ];

        let resolution = match_pii_to_timings(&[pii("Houston", 110)], &timings);

        assert_eq!(resolution.ranges.len(), 1);
        let range = &resolution.ranges[0];
        assert_eq!((range.start_time, range.end_time), (6.5, 7.2));
        assert_eq!(range.tag, "[CITY]");
        assert!(!resolution.has_gaps());
    }

    #[test]
    fn test_multi_word_match_spans_first_to_last() {
        let timings = vec![
            WordTiming::new("in", 1.0, 1.2).with_span(0, 2),
            WordTiming::new("new", 1.2, 1.5).with_span(3, 6),
            WordTiming::new("york", 1.5, 1.9).with_span(7, 11),
            WordTiming::new("today", 1.9, 2.4).with_span(12, 17),
        ];
        let resolution = match_pii_to_timings(&[pii("New York", 3)], &timings);
        let range = &resolution.ranges[0];
        assert_eq!((range.start_time, range.end_time), (1.2, 1.9));
    }

    #[test]
    fn test_fallback_layout_matches_joined_transcript() {
        let detector = test_detector();
        let segments = vec![
            TranscriptSegment::new("S1", "Hello from Dallas", 0.0).with_end_time(2.5),
            TranscriptSegment::new("S2", "Nice weather", 2.5).with_end_time(4.0),
            TranscriptSegment::new("S1", "I like Houston", 4.0),
        ];
        let detection = detector.detect_transcript(&segments);
        let timings = segment_fallback(&segments);

        let resolution = match_pii_to_timings(&detection.matches, &timings);

        let times: Vec<(f64, f64)> = resolution
            .ranges
            .iter()
            .map(|r| (r.start_time, r.end_time))
            .collect();
        assert_eq!(times, vec![(0.0, 2.5), (4.0, 9.0)]);
    }

    #[test]
    fn test_unmatched_pii_is_a_gap() {
        let timings = vec![WordTiming::new("hello", 0.0, 0.5).with_span(0, 5)];
        let resolution = match_pii_to_timings(&[pii("Dallas", 11)], &timings);

        assert!(resolution.ranges.is_empty());
        assert_eq!(resolution.gaps.len(), 1);
        assert_eq!(resolution.gaps[0].value, "Dallas");
    }

    #[test]
    fn test_coincident_timestamps_are_a_gap() {
        let segments = crate::transcript::TranscriptParser::new()
            .parse_content("[1.0] <Speaker_1> in Dallas [1.0] <Speaker_2> ok")
            .unwrap();
        let transcript = crate::transcript::Transcript::new("conv", segments);
        assert_eq!(transcript.segments[0].end_time, Some(1.0));

        let detection = test_detector().detect_transcript(&transcript.segments);
        let resolution =
            match_pii_to_timings(&detection.matches, &segment_fallback(&transcript.segments));

        assert!(resolution.ranges.is_empty());
        assert!(resolution.mute_ranges().is_empty());
        assert_eq!(resolution.gaps.len(), 1);
        assert_eq!(resolution.gaps[0].value, "Dallas");
    }

    #[test]
    fn test_touching_spans_do_not_overlap() {
        let timings = vec![
            WordTiming::new("from", 0.5, 0.8).with_span(6, 10),
            WordTiming::new("dallas", 0.9, 1.4).with_span(11, 17),
            WordTiming::new("now", 1.4, 1.6).with_span(17, 20),
        ];
        let resolution = match_pii_to_timings(&[pii("Dallas", 11)], &timings);
        let range = &resolution.ranges[0];
        assert_eq!((range.start_time, range.end_time), (0.9, 1.4));
    }

    #[test]
    fn test_gap_policy_from_config_value() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: GapPolicy,
        }
        let parsed: Wrapper = toml::from_str("policy = \"fail\"").unwrap();
        assert_eq!(parsed.policy, GapPolicy::Fail);
        assert_eq!(GapPolicy::default(), GapPolicy::Warn);
    }
}
