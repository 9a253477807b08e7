//! Offset projection between segment-local and transcript-global positions.
//!
//! This is the single place where segments are joined into one transcript.
//! PII detection, redaction and forced alignment all go through it so their
//! character positions agree. Offsets are UTF-8 byte offsets.

use super::segment::TranscriptSegment;

/// Separator placed between segments in the joined transcript
pub const SEGMENT_SEPARATOR: &str = " ";

/// Starting offset and length of every segment in the joined transcript
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetTable {
    starts: Vec<usize>,
    lengths: Vec<usize>,
}

impl OffsetTable {
    /// Starting offset of each segment
    pub fn starts(&self) -> &[usize] {
        &self.starts
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    /// Starting offset of segment `index`
    pub fn start_of(&self, index: usize) -> Option<usize> {
        self.starts.get(index).copied()
    }

    /// `(start, end)` of each segment in the joined transcript
    pub fn boundaries(&self) -> Vec<(usize, usize)> {
        self.starts
            .iter()
            .zip(&self.lengths)
            .map(|(&start, &len)| (start, start + len))
            .collect()
    }

    /// Map a global offset to `(segment_index, local_offset)`.
    ///
    /// An offset inside a separator gap snaps to the following segment with
    /// local offset 0 (separators never carry PII text). Offsets past the end
    /// resolve against the last segment. Returns `None` only for an empty table.
    pub fn invert(&self, global_offset: usize) -> Option<(usize, usize)> {
        if self.starts.is_empty() {
            return None;
        }

        let containing = self
            .starts
            .partition_point(|&start| start <= global_offset)
            .saturating_sub(1);

        let start = self.starts[containing];
        let end = start + self.lengths[containing];

        if global_offset >= start && global_offset < end {
            return Some((containing, global_offset - start));
        }

        if global_offset < start {
            return Some((containing, 0));
        }

        match self.starts.get(containing + 1) {
            Some(_) => Some((containing + 1, 0)),
            None => Some((containing, global_offset - start)),
        }
    }
}

/// Join segments with [`SEGMENT_SEPARATOR`].
pub fn project(segments: &[TranscriptSegment]) -> (String, OffsetTable) {
    project_with(segments, SEGMENT_SEPARATOR)
}

/// Join segments with `separator`, recording where each one starts.
///
/// `offsets[0] = 0` and `offsets[i] = offsets[i-1] + len(text[i-1]) + len(separator)`.
pub fn project_with(segments: &[TranscriptSegment], separator: &str) -> (String, OffsetTable) {
    let mut table = OffsetTable {
        starts: Vec::with_capacity(segments.len()),
        lengths: Vec::with_capacity(segments.len()),
    };
    let mut joined = String::new();

    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            joined.push_str(separator);
        }
        table.starts.push(joined.len());
        table.lengths.push(segment.text.len());
        joined.push_str(&segment.text);
    }

    (joined, table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segments(texts: &[&str]) -> Vec<TranscriptSegment> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| TranscriptSegment::new("S1", *t, i as f64 * 3.0))
            .collect()
    }

    #[test]
    fn test_project_empty() {
        let (joined, table) = project(&[]);
        assert_eq!(joined, "");
        assert!(table.is_empty());
    }

    #[test]
    fn test_project_offsets() {
        let segs = segments(&["Hello from Dallas", "I like Houston", "Nice to meet you"]);
        let (joined, table) = project(&segs);

        assert_eq!(joined, "Hello from Dallas I like Houston Nice to meet you");
        assert_eq!(table.starts(), &[0, 18, 33]);
        assert_eq!(table.boundaries(), vec![(0, 17), (18, 32), (33, 49)]);
    }

    #[test]
    fn test_round_trip_invariant() {
        let cases: Vec<Vec<&str>> = vec![
            vec!["a"],
            vec!["", "b", ""],
            vec!["Ünïcödé text", "São Paulo", "東京"],
            vec!["one two", "", "", "three"],
        ];

        for texts in cases {
            let segs = segments(&texts);
            for separator in [" ", "", " | "] {
                let (joined, table) = project_with(&segs, separator);
                for (i, seg) in segs.iter().enumerate() {
                    let start = table.starts()[i];
                    assert_eq!(&joined[start..start + seg.text.len()], seg.text);
                }
                assert!(table.starts().windows(2).all(|w| w[0] <= w[1]));
            }
        }
    }

    #[test]
    fn test_invert_inside_segments() {
        let segs = segments(&["Hello from Dallas", "I like Houston"]);
        let (_, table) = project(&segs);

        assert_eq!(table.invert(0), Some((0, 0)));
        assert_eq!(table.invert(11), Some((0, 11)));
        assert_eq!(table.invert(16), Some((0, 16)));
        assert_eq!(table.invert(18), Some((1, 0)));
        assert_eq!(table.invert(25), Some((1, 7)));
    }

    #[test]
    fn test_invert_separator_snaps_to_following_segment() {
        let segs = segments(&["Hello", "world"]);
        let (_, table) = project(&segs);
        assert_eq!(table.invert(5), Some((1, 0)));
    }

    #[test]
    fn test_invert_empty_segment_and_past_end() {
        let segs = segments(&["ab", "", "cd"]);
        let (joined, table) = project(&segs);
        assert_eq!(joined, "ab  cd");
        assert_eq!(table.invert(3), Some((2, 0)));
        assert_eq!(table.invert(6), Some((2, 2)));
        assert_eq!(OffsetTable::default().invert(0), None);
    }
}
