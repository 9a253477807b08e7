//! PII detection by literal-set pattern matching.
//!
//! Every category compiles to one alternation of its escaped items, longest
//! item first, anchored on word boundaries. The compiled set is fixed at
//! construction and shared read-only between conversations.

use super::config::PiiConfig;
use crate::config::ConfigError;
use crate::transcript::{OffsetTable, TranscriptSegment, project};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// A detected PII occurrence.
///
/// `start`/`end` are global offsets when produced against the joined
/// transcript and local offsets once re-expressed for one segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiMatch {
    pub category: String,
    /// Matched text with its original casing
    pub value: String,
    pub start: usize,
    pub end: usize,
    /// Replacement tag of the category
    pub tag: String,
}

impl PiiMatch {
    /// The same match measured from `origin` (global -> local)
    pub fn relative_to(&self, origin: usize) -> Self {
        Self {
            category: self.category.clone(),
            value: self.value.clone(),
            start: self.start - origin,
            end: self.end - origin,
            tag: self.tag.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    fn overlaps(&self, other: &PiiMatch) -> bool {
        !(self.end <= other.start || self.start >= other.end)
    }
}

/// Result of detecting PII over a whole conversation
#[derive(Debug, Clone, Default)]
pub struct TranscriptDetection {
    /// The joined transcript the matches were found in
    pub joined_text: String,
    pub offsets: OffsetTable,
    /// Matches with global offsets, ascending by start
    pub matches: Vec<PiiMatch>,
    /// Matches bucketed by owning segment, still with global offsets
    pub by_segment: BTreeMap<usize, Vec<PiiMatch>>,
}

impl TranscriptDetection {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

#[derive(Debug)]
struct CompiledCategory {
    name: String,
    tag: String,
    pattern: Regex,
}

#[derive(Debug)]
pub struct PiiDetector {
    categories: Vec<CompiledCategory>,
}

impl PiiDetector {
    /// Compile all configured categories. Categories with no items are skipped.
    pub fn new(config: &PiiConfig) -> Result<Self, ConfigError> {
        let mut categories = Vec::new();

        for category in config.categories() {
            if category.items.is_empty() {
                debug!("Skipping empty category {}", category.name);
                continue;
            }

            let mut items: Vec<&str> = category.items.iter().map(String::as_str).collect();
            items.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));

            let alternation = items
                .iter()
                .map(|item| regex::escape(item))
                .collect::<Vec<_>>()
                .join("|");

            let pattern = RegexBuilder::new(&format!(r"\b(?:{})\b", alternation))
                .case_insensitive(!category.case_sensitive)
                .build()
                .map_err(|source| ConfigError::Pattern {
                    category: category.name.clone(),
                    source,
                })?;

            debug!(
                "Compiled pattern for {} with {} items",
                category.name,
                category.items.len()
            );

            categories.push(CompiledCategory {
                name: category.name.clone(),
                tag: category.tag.clone(),
                pattern,
            });
        }

        let detector = Self { categories };
        detector.check_tags();

        info!("Initialized PiiDetector with {} categories", detector.categories.len());

        Ok(detector)
    }

    /// Warn about tags that would themselves be detected on re-verification
    fn check_tags(&self) {
        for category in &self.categories {
            let hits = self.detect(&category.tag);
            if let Some(hit) = hits.first() {
                warn!(
                    "Tag {} of category {} contains configured item '{}' ({}); verification will flag it",
                    category.tag, category.name, hit.value, hit.category
                );
            }
        }
    }

    /// Number of compiled (non-empty) categories
    pub fn category_count(&self) -> usize {
        self.categories.len()
    }

    /// Detect all PII in `text`, sorted by start offset.
    ///
    /// Candidates starting at the same offset are ordered longest first, then
    /// by category order. A candidate overlapping an earlier kept match is
    /// dropped, so returned matches never overlap. When a dropped candidate
    /// reaches past the kept match, its uncovered tail is scanned again with
    /// every category, since the dropped span hid any item inside it.
    pub fn detect(&self, text: &str) -> Vec<PiiMatch> {
        let mut pending = Vec::new();
        for index in 0..self.categories.len() {
            self.scan(index, text, 0, text.len(), &mut pending);
        }
        sort_pending(&mut pending);

        let mut matches: Vec<PiiMatch> = Vec::with_capacity(pending.len());

        while let Some((_, candidate)) = pending.pop() {
            let Some(kept) = matches.last() else {
                matches.push(candidate);
                continue;
            };
            if !kept.overlaps(&candidate) {
                matches.push(candidate);
                continue;
            }

            debug!(
                "Dropping {} '{}' at {} overlapping {} '{}'",
                candidate.category, candidate.value, candidate.start, kept.category, kept.value
            );

            if candidate.end > kept.end {
                let (from, until) = (kept.end, candidate.end);
                let mut tail = Vec::new();
                for index in 0..self.categories.len() {
                    self.scan(index, text, from, until, &mut tail);
                }
                let mut added = false;
                for found in tail {
                    if !pending.iter().any(|(_, p)| p == &found.1) {
                        pending.push(found);
                        added = true;
                    }
                }
                if added {
                    sort_pending(&mut pending);
                }
            }
        }

        matches
    }

    /// Matches of one category starting in `[from, until)`.
    ///
    /// Uses `find_at` on the whole text so word boundaries see the
    /// surrounding characters.
    fn scan(
        &self,
        index: usize,
        text: &str,
        from: usize,
        until: usize,
        out: &mut Vec<(usize, PiiMatch)>,
    ) {
        let category = &self.categories[index];
        let mut position = from;

        loop {
            let Some(m) = category.pattern.find_at(text, position) else {
                break;
            };
            if m.start() >= until {
                break;
            }
            out.push((
                index,
                PiiMatch {
                    category: category.name.clone(),
                    value: m.as_str().to_string(),
                    start: m.start(),
                    end: m.end(),
                    tag: category.tag.clone(),
                },
            ));
            if m.end() == m.start() {
                break;
            }
            position = m.end();
        }
    }

    /// Detect PII across a conversation in one pass over the joined transcript.
    pub fn detect_transcript(&self, segments: &[TranscriptSegment]) -> TranscriptDetection {
        let (joined_text, offsets) = project(segments);
        let matches = self.detect(&joined_text);
        let by_segment = bucket_by_segment(&joined_text, &offsets, &matches);

        info!(
            "Detected {} PII instances in {} of {} segments",
            matches.len(),
            by_segment.len(),
            segments.len()
        );

        TranscriptDetection {
            joined_text,
            offsets,
            matches,
            by_segment,
        }
    }

    /// Matches keyed by segment index, with global offsets
    pub fn detect_over_segments(
        &self,
        segments: &[TranscriptSegment],
    ) -> BTreeMap<usize, Vec<PiiMatch>> {
        self.detect_transcript(segments).by_segment
    }
}

/// Order candidates for popping from the back: ascending start, then
/// longest first, then category order.
fn sort_pending(pending: &mut [(usize, PiiMatch)]) {
    pending.sort_by(|(ca, a), (cb, b)| {
        b.start
            .cmp(&a.start)
            .then(a.len().cmp(&b.len()))
            .then(cb.cmp(ca))
    });
}

/// Count matches per category
pub fn summarize(matches: &[PiiMatch]) -> BTreeMap<String, usize> {
    let mut summary = BTreeMap::new();
    for m in matches {
        *summary.entry(m.category.clone()).or_insert(0) += 1;
    }
    summary
}

/// Assign each global match to the segment(s) it falls in.
///
/// A match straddling a segment boundary is split into one fragment per
/// touched segment; separator characters belong to no fragment.
fn bucket_by_segment(
    joined_text: &str,
    offsets: &OffsetTable,
    matches: &[PiiMatch],
) -> BTreeMap<usize, Vec<PiiMatch>> {
    let boundaries = offsets.boundaries();
    let mut by_segment: BTreeMap<usize, Vec<PiiMatch>> = BTreeMap::new();

    for m in matches {
        let Some((first, _)) = offsets.invert(m.start) else {
            continue;
        };

        let mut fragments = Vec::new();
        for (index, &(seg_start, seg_end)) in boundaries.iter().enumerate().skip(first) {
            if seg_start >= m.end {
                break;
            }
            let start = m.start.max(seg_start);
            let end = m.end.min(seg_end);
            if end > start {
                fragments.push((index, start, end));
            }
        }

        if fragments.len() > 1 {
            warn!(
                "{} '{}' at {}..{} straddles {} segments; redacting each part",
                m.category,
                m.value,
                m.start,
                m.end,
                fragments.len()
            );
        }

        for (index, start, end) in fragments {
            let fragment = if start == m.start && end == m.end {
                m.clone()
            } else {
                PiiMatch {
                    category: m.category.clone(),
                    value: joined_text[start..end].to_string(),
                    start,
                    end,
                    tag: m.tag.clone(),
                }
            };
            by_segment.entry(index).or_default().push(fragment);
        }
    }

    by_segment
}
