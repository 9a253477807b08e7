//! Random segment samples for manual review of redacted output.
//!
//! Sampling is seeded, so the same run over the same dataset always
//! picks the same segments.

use crate::transcript::TranscriptSegment;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::io::Write as _;
use std::path::Path;
use tracing::info;

pub const DEFAULT_SPOT_CHECK_SEED: u64 = 42;
pub const DEFAULT_SPOT_CHECK_SAMPLES: usize = 10;

/// File name of the samples, next to the QA report
pub const SPOT_CHECK_FILE: &str = "spot_check_samples.jsonl";

/// One redacted segment picked for manual review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotCheckSample {
    pub conversation_id: String,
    pub segment_index: usize,
    pub speaker: String,
    pub text: String,
    pub start_time: f64,
    pub end_time: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SpotChecker {
    seed: u64,
}

impl Default for SpotChecker {
    fn default() -> Self {
        Self::new(DEFAULT_SPOT_CHECK_SEED)
    }
}

impl SpotChecker {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Pick up to `num_samples` conversations and one segment from each.
    ///
    /// Conversations without segments yield no sample.
    pub fn sample<'a>(
        &self,
        conversations: &[(&'a str, &'a [TranscriptSegment])],
        num_samples: usize,
    ) -> Vec<SpotCheckSample> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut samples = Vec::new();

        for &(conversation_id, segments) in conversations.choose_multiple(&mut rng, num_samples) {
            if segments.is_empty() {
                continue;
            }
            let segment_index = rng.gen_range(0..segments.len());
            let segment = &segments[segment_index];

            samples.push(SpotCheckSample {
                conversation_id: conversation_id.to_string(),
                segment_index,
                speaker: segment.speaker.clone(),
                text: segment.text.clone(),
                start_time: segment.start_time,
                end_time: segment.end_time,
            });
        }

        info!("Generated {} spot-check samples", samples.len());

        samples
    }
}

/// Write one JSON object per line
pub fn save_samples(samples: &[SpotCheckSample], path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    for sample in samples {
        serde_json::to_writer(&mut file, sample)?;
        file.write_all(b"\n")?;
    }
    file.flush()?;

    info!("Saved {} samples to {:?}", samples.len(), path);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(count: usize) -> Vec<TranscriptSegment> {
        (0..count)
            .map(|i| {
                TranscriptSegment::new("Speaker_1", format!("segment {}", i), i as f64)
                    .with_end_time(i as f64 + 1.0)
            })
            .collect()
    }

    #[test]
    fn test_sampling_is_seeded() {
        let a = conversation(5);
        let b = conversation(3);
        let c = conversation(8);
        let conversations = [("a", a.as_slice()), ("b", b.as_slice()), ("c", c.as_slice())];

        let first = SpotChecker::new(7).sample(&conversations, 2);
        let second = SpotChecker::new(7).sample(&conversations, 2);

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert_ne!(first[0].conversation_id, first[1].conversation_id);

        for sample in &first {
            let (_, segments) = conversations
                .iter()
                .find(|(id, _)| *id == sample.conversation_id)
                .unwrap();
            let segment = &segments[sample.segment_index];
            assert_eq!(sample.text, segment.text);
            assert_eq!(sample.end_time, segment.end_time);
        }
    }

    #[test]
    fn test_sample_count_is_capped_and_empty_skipped() {
        let full = conversation(2);
        let empty: Vec<TranscriptSegment> = Vec::new();
        let conversations = [("full", full.as_slice()), ("empty", empty.as_slice())];

        let samples = SpotChecker::default().sample(&conversations, 10);

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].conversation_id, "full");
        assert!(SpotChecker::default().sample(&conversations, 0).is_empty());
    }

    #[test]
    fn test_save_samples_jsonl() {
        let segments = conversation(4);
        let samples = SpotChecker::default().sample(&[("conv", segments.as_slice())], 1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qa").join(SPOT_CHECK_FILE);
        save_samples(&samples, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1);
        let parsed: SpotCheckSample = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed, samples[0]);
    }
}
