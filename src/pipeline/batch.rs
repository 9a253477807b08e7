//! Batch processing of a directory of conversations.
//!
//! Input is a flat directory of `<id>.wav` + `<id>.txt` pairs. Output:
//!
//! ```text
//! <out>/audio/<id>.wav
//! <out>/transcripts/<id>.json
//! <out>/qa/qa_report.json
//! <out>/qa/qa_report.md
//! ```

use super::conversation::{Conversation, ConversationOutcome, Pipeline};
use crate::error::DeidError;
use crate::qa::{
    ConversationStats, ConversationVerification, DatasetStats, DatasetVerification, QaReport,
    SpotCheckSample, SpotChecker,
};
use crate::transcript::TranscriptSegment;
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Files making up one conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationInput {
    pub conversation_id: String,
    pub audio_path: PathBuf,
    pub transcript_path: PathBuf,
}

/// Find `<id>.wav` files with a matching `<id>.txt`, sorted by id.
///
/// Audio without a transcript is skipped with a warning.
pub fn discover_inputs(dir: &Path, limit: Option<usize>) -> Result<Vec<ConversationInput>, DeidError> {
    let mut inputs = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_wav = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);
        if !is_wav {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        let transcript_path = path.with_extension("txt");
        if !transcript_path.is_file() {
            warn!("No transcript for {:?}, skipping", path);
            continue;
        }

        inputs.push(ConversationInput {
            conversation_id: stem.to_string(),
            audio_path: path.clone(),
            transcript_path,
        });
    }

    inputs.sort_by(|a, b| a.conversation_id.cmp(&b.conversation_id));
    if let Some(limit) = limit {
        inputs.truncate(limit);
    }

    info!("Found {} conversations in {:?}", inputs.len(), dir);

    Ok(inputs)
}

/// Output directory layout
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn create(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.audio_dir())?;
        std::fs::create_dir_all(self.transcripts_dir())?;
        std::fs::create_dir_all(self.qa_dir())?;
        Ok(())
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.root.join("audio")
    }

    pub fn transcripts_dir(&self) -> PathBuf {
        self.root.join("transcripts")
    }

    pub fn qa_dir(&self) -> PathBuf {
        self.root.join("qa")
    }

    pub fn audio_path(&self, conversation_id: &str) -> PathBuf {
        self.audio_dir().join(format!("{}.wav", conversation_id))
    }

    pub fn transcript_path(&self, conversation_id: &str) -> PathBuf {
        self.transcripts_dir().join(format!("{}.json", conversation_id))
    }

    /// Write the redacted audio and transcript of one conversation.
    ///
    /// Both files are staged under temporary names and renamed into place
    /// only once both are written, so a failed conversation leaves nothing
    /// behind.
    pub fn write(&self, outcome: &ConversationOutcome) -> Result<(), DeidError> {
        let id = outcome.conversation_id();
        let json = serde_json::to_string_pretty(&outcome.redacted)?;

        let audio_path = self.audio_path(id);
        let transcript_path = self.transcript_path(id);
        let audio_staged = staged(&audio_path);
        let transcript_staged = staged(&transcript_path);

        let written = outcome
            .audio
            .save(&audio_staged)
            .map_err(DeidError::from)
            .and_then(|_| std::fs::write(&transcript_staged, json).map_err(DeidError::from))
            .and_then(|_| std::fs::rename(&audio_staged, &audio_path).map_err(DeidError::from))
            .and_then(|_| {
                std::fs::rename(&transcript_staged, &transcript_path).map_err(|e| {
                    let _ = std::fs::remove_file(&audio_path);
                    DeidError::from(e)
                })
            });

        if written.is_err() {
            for path in [&audio_staged, &transcript_staged] {
                if path.exists() {
                    let _ = std::fs::remove_file(path);
                }
            }
        }

        written
    }
}

/// Temporary sibling of `path`, e.g. `audio/.conv_1.wav.partial`
fn staged(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.partial", name))
}

/// What is kept of a processed conversation once its outputs are written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub stats: ConversationStats,
    pub verification: ConversationVerification,
    /// Redacted segments, kept for spot checks
    pub segments: Vec<TranscriptSegment>,
}

/// A conversation excluded from the output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedInput {
    pub conversation_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    /// Processed conversations, in input order
    pub completed: Vec<ConversationSummary>,
    pub failed: Vec<FailedInput>,
    /// Verification over completed conversations
    pub verification: DatasetVerification,
    pub stats: DatasetStats,
}

impl BatchReport {
    fn from_results(completed: Vec<ConversationSummary>, failed: Vec<FailedInput>) -> Self {
        let verifications: Vec<ConversationVerification> =
            completed.iter().map(|c| c.verification.clone()).collect();
        let stats: Vec<ConversationStats> = completed.iter().map(|c| c.stats.clone()).collect();

        Self {
            verification: DatasetVerification::aggregate(&verifications),
            stats: DatasetStats::from_conversations(&stats),
            completed,
            failed,
        }
    }

    pub fn qa_report(&self) -> QaReport {
        QaReport::new(self.stats.clone(), &self.verification)
    }

    /// Redacted segments sampled from completed conversations
    pub fn spot_check(&self, checker: &SpotChecker, num_samples: usize) -> Vec<SpotCheckSample> {
        let conversations: Vec<(&str, &[TranscriptSegment])> = self
            .completed
            .iter()
            .map(|c| (c.stats.conversation_id.as_str(), c.segments.as_slice()))
            .collect();
        checker.sample(&conversations, num_samples)
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.conversation_id.as_str()).collect()
    }
}

impl Pipeline {
    /// Load, de-identify and (optionally) write one conversation
    async fn run_one(
        self: Arc<Self>,
        input: ConversationInput,
        output: Option<OutputLayout>,
    ) -> Result<ConversationSummary, DeidError> {
        let loader = Arc::clone(&self);
        let to_load = input.clone();
        let conversation = tokio::task::spawn_blocking(move || {
            Conversation::load(
                &to_load.conversation_id,
                &to_load.audio_path,
                &to_load.transcript_path,
                &loader.parser,
            )
        })
        .await
        .map_err(|e| task_error(&input.conversation_id, e))??;

        let outcome = self.process(&conversation).await?;
        drop(conversation);

        let summary = ConversationSummary {
            stats: outcome.stats.clone(),
            verification: outcome.verification.clone(),
            segments: outcome.redacted.segments.clone(),
        };

        if let Some(layout) = output {
            tokio::task::spawn_blocking(move || layout.write(&outcome))
                .await
                .map_err(|e| task_error(&input.conversation_id, e))??;
        }

        Ok(summary)
    }

    /// Process conversations concurrently, at most `workers` at a time.
    ///
    /// A conversation that fails for any reason is logged and left out of
    /// the output; the rest of the batch continues.
    pub async fn run_batch(
        self: Arc<Self>,
        inputs: Vec<ConversationInput>,
        output: Option<OutputLayout>,
        progress: Option<ProgressBar>,
    ) -> BatchReport {
        info!(
            "Processing {} conversations with {} workers",
            inputs.len(),
            self.workers
        );

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut handles = Vec::with_capacity(inputs.len());

        for input in inputs {
            let pipeline = Arc::clone(&self);
            let semaphore = Arc::clone(&semaphore);
            let output = output.clone();
            let progress = progress.clone();
            let conversation_id = input.conversation_id.clone();

            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| task_error(&input.conversation_id, e))?;

                if let Some(pb) = &progress {
                    pb.set_message(input.conversation_id.clone());
                }
                let result = pipeline.run_one(input, output).await;
                if let Some(pb) = &progress {
                    pb.inc(1);
                }
                result
            });
            handles.push((conversation_id, handle));
        }

        let mut completed = Vec::new();
        let mut failed = Vec::new();

        for (conversation_id, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(task_error(&conversation_id, e)),
            };

            match result {
                Ok(summary) => completed.push(summary),
                Err(e) => {
                    error!("Failed to process {}: {}", conversation_id, e);
                    failed.push(FailedInput {
                        conversation_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Batch finished: {} completed, {} failed",
            completed.len(),
            failed.len()
        );

        BatchReport::from_results(completed, failed)
    }
}

fn task_error(conversation_id: &str, err: impl std::fmt::Display) -> DeidError {
    DeidError::Task {
        conversation_id: conversation_id.to_string(),
        message: err.to_string(),
    }
}
