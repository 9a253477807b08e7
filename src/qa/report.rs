//! Dataset statistics and the QA report.
//!
//! The report is written twice: `qa_report.json` for machines and
//! `qa_report.md` next to it for people.

use super::verifier::DatasetVerification;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// Per-conversation figures feeding [`DatasetStats`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationStats {
    pub conversation_id: String,
    pub total_segments: usize,
    pub duration_secs: f64,
    pub speakers: Vec<String>,
    pub pii_found: usize,
    pub pii_by_category: BTreeMap<String, usize>,
    pub total_replacements: usize,
    /// `"mfa"` or `"segment"`; `None` when alignment was skipped
    pub alignment_method: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetStats {
    pub total_conversations: usize,
    pub total_segments: usize,
    pub total_duration_secs: f64,
    pub total_pii_instances: usize,
    pub pii_by_category: BTreeMap<String, usize>,
    pub avg_pii_per_conversation: f64,
    /// Conversations per alignment method
    pub alignment_methods: BTreeMap<String, usize>,
}

impl DatasetStats {
    pub fn from_conversations(conversations: &[ConversationStats]) -> Self {
        let mut stats = Self {
            total_conversations: conversations.len(),
            ..Self::default()
        };

        for conv in conversations {
            stats.total_segments += conv.total_segments;
            stats.total_duration_secs += conv.duration_secs;
            stats.total_pii_instances += conv.pii_found;
            for (category, count) in &conv.pii_by_category {
                *stats.pii_by_category.entry(category.clone()).or_insert(0) += count;
            }
            let method = conv.alignment_method.as_deref().unwrap_or("none");
            *stats.alignment_methods.entry(method.to_string()).or_insert(0) += 1;
        }

        if !conversations.is_empty() {
            stats.avg_pii_per_conversation =
                stats.total_pii_instances as f64 / conversations.len() as f64;
        }

        stats
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QaStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub total_conversations: usize,
    pub failed_conversations: usize,
    pub failed_conversation_ids: Vec<String>,
    pub pass_rate: f64,
    pub pii_remaining: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaReport {
    pub generated_at: DateTime<Utc>,
    pub dataset_summary: DatasetStats,
    pub verification: VerificationSummary,
    pub status: QaStatus,
}

impl QaReport {
    pub fn new(dataset_summary: DatasetStats, verification: &DatasetVerification) -> Self {
        Self {
            generated_at: Utc::now(),
            dataset_summary,
            verification: VerificationSummary {
                total_conversations: verification.total_conversations,
                failed_conversations: verification.failed_conversations.len(),
                failed_conversation_ids: verification
                    .failed_conversations
                    .iter()
                    .map(|c| c.conversation_id.clone())
                    .collect(),
                pass_rate: verification.pass_rate,
                pii_remaining: verification.total_pii_found,
            },
            status: if verification.passed {
                QaStatus::Pass
            } else {
                QaStatus::Fail
            },
        }
    }

    /// Markdown rendering of the report
    pub fn to_markdown(&self) -> String {
        self.to_string()
    }

    fn status_label(&self) -> &'static str {
        match self.status {
            QaStatus::Pass => "PASS",
            QaStatus::Fail => "FAIL",
        }
    }

    /// Write `<dir>/qa_report.json` and `<dir>/qa_report.md`
    pub fn write_to(&self, dir: &Path) -> std::io::Result<(PathBuf, PathBuf)> {
        std::fs::create_dir_all(dir)?;

        let json_path = dir.join("qa_report.json");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&json_path, json)?;

        let md_path = json_path.with_extension("md");
        std::fs::write(&md_path, self.to_markdown())?;

        info!("QA report saved: {:?}", json_path);

        Ok((json_path, md_path))
    }
}

impl fmt::Display for QaReport {
    fn fmt(&self, md: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = &self.dataset_summary;
        let verification = &self.verification;

        writeln!(md, "# PII De-Identification QA Report\n")?;
        writeln!(md, "**Generated:** {}", self.generated_at.to_rfc3339())?;
        writeln!(md, "**Status:** {}\n", self.status_label())?;
        writeln!(md, "---\n")?;

        writeln!(md, "## Dataset Summary\n")?;
        writeln!(md, "- **Total Conversations:** {}", summary.total_conversations)?;
        writeln!(md, "- **Total Segments:** {}", summary.total_segments)?;
        writeln!(md, "- **Total Duration:** {:.2}s", summary.total_duration_secs)?;
        writeln!(md, "- **Total PII Instances Found:** {}", summary.total_pii_instances)?;
        writeln!(
            md,
            "- **Average PII per Conversation:** {:.1}\n",
            summary.avg_pii_per_conversation
        )?;

        writeln!(md, "### PII by Category\n")?;
        for (category, count) in &summary.pii_by_category {
            writeln!(md, "- **{}:** {}", title_case(category), count)?;
        }

        writeln!(md, "\n### Alignment Methods\n")?;
        for (method, count) in &summary.alignment_methods {
            writeln!(md, "- **{}:** {}", method, count)?;
        }

        writeln!(md, "\n---\n")?;
        writeln!(md, "## Verification Results\n")?;
        writeln!(md, "- **Pass Rate:** {:.2}%", verification.pass_rate * 100.0)?;
        writeln!(md, "- **PII Remaining:** {}", verification.pii_remaining)?;
        writeln!(
            md,
            "- **Failed Conversations:** {}\n",
            verification.failed_conversations
        )?;
        writeln!(md, "---\n")?;

        match self.status {
            QaStatus::Pass => {
                writeln!(md, "## All Checks Passed\n")?;
                writeln!(md, "No PII detected in de-identified transcripts.")?;
            }
            QaStatus::Fail => {
                writeln!(md, "## Verification Failed\n")?;
                writeln!(
                    md,
                    "Found {} PII instances remaining in:\n",
                    verification.pii_remaining
                )?;
                for id in &verification.failed_conversation_ids {
                    writeln!(md, "- `{}`", id)?;
                }
            }
        }

        Ok(())
    }
}

fn title_case(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qa::verifier::ConversationVerification;

    fn conv(id: &str, pii: &[(&str, usize)], method: Option<&str>) -> ConversationStats {
        let pii_by_category: BTreeMap<String, usize> =
            pii.iter().map(|(c, n)| (c.to_string(), *n)).collect();
        ConversationStats {
            conversation_id: id.to_string(),
            total_segments: 4,
            duration_secs: 30.0,
            speakers: vec!["Speaker_1".to_string(), "Speaker_2".to_string()],
            pii_found: pii_by_category.values().sum(),
            total_replacements: pii_by_category.values().sum(),
            pii_by_category,
            alignment_method: method.map(str::to_string),
        }
    }

    fn verification(id: &str, pii_found: usize) -> ConversationVerification {
        ConversationVerification {
            conversation_id: id.to_string(),
            passed: pii_found == 0,
            total_segments: 4,
            pii_found,
            failed_segments: Vec::new(),
        }
    }

    #[test]
    fn test_dataset_stats() {
        let stats = DatasetStats::from_conversations(&[
            conv("a", &[("cities", 2), ("days", 1)], Some("mfa")),
            conv("b", &[("cities", 1)], Some("segment")),
            conv("c", &[], None),
        ]);

        assert_eq!(stats.total_conversations, 3);
        assert_eq!(stats.total_segments, 12);
        assert_eq!(stats.total_duration_secs, 90.0);
        assert_eq!(stats.total_pii_instances, 4);
        assert_eq!(stats.pii_by_category.get("cities"), Some(&3));
        assert!((stats.avg_pii_per_conversation - 4.0 / 3.0).abs() < 1e-12);
        assert_eq!(stats.alignment_methods.get("mfa"), Some(&1));
        assert_eq!(stats.alignment_methods.get("none"), Some(&1));
    }

    #[test]
    fn test_empty_dataset_stats() {
        let stats = DatasetStats::from_conversations(&[]);
        assert_eq!(stats.avg_pii_per_conversation, 0.0);
    }

    #[test]
    fn test_report_status_and_json() {
        let stats = DatasetStats::from_conversations(&[conv("a", &[("cities", 1)], Some("mfa"))]);
        let passing = DatasetVerification::aggregate(&[verification("a", 0)]);
        let report = QaReport::new(stats.clone(), &passing);
        assert_eq!(report.status, QaStatus::Pass);

        let json: serde_json::Value = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "PASS");
        assert_eq!(json["verification"]["pass_rate"], 1.0);

        let failing =
            DatasetVerification::aggregate(&[verification("a", 0), verification("b", 3)]);
        let report = QaReport::new(stats, &failing);
        assert_eq!(report.status, QaStatus::Fail);
        assert_eq!(report.verification.failed_conversation_ids, vec!["b"]);
        assert_eq!(report.verification.pii_remaining, 3);
    }

    #[test]
    fn test_markdown_and_files() {
        let stats = DatasetStats::from_conversations(&[conv("a", &[("cities", 2)], Some("mfa"))]);
        let failing = DatasetVerification::aggregate(&[verification("conv_7", 1)]);
        let report = QaReport::new(stats, &failing);

        let md = report.to_markdown();
        assert!(md.contains("**Status:** FAIL"));
        assert!(md.contains("- **Cities:** 2"));
        assert!(md.contains("- **Pass Rate:** 0.00%"));
        assert!(md.contains("- `conv_7`"));

        let dir = tempfile::tempdir().unwrap();
        let (json_path, md_path) = report.write_to(&dir.path().join("qa")).unwrap();
        assert!(md_path.ends_with("qa/qa_report.md"));

        let loaded: QaReport =
            serde_json::from_str(&std::fs::read_to_string(json_path).unwrap()).unwrap();
        assert_eq!(loaded, report);
    }
}
