//! Application configuration.
//!
//! Loaded from a TOML file with `[pii_categories]`, `[aligner]`, `[audio]`
//! and `[pipeline]` sections. `MFA_BINARY`, `MFA_ACOUSTIC_MODEL` and
//! `MFA_DICTIONARY` override the aligner section.

use crate::align::GapPolicy;
use crate::deid::{CategoryEntry, PiiConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0:?}")]
    NotFound(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid category '{category}': {reason}")]
    InvalidCategory { category: String, reason: String },
    #[error("Failed to compile pattern for category '{category}': {source}")]
    Pattern {
        category: String,
        #[source]
        source: regex::Error,
    },
    #[error("No PII categories configured")]
    NoCategories,
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// Forced aligner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignerSettings {
    /// Attempt word-level alignment at all
    pub enabled: bool,
    /// Aligner executable name or path
    pub binary: String,
    pub acoustic_model: String,
    pub dictionary: String,
    /// Upper bound for one aligner invocation
    pub timeout_secs: u64,
    /// Parent directory for per-invocation working directories
    pub temp_dir: Option<PathBuf>,
}

impl Default for AlignerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            binary: "mfa".to_string(),
            acoustic_model: "english_us_arpa".to_string(),
            dictionary: "english_us_arpa".to_string(),
            timeout_secs: 600,
            temp_dir: None,
        }
    }
}

impl AlignerSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Fade in/out length around muted ranges, in seconds
    pub fade_duration_secs: f64,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            fade_duration_secs: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Conversations processed concurrently
    pub workers: usize,
    /// What to do with PII that has no audio timing
    pub gap_policy: GapPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4),
            gap_policy: GapPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub pii: PiiConfig,
    pub aligner: AlignerSettings,
    pub audio: AudioSettings,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    pii_categories: BTreeMap<String, CategoryEntry>,
    #[serde(default)]
    aligner: AlignerSettings,
    #[serde(default)]
    audio: AudioSettings,
    #[serde(default)]
    pipeline: PipelineSettings,
}

impl AppConfig {
    /// Load configuration from a TOML file and apply environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading config from {:?}", path);

        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());

        info!(
            "Loaded {} PII categories (aligner: {}, workers: {})",
            config.pii.categories().len(),
            if config.aligner.enabled { config.aligner.binary.as_str() } else { "disabled" },
            config.pipeline.workers
        );

        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let document: ConfigDocument = toml::from_str(content)?;
        let pii = PiiConfig::from_entries(document.pii_categories)?;

        let config = Self {
            pii,
            aligner: document.aligner,
            audio: document.audio,
            pipeline: document.pipeline,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.pii.is_empty() {
            return Err(ConfigError::NoCategories);
        }
        if !(self.audio.fade_duration_secs >= 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "audio.fade_duration_secs",
                reason: format!("must be >= 0, got {}", self.audio.fade_duration_secs),
            });
        }
        if self.aligner.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "aligner.timeout_secs",
                reason: "must be > 0".to_string(),
            });
        }
        if self.pipeline.workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "pipeline.workers",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }

    /// Override aligner settings from environment-style lookups
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(binary) = lookup("MFA_BINARY") {
            info!("Using aligner binary from env: {}", binary);
            self.aligner.binary = binary;
        }
        if let Some(model) = lookup("MFA_ACOUSTIC_MODEL") {
            info!("Using acoustic model from env: {}", model);
            self.aligner.acoustic_model = model;
        }
        if let Some(dictionary) = lookup("MFA_DICTIONARY") {
            info!("Using dictionary from env: {}", dictionary);
            self.aligner.dictionary = dictionary;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
        [pii_categories.cities]
        items = ["Dallas", "Houston"]
        tag = "[CITY]"

        [aligner]
        acoustic_model = "english_mfa"
        timeout_secs = 30

        [audio]
        fade_duration_secs = 0.02

        [pipeline]
        workers = 2
        gap_policy = "fail"
    "#;

    #[test]
    fn test_from_toml() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.pii.categories().len(), 1);
        assert_eq!(config.aligner.acoustic_model, "english_mfa");
        assert_eq!(config.aligner.dictionary, "english_us_arpa");
        assert_eq!(config.aligner.timeout(), Duration::from_secs(30));
        assert!(config.aligner.enabled);
        assert_eq!(config.audio.fade_duration_secs, 0.02);
        assert_eq!(config.pipeline.workers, 2);
        assert_eq!(config.pipeline.gap_policy, GapPolicy::Fail);
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [pii_categories]
            days = ["Friday"]
            "#,
        )
        .unwrap();
        assert_eq!(config.aligner, AlignerSettings::default());
        assert_eq!(config.audio.fade_duration_secs, 0.01);
        assert_eq!(config.pipeline.gap_policy, GapPolicy::Warn);
        assert!(config.pipeline.workers >= 1);
    }

    #[test]
    fn test_missing_categories_is_fatal() {
        let err = AppConfig::from_toml_str("[audio]\nfade_duration_secs = 0.01\n").unwrap_err();
        assert!(matches!(err, ConfigError::NoCategories));
    }

    #[test]
    fn test_invalid_values() {
        let err = AppConfig::from_toml_str(
            r#"
            [pii_categories]
            days = ["Friday"]
            [pipeline]
            workers = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "pipeline.workers", .. }));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::from_toml_str(SAMPLE).unwrap();
        let env: HashMap<&str, &str> = [
            ("MFA_ACOUSTIC_MODEL", "custom_model"),
            ("MFA_DICTIONARY", "custom_dict"),
        ]
        .into_iter()
        .collect();

        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.aligner.acoustic_model, "custom_model");
        assert_eq!(config.aligner.dictionary, "custom_dict");
        assert_eq!(config.aligner.binary, "mfa");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deid.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.pipeline.workers, 2);
    }
}
