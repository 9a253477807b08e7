//! Montreal Forced Aligner integration.
//!
//! Each call runs `mfa align` in its own temporary working directory:
//!
//! ```text
//! <tmp>/input/<id>.wav      16-bit PCM copy of the conversation audio
//! <tmp>/input/<id>.txt      joined transcript
//! <tmp>/output/<id>.TextGrid
//! ```
//!
//! The directory is removed when the call returns, whether it succeeded,
//! failed or timed out.

use super::aligner::WordTiming;
use crate::audio::{AudioBuffer, AudioError};
use crate::config::AlignerSettings;
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// TextGrid labels that mark silence rather than a word
const SILENCE_LABELS: [&str; 4] = ["sp", "sil", "<s>", "</s>"];

/// Longest stderr excerpt kept in an error
const MAX_STDERR_CHARS: usize = 2000;

#[derive(Error, Debug)]
pub enum AlignError {
    #[error("Aligner not found: {0}")]
    Unavailable(String),
    #[error("Aligner timed out after {0:?}")]
    Timeout(Duration),
    #[error("Aligner exited with {status}: {stderr}")]
    ProcessFailed { status: String, stderr: String },
    #[error("Aligner produced no output at {0:?}")]
    MissingOutput(PathBuf),
    #[error("Invalid TextGrid: {0}")]
    TextGrid(String),
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Aligner task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A forced aligner producing word timings for audio and its transcript.
///
/// Returned timings carry no character spans; those are recovered by the
/// caller against the transcript it passed in.
#[async_trait]
pub trait ExternalAligner: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the aligner can run at all on this machine
    fn is_available(&self) -> bool {
        true
    }

    async fn align(
        &self,
        conversation_id: &str,
        audio: &AudioBuffer,
        transcript: &str,
    ) -> Result<Vec<WordTiming>, AlignError>;
}

#[derive(Debug, Clone)]
pub struct MfaConfig {
    /// Executable name looked up on `PATH`, or a path to it
    pub binary: String,
    pub acoustic_model: String,
    pub dictionary: String,
    pub timeout: Duration,
    pub temp_dir: Option<PathBuf>,
}

impl Default for MfaConfig {
    fn default() -> Self {
        Self::from(&AlignerSettings::default())
    }
}

impl From<&AlignerSettings> for MfaConfig {
    fn from(settings: &AlignerSettings) -> Self {
        Self {
            binary: settings.binary.clone(),
            acoustic_model: settings.acoustic_model.clone(),
            dictionary: settings.dictionary.clone(),
            timeout: settings.timeout(),
            temp_dir: settings.temp_dir.clone(),
        }
    }
}

pub struct MfaAligner {
    config: MfaConfig,
    /// Executable resolved at construction
    binary: Option<PathBuf>,
}

/// Exclusively owned working directory of one alignment call
struct WorkDir {
    dir: tempfile::TempDir,
    input: PathBuf,
    output: PathBuf,
}

impl MfaAligner {
    pub fn new(config: MfaConfig) -> Self {
        let binary = locate_binary(&config.binary);
        info!(
            "MFA aligner configured with binary={:?}, model={}, dict={}, timeout={:?}",
            binary, config.acoustic_model, config.dictionary, config.timeout
        );
        Self { config, binary }
    }

    /// Path of the aligner executable, if it was found
    pub fn binary(&self) -> Option<&Path> {
        self.binary.as_deref()
    }
}

/// Resolve the aligner executable, searching `PATH` for bare names
pub fn locate_binary(binary: &str) -> Option<PathBuf> {
    let binary = Path::new(binary);
    if binary.components().count() > 1 {
        return binary.is_file().then(|| binary.to_path_buf());
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

/// Create the working directory and write the aligner's inputs into it
fn prepare_inputs(
    temp_dir: Option<&Path>,
    stem: &str,
    audio: &AudioBuffer,
    transcript: &str,
) -> Result<WorkDir, AlignError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("mfa_");
    let dir = match temp_dir {
        Some(parent) => {
            std::fs::create_dir_all(parent)?;
            builder.tempdir_in(parent)?
        }
        None => builder.tempdir()?,
    };

    let input = dir.path().join("input");
    let output = dir.path().join("output");
    std::fs::create_dir_all(&input)?;
    std::fs::create_dir_all(&output)?;

    audio.save_pcm16(&input.join(format!("{}.wav", stem)))?;
    std::fs::write(input.join(format!("{}.txt", stem)), transcript)?;

    Ok(WorkDir { dir, input, output })
}

/// Read and parse the aligner's TextGrid, then remove the working directory
fn collect_output(work: WorkDir, stem: &str) -> Result<Vec<WordTiming>, AlignError> {
    let textgrid_path = work.output.join(format!("{}.TextGrid", stem));
    if !textgrid_path.is_file() {
        return Err(AlignError::MissingOutput(textgrid_path));
    }

    let content = std::fs::read_to_string(&textgrid_path)?;
    let words = parse_textgrid(&content)?;
    work.dir.close()?;

    Ok(words)
}

#[async_trait]
impl ExternalAligner for MfaAligner {
    fn name(&self) -> &str {
        "mfa"
    }

    fn is_available(&self) -> bool {
        self.binary.is_some()
    }

    async fn align(
        &self,
        conversation_id: &str,
        audio: &AudioBuffer,
        transcript: &str,
    ) -> Result<Vec<WordTiming>, AlignError> {
        let binary = self
            .binary
            .clone()
            .ok_or_else(|| AlignError::Unavailable(self.config.binary.clone()))?;

        let stem = file_stem(conversation_id);
        let work = {
            let temp_dir = self.config.temp_dir.clone();
            let stem = stem.clone();
            let audio = audio.clone();
            let transcript = transcript.to_string();
            tokio::task::spawn_blocking(move || {
                prepare_inputs(temp_dir.as_deref(), &stem, &audio, &transcript)
            })
            .await??
        };

        info!("Running MFA alignment for {}...", conversation_id);

        let mut command = tokio::process::Command::new(&binary);
        command
            .arg("align")
            .arg(&work.input)
            .arg(&self.config.dictionary)
            .arg(&self.config.acoustic_model)
            .arg(&work.output)
            .arg("--clean")
            .arg("--single_speaker")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("MFA command: {:?}", command);

        let output = match tokio::time::timeout(self.config.timeout, command.output()).await {
            Ok(output) => output?,
            Err(_) => return Err(AlignError::Timeout(self.config.timeout)),
        };

        if !output.status.success() {
            let stderr: String = String::from_utf8_lossy(&output.stderr)
                .trim()
                .chars()
                .take(MAX_STDERR_CHARS)
                .collect();
            return Err(AlignError::ProcessFailed {
                status: output.status.to_string(),
                stderr,
            });
        }

        let words = tokio::task::spawn_blocking(move || collect_output(work, &stem)).await??;

        info!("MFA aligned {} words for {}", words.len(), conversation_id);

        Ok(words)
    }
}

/// Conversation id made safe for use as a file name
fn file_stem(conversation_id: &str) -> String {
    let stem: String = conversation_id
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() { "conversation".to_string() } else { stem }
}

/// Extract word intervals from a Praat TextGrid.
///
/// Uses the tier named `words`, or the last tier when none is. Empty
/// intervals and silence markers are skipped.
pub fn parse_textgrid(content: &str) -> Result<Vec<WordTiming>, AlignError> {
    let interval = Regex::new(
        r#"intervals\s*\[\d+\]:\s*xmin\s*=\s*([-\d.eE+]+)\s*xmax\s*=\s*([-\d.eE+]+)\s*text\s*=\s*"([^"]*)""#,
    )
    .map_err(|e| AlignError::TextGrid(e.to_string()))?;

    let tiers: Vec<&str> = content.split("item [").collect();
    let words_tier = tiers
        .iter()
        .find(|tier| tier.to_lowercase().contains(r#"name = "words""#))
        .or(tiers.last())
        .copied()
        .unwrap_or_default();

    let mut words = Vec::new();

    for caps in interval.captures_iter(words_tier) {
        let xmin = parse_time(&caps[1])?;
        let xmax = parse_time(&caps[2])?;
        let text = caps[3].trim();

        if text.is_empty() || SILENCE_LABELS.contains(&text) {
            continue;
        }
        if xmax <= xmin {
            debug!("Skipping zero-length interval '{}' at {}", text, xmin);
            continue;
        }

        words.push(WordTiming::new(text, xmin, xmax));
    }

    Ok(words)
}

fn parse_time(raw: &str) -> Result<f64, AlignError> {
    raw.parse()
        .map_err(|_| AlignError::TextGrid(format!("invalid time '{}'", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXTGRID: &str = r#"File type = "ooTextFile"
Object class = "TextGrid"

xmin = 0
xmax = 3.2
tiers? <exists>
size = 2
item []:
    item [1]:
        class = "IntervalTier"
        name = "words"
        xmin = 0
        xmax = 3.2
        intervals: size = 5
        intervals [1]:
            xmin = 0
            xmax = 0.35
            text = ""
        intervals [2]:
            xmin = 0.35
            xmax = 0.71
            text = "hello"
        intervals [3]:
            xmin = 0.71
            xmax = 0.9
            text = "sp"
        intervals [4]:
            xmin = 0.9
            xmax = 1.32
            text = "from"
        intervals [5]:
            xmin = 1.32
            xmax = 1.95
            text = "dallas"
    item [2]:
        class = "IntervalTier"
        name = "phones"
        xmin = 0
        xmax = 3.2
        intervals: size = 1
        intervals [1]:
            xmin = 0.35
            xmax = 0.41
            text = "HH"
"#;

    fn config(binary: &str) -> MfaConfig {
        MfaConfig {
            binary: binary.to_string(),
            timeout: Duration::from_secs(10),
            ..MfaConfig::default()
        }
    }

    #[test]
    fn test_parse_words_tier() {
        let words = parse_textgrid(TEXTGRID).unwrap();
        let found: Vec<(&str, f64, f64)> = words
            .iter()
            .map(|w| (w.word.as_str(), w.start_time, w.end_time))
            .collect();
        assert_eq!(
            found,
            vec![("hello", 0.35, 0.71), ("from", 0.9, 1.32), ("dallas", 1.32, 1.95)]
        );
        assert!(words.iter().all(|w| w.span().is_none()));
    }

    #[test]
    fn test_parse_falls_back_to_last_tier() {
        let content = TEXTGRID.replace(r#"name = "words""#, r#"name = "speaker""#);
        let words = parse_textgrid(&content).unwrap();
        assert_eq!(words.len(), 1);
        assert_eq!(words[0].word, "HH");
    }

    #[test]
    fn test_parse_empty_textgrid() {
        assert!(parse_textgrid("").unwrap().is_empty());
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("conv-01_a"), "conv-01_a");
        assert_eq!(file_stem("../etc/passwd"), "___etc_passwd");
        assert_eq!(file_stem(""), "conversation");
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let aligner = MfaAligner::new(config("definitely-not-an-aligner-binary"));
        assert!(!aligner.is_available());
        assert!(aligner.binary().is_none());

        let audio = AudioBuffer::mono(vec![0.0; 160], 16000);
        let err = aligner.align("conv", &audio, "hello").await.unwrap_err();
        assert!(matches!(err, AlignError::Unavailable(_)));
    }

    #[cfg(unix)]
    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_aligner_and_parses_output() {
        let bin_dir = tempfile::tempdir().unwrap();
        let textgrid = bin_dir.path().join("fixture.TextGrid");
        std::fs::write(&textgrid, TEXTGRID).unwrap();
        let script = write_script(
            bin_dir.path(),
            "fake-mfa",
            &format!(
                "test \"$1\" = align || exit 3\ntest -f \"$2/conv1.wav\" || exit 4\ncp {:?} \"$5/conv1.TextGrid\"",
                textgrid
            ),
        );

        let aligner = MfaAligner::new(config(script.to_str().unwrap()));
        assert_eq!(aligner.binary(), Some(script.as_path()));
        let audio = AudioBuffer::mono(vec![0.1; 1600], 16000);
        let words = aligner.align("conv1", &audio, "Hello from Dallas").await.unwrap();

        assert_eq!(words.len(), 3);
        assert_eq!(words[2].word, "dallas");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_failure_and_missing_output() {
        let bin_dir = tempfile::tempdir().unwrap();
        let audio = AudioBuffer::mono(vec![0.0; 160], 16000);

        let failing = write_script(bin_dir.path(), "failing-mfa", "echo 'model not found' >&2\nexit 1");
        let err = MfaAligner::new(config(failing.to_str().unwrap()))
            .align("conv", &audio, "hello")
            .await
            .unwrap_err();
        match err {
            AlignError::ProcessFailed { stderr, .. } => assert_eq!(stderr, "model not found"),
            other => panic!("unexpected error: {}", other),
        }

        let silent = write_script(bin_dir.path(), "silent-mfa", "exit 0");
        let err = MfaAligner::new(config(silent.to_str().unwrap()))
            .align("conv", &audio, "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, AlignError::MissingOutput(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_and_cleanup() {
        let bin_dir = tempfile::tempdir().unwrap();
        let work_parent = tempfile::tempdir().unwrap();
        let script = write_script(bin_dir.path(), "slow-mfa", "sleep 30");

        let aligner = MfaAligner::new(MfaConfig {
            timeout: Duration::from_millis(200),
            temp_dir: Some(work_parent.path().to_path_buf()),
            ..config(script.to_str().unwrap())
        });
        let audio = AudioBuffer::mono(vec![0.0; 160], 16000);
        let err = aligner.align("conv", &audio, "hello").await.unwrap_err();

        assert!(matches!(err, AlignError::Timeout(_)));
        assert_eq!(std::fs::read_dir(work_parent.path()).unwrap().count(), 0);
    }
}
