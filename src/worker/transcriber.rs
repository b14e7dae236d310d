//! Whisper transcription backend.
//!
//! Shells out to a local whisper binary and parses its JSON output.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::domain::TranscriptSegment;

/// Result of transcription
#[derive(Debug, Clone)]
pub struct TranscriptResult {
    pub text: String,
    pub language: String,
    pub segments: Vec<TranscriptSegment>,
    pub duration_seconds: f64,
}

/// Speech-to-text backend used by the transcription worker
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Name written to `transcription.provider`
    fn provider(&self) -> &str;

    async fn transcribe(&self, audio_path: &Path) -> Result<TranscriptResult>;
}

/// Whisper output JSON structure
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    text: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    #[serde(default)]
    start: f64,
    #[serde(default)]
    end: f64,
    #[serde(default)]
    text: String,
}

pub struct WhisperTranscriber {
    binary_path: String,
    model: String,
    language: String,
}

impl WhisperTranscriber {
    pub fn new(
        binary_path: impl Into<String>,
        model: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            binary_path: binary_path.into(),
            model: model.into(),
            language: language.into(),
        }
    }

    /// Binary from `WHISPER_PATH`, falling back to the Homebrew location
    pub fn from_env(model: impl Into<String>, language: impl Into<String>) -> Self {
        let binary_path = std::env::var("WHISPER_PATH")
            .unwrap_or_else(|_| "/opt/homebrew/bin/whisper".to_string());
        Self::new(binary_path, model, language)
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    fn provider(&self) -> &str {
        "whisper"
    }

    async fn transcribe(&self, audio_path: &Path) -> Result<TranscriptResult> {
        // Create temp dir for output
        let temp_dir = tempfile::tempdir().context("Failed to create temp dir")?;

        let output = Command::new(&self.binary_path)
            .arg(audio_path)
            .arg("--model")
            .arg(&self.model)
            .arg("--output_dir")
            .arg(temp_dir.path())
            .arg("--output_format")
            .arg("json")
            .arg("--language")
            .arg(&self.language)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to run whisper")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Whisper failed: {}", stderr.trim());
        }

        let stem = audio_path.file_stem().unwrap_or_default().to_string_lossy();
        let json_path = temp_dir.path().join(format!("{}.json", stem));

        let json_content = tokio::fs::read_to_string(&json_path)
            .await
            .context("Failed to read whisper output")?;

        parse_whisper_output(&json_content, &self.language)
    }
}

fn parse_whisper_output(json: &str, default_language: &str) -> Result<TranscriptResult> {
    let whisper: WhisperOutput =
        serde_json::from_str(json).context("Failed to parse whisper JSON")?;

    let duration = whisper.segments.last().map(|s| s.end).unwrap_or(0.0);

    Ok(TranscriptResult {
        text: whisper.text.trim().to_string(),
        language: if whisper.language.is_empty() {
            default_language.to_string()
        } else {
            whisper.language
        },
        segments: whisper
            .segments
            .into_iter()
            .map(|s| TranscriptSegment {
                start: s.start,
                end: s.end,
                text: s.text.trim().to_string(),
            })
            .collect(),
        duration_seconds: duration,
    })
}
