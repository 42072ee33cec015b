//! Batch speech-to-text via a whisper.cpp subprocess.
//!
//! Audio chunks are buffered per session; when the orchestrator detects the
//! end of an utterance it calls [`SttSession::flush`], which pipes the
//! buffered audio through the whisper binary on stdin and reads the
//! transcription from stdout.

use crate::capability::{SpeechToText, SttSession};
use crate::error::VoiceError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use viva_types::TranscriptFragment;

/// Maximum buffered audio per session (10 MiB). Prevents OOM from a client
/// that streams without ever pausing.
const MAX_STT_BUFFER_BYTES: usize = 10 * 1024 * 1024;

/// Audio shorter than this is discarded on flush rather than transcribed;
/// whisper produces noise tokens for near-empty input.
const MIN_FLUSH_BYTES: usize = 4_000;

/// Configuration for the whisper subprocess engine.
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// Path to the GGML model file.
    pub model_path: PathBuf,
    /// Path to the whisper.cpp main binary.
    pub binary_path: PathBuf,
    /// Spoken language hint, e.g. "en".
    pub language: String,
    /// Timeout for one transcription run.
    pub timeout: Duration,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/ggml-base.en.bin"),
            binary_path: PathBuf::from("whisper"),
            language: "en".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Whisper.cpp-backed [`SpeechToText`] factory.
#[derive(Debug, Clone)]
pub struct WhisperStt {
    config: WhisperConfig,
}

impl WhisperStt {
    pub fn new(config: WhisperConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SpeechToText for WhisperStt {
    async fn open_session(&self) -> Result<Box<dyn SttSession>, VoiceError> {
        Ok(Box::new(WhisperSession {
            config: self.config.clone(),
            buffer: Vec::new(),
        }))
    }
}

struct WhisperSession {
    config: WhisperConfig,
    buffer: Vec<u8>,
}

#[async_trait]
impl SttSession for WhisperSession {
    async fn push_audio(&mut self, chunk: &[u8]) -> Result<Vec<TranscriptFragment>, VoiceError> {
        // Whisper is batch-only: buffer now, transcribe on flush. If the
        // buffer would overflow, transcribe what we have first so nothing
        // is silently lost.
        if self.buffer.len() + chunk.len() > MAX_STT_BUFFER_BYTES {
            let fragment = self.flush().await?;
            self.buffer.extend_from_slice(chunk);
            return Ok(fragment.into_iter().collect());
        }
        self.buffer.extend_from_slice(chunk);
        Ok(Vec::new())
    }

    async fn flush(&mut self) -> Result<Option<TranscriptFragment>, VoiceError> {
        let audio = std::mem::take(&mut self.buffer);
        if audio.len() < MIN_FLUSH_BYTES {
            return Ok(None);
        }

        let text = transcribe(&self.config, &audio).await?;
        if text.is_empty() {
            return Ok(None);
        }
        Ok(Some(TranscriptFragment::final_(text)))
    }

    async fn close(&mut self) {
        self.buffer.clear();
    }
}

async fn transcribe(config: &WhisperConfig, audio_data: &[u8]) -> Result<String, VoiceError> {
    let mut command = Command::new(&config.binary_path);

    // Standard whisper.cpp arguments: -m <model>, -f - reads from stdin,
    // -nt suppresses timestamps so stdout is the bare transcription.
    command
        .arg("-m")
        .arg(&config.model_path)
        .arg("-l")
        .arg(&config.language)
        .arg("-nt")
        .arg("-f")
        .arg("-")
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    let mut child = command
        .spawn()
        .map_err(|e| VoiceError::Stt(format!("failed to spawn STT binary: {}", e)))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| VoiceError::Stt("failed to open stdin".to_string()))?;

    stdin
        .write_all(audio_data)
        .await
        .map_err(|e| VoiceError::Stt(format!("failed to write to stdin: {}", e)))?;
    drop(stdin); // Close stdin to signal EOF

    let output = tokio::time::timeout(config.timeout, child.wait_with_output())
        .await
        .map_err(|_| VoiceError::Timeout {
            what: "STT transcription",
            secs: config.timeout.as_secs(),
        })?
        .map_err(|e| VoiceError::Stt(format!("failed to read stdout: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(VoiceError::Stt(format!("STT binary failed: {}", stderr)));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
