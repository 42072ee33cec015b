//! Text-to-speech via a piper subprocess, with an espeak-ng fallback.

use crate::capability::SpeechSynthesizer;
use crate::error::VoiceError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Configuration shared by the synthesizer implementations.
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Path to the piper binary.
    pub binary_path: PathBuf,
    /// Path to the voice model (.onnx).
    pub voice_path: PathBuf,
    /// Speaking speed multiplier; piper's length scale is its inverse.
    pub speed: f32,
    /// Maximum characters per synthesis request.
    pub max_chars: usize,
    /// Timeout for one synthesis run.
    pub timeout: Duration,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("piper"),
            voice_path: PathBuf::from("voices/en_US-lessac-medium.onnx"),
            speed: 1.0,
            max_chars: 2_000,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Piper-backed [`SpeechSynthesizer`]. Returns raw PCM (s16le).
#[derive(Debug, Clone)]
pub struct PiperTts {
    config: TtsConfig,
}

impl PiperTts {
    pub fn new(config: TtsConfig) -> Result<Self, VoiceError> {
        if config.speed < 0.1 || config.speed > 10.0 {
            return Err(VoiceError::Config(
                "speed must be between 0.1 and 10.0".to_string(),
            ));
        }
        Ok(Self { config })
    }
}

#[async_trait]
impl SpeechSynthesizer for PiperTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        check_length(text, self.config.max_chars)?;

        let mut command = Command::new(&self.config.binary_path);
        command
            .arg("--model")
            .arg(&self.config.voice_path)
            .arg("--output_raw")
            // Length scale is the inverse of speed: speed 2.0 (faster)
            // means length_scale 0.5 (shorter).
            .arg("--length_scale")
            .arg((1.0 / self.config.speed).to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| VoiceError::Tts(format!("failed to spawn piper: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Tts("failed to open stdin".to_string()))?;
        let text_owned = text.to_string();

        // Write on a separate task to avoid deadlock if the output buffer
        // fills before stdin is drained.
        let write_task = tokio::spawn(async move { stdin.write_all(text_owned.as_bytes()).await });

        let output = tokio::time::timeout(self.config.timeout, child.wait_with_output())
            .await
            .map_err(|_| VoiceError::Timeout {
                what: "TTS synthesis",
                secs: self.config.timeout.as_secs(),
            })?
            .map_err(|e| VoiceError::Tts(format!("failed to wait for piper: {}", e)))?;

        match write_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(VoiceError::Tts(format!(
                    "failed to write to piper stdin: {}",
                    e
                )))
            }
            Err(e) => return Err(VoiceError::Tts(format!("stdin task failed: {}", e))),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Tts(format!("piper failed: {}", stderr)));
        }

        Ok(output.stdout)
    }
}

/// System-TTS fallback via `espeak-ng`, for deployments without a piper
/// voice. Strips the 44-byte WAV header to return raw PCM.
#[derive(Debug, Clone)]
pub struct SystemTts {
    max_chars: usize,
    timeout: Duration,
}

impl SystemTts {
    pub fn new(max_chars: usize, timeout: Duration) -> Self {
        Self { max_chars, timeout }
    }
}

#[async_trait]
impl SpeechSynthesizer for SystemTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        check_length(text, self.max_chars)?;

        let mut command = Command::new("espeak-ng");
        command
            .arg("--stdout")
            .arg(text)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = command
            .spawn()
            .map_err(|e| VoiceError::Tts(format!("failed to spawn espeak-ng: {}", e)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| VoiceError::Timeout {
                what: "system TTS synthesis",
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| VoiceError::Tts(format!("failed to wait for espeak-ng: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Tts(format!("espeak-ng failed: {}", stderr)));
        }

        let wav_data = output.stdout;
        if wav_data.len() > 44 {
            Ok(wav_data[44..].to_vec())
        } else {
            Ok(wav_data)
        }
    }
}

fn check_length(text: &str, max_chars: usize) -> Result<(), VoiceError> {
    let chars = text.chars().count();
    if chars > max_chars {
        return Err(VoiceError::Tts(format!(
            "text exceeds maximum length: {} chars (limit: {})",
            chars, max_chars
        )));
    }
    Ok(())
}
