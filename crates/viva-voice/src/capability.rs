//! Provider capability traits consumed by the interview orchestrator.
//!
//! These are deliberately small: the orchestrator needs exactly
//! "open a transcription session / push audio / flush",
//! "stream a completion", "synthesize one utterance", and a binary
//! voice-activity verdict. Anything provider-specific stays behind the
//! trait so the orchestrator is trivially testable with fakes.

use crate::error::VoiceError;
use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;
use viva_types::{ChatMessage, TranscriptFragment};

/// A stream of generated completion tokens.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, VoiceError>> + Send>>;

/// Streaming speech-to-text capability. One session per live connection.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Opens a fresh transcription session. The caller owns its lifecycle
    /// and must close it on disconnect, unconditionally.
    async fn open_session(&self) -> Result<Box<dyn SttSession>, VoiceError>;
}

/// An open per-connection transcription stream.
#[async_trait]
pub trait SttSession: Send + Sync {
    /// Feeds one audio chunk. Engines with native streaming return interim
    /// and final fragments as they become available; batch engines buffer
    /// and return nothing until [`SttSession::flush`].
    async fn push_audio(&mut self, chunk: &[u8]) -> Result<Vec<TranscriptFragment>, VoiceError>;

    /// Forces transcription of any buffered audio, returning the resulting
    /// final fragment, if the buffer held enough signal to transcribe.
    async fn flush(&mut self) -> Result<Option<TranscriptFragment>, VoiceError>;

    /// Releases provider-side resources. Idempotent.
    async fn close(&mut self);
}

/// Text-completion capability with token streaming.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Streams completion tokens for the persona + history + new user text.
    /// Token order is generation order; the stream ends when the model is
    /// done or errors.
    async fn stream(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        user_text: &str,
    ) -> Result<TokenStream, VoiceError>;
}

/// Text-to-speech capability.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesizes one utterance, returning raw audio bytes.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError>;
}

/// Binary voice-activity verdict for one audio chunk.
///
/// A capability rather than a hardcoded heuristic so a real VAD model can be
/// swapped in without touching the orchestration loop.
pub trait VoiceActivityDetector: Send + Sync {
    fn is_voice(&self, chunk: &[u8]) -> bool;
}
