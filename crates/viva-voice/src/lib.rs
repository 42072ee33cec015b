//! Speech and language provider capabilities for the Viva platform.
//!
//! The interview orchestrator never talks to a concrete speech or language
//! engine; it is handed capability objects behind the traits in
//! [`capability`]. This crate defines those traits and ships the production
//! implementations: whisper.cpp subprocess transcription, piper (or system
//! espeak-ng) subprocess synthesis, and a streaming OpenAI-compatible
//! chat-completions client.
//!
//! Every provider call is bounded by an explicit timeout and surfaces
//! failures as [`VoiceError`] — the orchestrator treats any of them as a
//! recoverable condition, never a crash.

pub mod capability;
pub mod error;
pub mod llm;
pub mod piper;
pub mod vad;
pub mod whisper;

pub use capability::{
    LanguageModel, SpeechSynthesizer, SpeechToText, SttSession, TokenStream,
    VoiceActivityDetector,
};
pub use error::VoiceError;
pub use llm::{ChatLlm, LlmConfig};
pub use piper::{PiperTts, SystemTts, TtsConfig};
pub use vad::ChunkEnergyVad;
pub use whisper::{WhisperConfig, WhisperStt};
