//! Orchestrator tunables.

use std::time::Duration;

/// Per-connection engine configuration, assembled by the server from its
/// TOML/env configuration. Immutable for the lifetime of a connection.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Audio chunks above this size are dropped silently.
    pub max_chunk_bytes: usize,

    /// Turn transcripts above this many characters are truncated (with an
    /// ellipsis marker) before reaching the language model.
    pub max_transcript_chars: usize,

    /// Ceiling on one uninterrupted stretch of speech.
    pub max_continuous_speech: Duration,

    /// Gaps shorter than this still count as the same stretch of speech.
    pub voice_gap: Duration,

    /// With no voice activity for this long while listening, a gentle
    /// "still listening" notice is emitted.
    pub silence_timeout: Duration,

    /// Debounce wait when the buffered transcript ends in `.?!`.
    pub debounce_punctuated: Duration,

    /// Debounce wait when the trailing fragment is unpunctuated — the
    /// speaker may still be thinking.
    pub debounce_unpunctuated: Duration,

    /// Cap on retained conversation history entries.
    pub max_history_entries: usize,

    /// System-prompt persona handed to the language model on every turn.
    pub persona: String,

    /// Scripted greeting spoken when the interview begins.
    pub greeting: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_chunk_bytes: 100_000,
            max_transcript_chars: 1_000,
            max_continuous_speech: Duration::from_secs(60),
            voice_gap: Duration::from_secs(3),
            silence_timeout: Duration::from_secs(10),
            debounce_punctuated: Duration::from_millis(1_000),
            debounce_unpunctuated: Duration::from_millis(2_500),
            max_history_entries: 40,
            persona: crate::persona::default_persona("a software engineering position"),
            greeting: crate::persona::DEFAULT_GREETING.to_string(),
        }
    }
}
