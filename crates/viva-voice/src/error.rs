use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("STT error: {0}")]
    Stt(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("{what} timed out after {secs} seconds")]
    Timeout { what: &'static str, secs: u64 },

    #[error("invalid configuration: {0}")]
    Config(String),
}
