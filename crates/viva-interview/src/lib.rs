//! Interview turn-taking orchestration for the Viva platform.
//!
//! One [`engine::InterviewEngine`] instance runs per live connection. It owns
//! the `IDLE → LISTENING → THINKING → SPEAKING` state machine, coordinates
//! the STT → LLM → TTS pipeline into a single conversational loop, and
//! enforces the safety limits and the two-strike anti-cheat policy along the
//! way. The engine is transport-agnostic: it consumes
//! [`engine::EngineCommand`]s and emits `viva_types::events::ServerEvent`s
//! over channels; the WebSocket gateway is just an adapter on either side.
//!
//! Provider access goes exclusively through the `viva-voice` capability
//! traits, so every component here is testable with fakes.

pub mod config;
pub mod debounce;
pub mod engine;
pub mod guard;
pub mod persona;
pub mod sentence;
pub mod violations;

pub use config::EngineConfig;
pub use engine::{spawn_engine, EngineCommand, EngineHandle, Providers};
