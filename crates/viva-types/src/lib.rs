//! Shared types and constants for the Viva platform.
//!
//! This crate provides the foundational types used across all Viva crates:
//! participant roles, the interview turn-state machine enum, conversation
//! history types, transcript fragments, and the realtime event payloads
//! exchanged with clients.
//!
//! No crate in the workspace depends on anything *except* `viva-types` for
//! cross-cutting type definitions. This keeps the dependency graph clean and
//! prevents circular dependencies.

pub mod events;

use serde::{Deserialize, Serialize};

/// Role assigned to a user account.
///
/// Stored on the durable user row. Roles do not change orchestration
/// behavior; they exist so operators can grant larger per-row budgets to
/// mentors and admins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A regular interviewee.
    #[default]
    User,
    /// A platform administrator.
    Admin,
    /// A mentor reviewing practice interviews.
    Mentor,
}

impl Role {
    /// Returns the string label stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
            Self::Mentor => "mentor",
        }
    }

    /// Parses a database label into a `Role`.
    ///
    /// Returns `None` for unrecognized labels.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "admin" => Some(Self::Admin),
            "mentor" => Some(Self::Mentor),
            _ => None,
        }
    }
}

/// The per-connection interview state machine.
///
/// Transitions are owned exclusively by the turn orchestrator:
/// `Idle → Listening → Thinking → Speaking → Listening`, with `Idle` doubling
/// as the terminal state after forced termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnState {
    /// No STT stream active; initial and terminal state.
    Idle,
    /// Accepting and transcribing microphone audio.
    Listening,
    /// Generating the assistant reply; audio input is ignored.
    Thinking,
    /// Streaming synthesized reply sentences to the client.
    Speaking,
}

impl TurnState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
        }
    }
}

/// Who authored a conversation history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One entry of the capped per-connection conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            text: text.into(),
        }
    }
}

/// A transcript fragment emitted by the STT capability.
///
/// Interim fragments reset the turn debounce timer but are never appended to
/// the turn buffer; only final fragments carry text into the turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptFragment {
    pub text: String,
    pub is_final: bool,
}

impl TranscriptFragment {
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// Reason codes carried by a forced `session:end` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Repeated anti-cheat violations.
    IntegrityViolation,
    /// The client requested a graceful end.
    Ended,
    /// The hard absolute session-duration ceiling was breached.
    MaxDuration,
}

impl TerminationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IntegrityViolation => "integrity_violation",
            Self::Ended => "ended",
            Self::MaxDuration => "max_duration",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_labels() {
        for role in [Role::User, Role::Admin, Role::Mentor] {
            assert_eq!(Role::from_str_opt(role.as_str()), Some(role));
        }
        assert_eq!(Role::from_str_opt("root"), None);
    }

    #[test]
    fn turn_state_serializes_lowercase() {
        let json = serde_json::to_string(&TurnState::Listening).expect("serialize");
        assert_eq!(json, "\"listening\"");
    }

    #[test]
    fn termination_reason_uses_snake_case() {
        let json =
            serde_json::to_value(TerminationReason::IntegrityViolation).expect("serialize");
        assert_eq!(json, "integrity_violation");
    }
}
