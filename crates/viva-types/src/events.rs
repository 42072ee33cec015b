//! Realtime event contracts for the WebSocket surface.
//!
//! Control events travel as JSON text frames tagged by `type`; microphone
//! audio travels as binary frames and never appears here. Field names are
//! camelCase to match the browser client's frame types.

use crate::{TerminationReason, TurnState};
use serde::{Deserialize, Serialize};

/// Incoming control events (client → server).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Request a new interview session lock.
    #[serde(rename = "session:start")]
    SessionStart,
    /// Liveness pulse, sent roughly every 15 seconds while a session runs.
    #[serde(rename = "session:heartbeat")]
    SessionHeartbeat,
    /// Request a graceful session close.
    #[serde(rename = "session:end")]
    SessionEnd,
    /// Begin the turn-taking loop (valid after a successful session start).
    #[serde(rename = "interview:start")]
    InterviewStart,
    /// Report one client-detected integrity violation.
    #[serde(rename = "session:violation")]
    SessionViolation,
}

/// Outgoing events (server → client).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Orchestrator state transition notice.
    #[serde(rename = "interview:status")]
    InterviewStatus { state: TurnState, message: String },

    /// Finalized user utterance echo, for the transcript UI.
    #[serde(rename = "user:transcript")]
    UserTranscript { text: String },

    /// One synthesized reply sentence: its text plus base64 audio.
    #[serde(rename = "audio:response")]
    AudioResponse { text: String, audio: String },

    /// First-strike violation notice.
    #[serde(rename = "session:warning")]
    SessionWarning { message: String },

    /// Forced termination notice; terminal for this connection's interview.
    #[serde(rename = "session:end")]
    SessionEnd {
        reason: TerminationReason,
        message: String,
    },

    /// Acknowledgement for a session control request.
    #[serde(rename = "session:ack")]
    SessionAck {
        op: SessionOp,
        success: bool,
        #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(rename = "remainingSeconds", skip_serializing_if = "Option::is_none")]
        remaining_seconds: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Recoverable-error notice; the interview continues.
    #[serde(rename = "error")]
    Error { message: String },
}

/// Which session operation a [`ServerEvent::SessionAck`] answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionOp {
    Start,
    Heartbeat,
    End,
}

impl ServerEvent {
    /// Ack helper for a successful session start.
    pub fn start_ok(session_id: String, remaining_seconds: i64) -> Self {
        Self::SessionAck {
            op: SessionOp::Start,
            success: true,
            session_id: Some(session_id),
            remaining_seconds: Some(remaining_seconds),
            error: None,
        }
    }

    /// Ack helper for a failed session operation.
    pub fn op_failed(op: SessionOp, error: impl Into<String>) -> Self {
        Self::SessionAck {
            op,
            success: false,
            session_id: None,
            remaining_seconds: None,
            error: Some(error.into()),
        }
    }

    /// Ack helper for a successful heartbeat or end.
    pub fn op_ok(op: SessionOp) -> Self {
        Self::SessionAck {
            op,
            success: true,
            session_id: None,
            remaining_seconds: None,
            error: None,
        }
    }
}
