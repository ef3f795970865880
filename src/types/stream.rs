//! Canonical streaming events.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A normalized event produced by every provider adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental text.
    Delta { text: String },
    /// The provider finished this call.
    Done { reason: DoneReason },
    /// The stream failed; nothing follows.
    Error { detail: String },
}

impl StreamEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        Self::Delta { text: text.into() }
    }

    pub fn done(reason: DoneReason) -> Self {
        Self::Done { reason }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self::Error {
            detail: detail.into(),
        }
    }

    /// Whether no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Delta { .. })
    }
}

/// Why a provider call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DoneReason {
    /// Natural end of the answer.
    Stop,
    /// Length-based cut-off; the answer is incomplete.
    Truncated,
}

impl DoneReason {
    /// Map a provider finish indicator to a done reason.
    ///
    /// Returns `None` for values that do not end the stream (e.g. `tool_use`
    /// is treated as a stop by callers that care).
    pub fn from_provider(value: &str) -> Option<Self> {
        match value {
            "stop" | "end_turn" | "STOP" | "stop_sequence" | "eos" => Some(Self::Stop),
            "length" | "max_tokens" | "MAX_TOKENS" | "model_length" => Some(Self::Truncated),
            _ => None,
        }
    }
}
