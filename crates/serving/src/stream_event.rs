//! Session-level events.
//!
//! `SessionEvent` is everything a chat session tells its caller. The gateway
//! forwards them as JSON WebSocket frames; the CLI prints them.

use serde::{Deserialize, Serialize};

pub const READY_MESSAGE: &str = "Ready to answer your questions!";

/// Events emitted by a [`ChatSession`](crate::session::ChatSession).
///
/// Wire tags:
/// - `ready`: session opened, waiting for input
/// - `rejected`: the query failed validation; the session continues
/// - `chunk`: a streamed answer fragment
/// - `answer`: a whole answer (cache hit or one-shot inference)
/// - `done`: the turn finished
/// - `error`: the turn failed; the session continues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Ready { message: String },

    Rejected { reason: String },

    Chunk { content: String },

    Answer { content: String, cached: bool },

    Done {
        cached: bool,
        response_time_ms: u64,
        sources: Vec<String>,
    },

    Error { message: String },
}

impl SessionEvent {
    pub fn ready() -> Self {
        Self::Ready {
            message: READY_MESSAGE.to_string(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::Rejected { .. } => "rejected",
            Self::Chunk { .. } => "chunk",
            Self::Answer { .. } => "answer",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// Whether this event ends the current turn.
    pub fn ends_turn(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::Done { .. } | Self::Error { .. })
    }
}
