//! Events emitted, in order, while a turn runs.

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, ErrorKind};
use crate::messaging::{ToolCall, ToolOutcome};
use crate::state::CheckpointVersion;

/// One incrementally emitted unit of a turn's observable output. Ephemeral.
///
/// Every turn's sequence ends with exactly one terminal event
/// ([`StreamEvent::FinalAnswer`] or [`StreamEvent::Error`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    PartialToken {
        content: String,
    },
    ToolCallStarted {
        call: ToolCall,
    },
    ToolCallResult {
        call_id: String,
        tool_name: String,
        outcome: ToolOutcome,
    },
    FinalAnswer {
        content: String,
        version: CheckpointVersion,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl StreamEvent {
    pub fn event_type_name(&self) -> &'static str {
        match self {
            StreamEvent::PartialToken { .. } => "partial_token",
            StreamEvent::ToolCallStarted { .. } => "tool_call_started",
            StreamEvent::ToolCallResult { .. } => "tool_call_result",
            StreamEvent::FinalAnswer { .. } => "final_answer",
            StreamEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::FinalAnswer { .. } | StreamEvent::Error { .. }
        )
    }

    pub fn from_error(err: &AgentError) -> Self {
        StreamEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
