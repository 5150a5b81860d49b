//! Error taxonomy shared by the registry, the checkpoint stores and the runtime.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::ThreadId;

/// Failure reading or writing checkpoints. Fatal to the current turn; the
/// previously committed checkpoint of the thread is left untouched.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid thread id: {0}")]
    InvalidThreadId(String),

    #[error("checkpoint for thread '{thread_id}' is unreadable: {reason}")]
    Corrupt { thread_id: ThreadId, reason: String },

    #[error("storage backend error: {0:#}")]
    Backend(#[from] anyhow::Error),
}

impl StorageError {
    pub fn corrupt(thread_id: impl Into<ThreadId>, reason: impl ToString) -> Self {
        Self::Corrupt {
            thread_id: thread_id.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    /// Registry or builder misuse. Raised at startup, never mid-turn.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid arguments for tool '{tool}': {reason}")]
    Validation { tool: String, reason: String },

    #[error("tool '{tool}' failed: {reason}")]
    ToolExecution { tool: String, reason: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("thread '{0}' already has a turn in progress")]
    Busy(ThreadId),

    #[error("reasoning step failed: {0:#}")]
    Reasoning(anyhow::Error),

    #[error("turn cancelled")]
    Cancelled,
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Configuration(_) => ErrorKind::Configuration,
            AgentError::Validation { .. } => ErrorKind::Validation,
            AgentError::ToolExecution { .. } => ErrorKind::ToolExecution,
            AgentError::Storage(_) => ErrorKind::Storage,
            AgentError::Busy(_) => ErrorKind::Busy,
            AgentError::Reasoning(_) => ErrorKind::Reasoning,
            AgentError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Serializable discriminant of [`AgentError`], carried by stream events and
/// HTTP error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Validation,
    ToolExecution,
    Storage,
    Busy,
    Reasoning,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Validation => "validation",
            ErrorKind::ToolExecution => "tool_execution",
            ErrorKind::Storage => "storage",
            ErrorKind::Busy => "busy",
            ErrorKind::Reasoning => "reasoning",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}
