use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::messaging::{Message, MessageRole, ToolCall};

/// Unique identifier for a conversation thread.
pub type ThreadId = String;

const DEFAULT_TITLE: &str = "New Chat";
const TITLE_WORDS: usize = 5;

/// Ordered history of one thread plus whatever is still in flight.
///
/// Owned by the agent while a turn runs and persisted as a [`Checkpoint`]
/// between turns. Messages can only be appended, never edited.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationState {
    created_at: DateTime<Utc>,
    messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pending_tool_calls: Vec<ToolCall>,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationState {
    pub fn new() -> Self {
        Self {
            created_at: Utc::now(),
            messages: Vec::new(),
            pending_tool_calls: Vec::new(),
        }
    }

    /// When the thread received its first message.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Append a message, stamping its ordinal. Returns the ordinal.
    pub fn append(&mut self, mut message: Message) -> usize {
        let ordinal = self.messages.len();
        message.ordinal = ordinal;
        self.messages.push(message);
        ordinal
    }

    pub fn pending_tool_calls(&self) -> &[ToolCall] {
        &self.pending_tool_calls
    }

    pub fn set_pending_tool_calls(&mut self, calls: Vec<ToolCall>) {
        self.pending_tool_calls = calls;
    }

    pub fn clear_pending_tool_calls(&mut self) {
        self.pending_tool_calls.clear();
    }

    /// Short display name: the first words of the first user message.
    pub fn title(&self) -> String {
        let first = self
            .messages
            .iter()
            .find(|m| m.role == MessageRole::User)
            .and_then(|m| m.text());
        let Some(text) = first else {
            return DEFAULT_TITLE.to_string();
        };
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            return DEFAULT_TITLE.to_string();
        }
        let mut title = words
            .iter()
            .take(TITLE_WORDS)
            .copied()
            .collect::<Vec<_>>()
            .join(" ");
        if words.len() > TITLE_WORDS {
            title.push_str("...");
        }
        title
    }

    /// User and assistant text messages, in order. Tool results are omitted.
    pub fn transcript(&self) -> impl Iterator<Item = (MessageRole, &str)> {
        self.messages.iter().filter_map(|m| match m.role {
            MessageRole::User | MessageRole::Assistant => m.text().map(|t| (m.role, t)),
            MessageRole::Tool => None,
        })
    }
}

/// Monotonic per-thread checkpoint sequence number. The first save is version 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointVersion(pub u64);

impl CheckpointVersion {
    pub const INITIAL: CheckpointVersion = CheckpointVersion(1);

    pub fn next(self) -> Self {
        CheckpointVersion(self.0 + 1)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CheckpointVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Immutable durable snapshot of a thread. Superseded by newer versions, never edited.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub thread_id: ThreadId,
    pub version: CheckpointVersion,
    pub created_at: DateTime<Utc>,
    pub state: ConversationState,
}

impl Checkpoint {
    pub fn new(thread_id: impl Into<ThreadId>, version: CheckpointVersion, state: ConversationState) -> Self {
        Self {
            thread_id: thread_id.into(),
            version,
            created_at: Utc::now(),
            state,
        }
    }
}
