//! Configuration for the chat agent.

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. \
Use the web_search tool for questions about current events or facts you are unsure of, \
and the calculator tool for any arithmetic. Answer concisely.";

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 5;

pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Answer recorded when a turn keeps requesting tools past its round limit.
pub(crate) const ROUND_LIMIT_ANSWER: &str =
    "I was unable to complete this request within the allowed number of tool calls.";

/// Turn-level settings shared by every thread of an agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub system_prompt: String,
    /// Tool dispatch rounds allowed per turn before the answer is forced.
    pub max_tool_rounds: usize,
    /// Capacity of each session's event channel.
    pub event_buffer: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl AgentConfig {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }
}
