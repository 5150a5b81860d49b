//! Tokio-powered runtime for the chatloop agent.
//! A [`ChatAgent`] runs one turn at a time per thread: it reasons, dispatches
//! tool calls concurrently, checkpoints the result and streams every step to
//! the caller through a [`StreamingSession`].

pub mod agent;
pub mod locks;
pub mod providers;
pub mod session;

pub use agent::{
    AgentConfig, ChatAgent, ConfigurableAgentBuilder, ThreadSummary, DEFAULT_MAX_TOOL_ROUNDS,
    DEFAULT_SYSTEM_PROMPT,
};
pub use locks::{ActiveTurn, ThreadLocks, TurnPhase};
pub use providers::{OpenAiChatModel, OpenAiConfig};
pub use session::{StreamingSession, TurnOutcome};
