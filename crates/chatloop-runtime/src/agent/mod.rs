//! Chat agent implementation modules
//!
//! - `config`: turn-level settings and defaults
//! - `runtime`: the [`ChatAgent`] and its turn state machine
//! - `builder`: fluent builder for agent construction

pub mod builder;
pub mod config;
pub mod runtime;

pub use builder::ConfigurableAgentBuilder;
pub use config::{AgentConfig, DEFAULT_MAX_TOOL_ROUNDS, DEFAULT_SYSTEM_PROMPT};
pub use runtime::{ChatAgent, ThreadSummary};
