//! Fluent builder API for constructing chat agents
//!
//! [`ConfigurableAgentBuilder`] collects the model, tools, checkpointer and turn
//! settings, validates them once, and produces a ready [`ChatAgent`].

use super::config::AgentConfig;
use super::runtime::ChatAgent;
use chatloop_core::error::AgentError;
use chatloop_core::llm::LanguageModel;
use chatloop_core::persistence::{Checkpointer, InMemoryCheckpointer};
use chatloop_core::tools::{ToolBox, ToolRegistry};
use chatloop_toolkit::{BuiltinTool, SearchConfig};
use std::sync::Arc;

/// Builder API to assemble a [`ChatAgent`] in a single fluent flow.
///
/// ```ignore
/// let agent = ConfigurableAgentBuilder::new("You are a helpful assistant.")
///     .with_model(model)
///     .with_builtin_tools(SearchConfig::default())
///     .with_checkpointer(Arc::new(SqliteCheckpointer::open("chatbot.db").await?))
///     .build()?;
/// ```
pub struct ConfigurableAgentBuilder {
    config: AgentConfig,
    model: Option<Arc<dyn LanguageModel>>,
    tools: Vec<ToolBox>,
    builtin_search: Option<SearchConfig>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
}

impl ConfigurableAgentBuilder {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            config: AgentConfig::new(system_prompt),
            model: None,
            tools: Vec::new(),
            builtin_search: None,
            checkpointer: None,
        }
    }

    /// Set the language model for the agent. Required.
    pub fn with_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Add a tool to the agent
    pub fn with_tool(mut self, tool: ToolBox) -> Self {
        self.tools.push(tool);
        self
    }

    /// Add multiple tools
    pub fn with_tools<I>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = ToolBox>,
    {
        self.tools.extend(tools);
        self
    }

    /// Register the calculator and web search tools, searching with `search`.
    pub fn with_builtin_tools(mut self, search: SearchConfig) -> Self {
        self.builtin_search = Some(search);
        self
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Maximum tool dispatch rounds per turn (default 5).
    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.config.max_tool_rounds = rounds;
        self
    }

    /// Capacity of each turn's event channel (default 64).
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.config = self.config.with_event_buffer(capacity);
        self
    }

    /// Validate the configuration and build the agent.
    ///
    /// Fails with [`AgentError::Configuration`] when no model is set or when two
    /// tools share a name.
    pub fn build(self) -> Result<ChatAgent, AgentError> {
        let Self {
            config,
            model,
            tools,
            builtin_search,
            checkpointer,
        } = self;

        let model = model.ok_or_else(|| {
            AgentError::Configuration("a language model is required (use with_model)".into())
        })?;

        let mut registry = ToolRegistry::new();
        if let Some(search) = builtin_search {
            registry.register_all(
                BuiltinTool::all(search)?
                    .into_iter()
                    .map(|tool| Arc::new(tool) as ToolBox),
            )?;
        }
        registry.register_all(tools)?;

        let checkpointer = checkpointer.unwrap_or_else(|| {
            tracing::warn!("no checkpointer configured; conversations will not survive a restart");
            Arc::new(InMemoryCheckpointer::new())
        });

        tracing::info!(
            tools = ?registry.names(),
            max_tool_rounds = config.max_tool_rounds,
            "chat agent ready"
        );
        Ok(ChatAgent::new(model, registry, checkpointer, config))
    }
}
