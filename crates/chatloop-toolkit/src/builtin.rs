//! The closed set of tools shipped with the agent.

use async_trait::async_trait;
use chatloop_core::error::AgentError;
use chatloop_core::tools::{Tool, ToolRegistry, ToolSchema};
use serde_json::Value;
use std::sync::Arc;

use crate::calculator::Calculator;
use crate::search::{SearchConfig, WebSearch};

pub enum BuiltinTool {
    Calculator(Calculator),
    WebSearch(WebSearch),
}

impl BuiltinTool {
    /// Every built-in tool, configured.
    pub fn all(search: SearchConfig) -> Result<Vec<BuiltinTool>, AgentError> {
        let web_search = WebSearch::new(search).map_err(|err| {
            AgentError::Configuration(format!("failed to build web search client: {err:#}"))
        })?;
        Ok(vec![
            BuiltinTool::Calculator(Calculator::new()),
            BuiltinTool::WebSearch(web_search),
        ])
    }
}

#[async_trait]
impl Tool for BuiltinTool {
    fn schema(&self) -> ToolSchema {
        match self {
            BuiltinTool::Calculator(tool) => tool.schema(),
            BuiltinTool::WebSearch(tool) => tool.schema(),
        }
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        match self {
            BuiltinTool::Calculator(tool) => tool.execute(args).await,
            BuiltinTool::WebSearch(tool) => tool.execute(args).await,
        }
    }
}

/// Registry holding the calculator and web search tools.
pub fn default_registry(search: SearchConfig) -> Result<ToolRegistry, AgentError> {
    let mut registry = ToolRegistry::new();
    registry.register_all(
        BuiltinTool::all(search)?
            .into_iter()
            .map(|tool| Arc::new(tool) as Arc<dyn Tool>),
    )?;
    Ok(registry)
}
