//! Toolkit of built-in tools and utilities for the chatloop agent
//!
//! This crate provides:
//! - The built-in tools: an arithmetic calculator and a web search
//! - [`BuiltinTool`], the closed set of those tools, and [`default_registry`]
//! - Tool builder utilities for ad-hoc tools backed by closures

pub mod builder;
pub mod builtin;
pub mod calculator;
pub mod search;

// Re-export core types from chatloop-core for convenience
pub use chatloop_core::tools::{Tool, ToolBox, ToolParameterSchema, ToolRegistry, ToolSchema};

pub use builder::{tool, tool_sync, ToolBuilder};
pub use builtin::{default_registry, BuiltinTool};
pub use calculator::Calculator;
pub use search::{SearchConfig, SearchProvider, WebSearch};
