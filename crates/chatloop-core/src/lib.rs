//! Core traits and shared data models for the chatloop agent.
//! This crate keeps the domain primitives lightweight and platform-agnostic
//! so the runtime, tool kit and storage backends can compose them without
//! pulling in heavy deps.

pub mod error;
pub mod events;
pub mod llm;
pub mod messaging;
pub mod persistence;
pub mod state;
pub mod tools;

pub use error::{AgentError, ErrorKind, StorageError};
pub use events::StreamEvent;
pub use llm::{ChunkStream, LanguageModel, LlmRequest, LlmResponse, ModelDecision, StreamChunk};
pub use messaging::{
    Message, MessageContent, MessageRole, ToolCall, ToolFailureKind, ToolOutcome,
};
pub use persistence::{Checkpointer, InMemoryCheckpointer};
pub use state::{Checkpoint, CheckpointVersion, ConversationState, ThreadId};
pub use tools::{Tool, ToolBox, ToolParameterSchema, ToolRegistry, ToolSchema};
