use async_trait::async_trait;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::messaging::{Message, ToolCall};
use crate::tools::ToolSchema;

/// Request passed to a language model: the whole thread plus the tools it may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,
}

impl LlmRequest {
    pub fn new(system_prompt: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages,
            tools: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }
}

/// What the reasoning step decided.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelDecision {
    FinalAnswer { content: String },
    ToolCalls { calls: Vec<ToolCall> },
}

impl ModelDecision {
    pub fn answer(content: impl Into<String>) -> Self {
        ModelDecision::FinalAnswer {
            content: content.into(),
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        ModelDecision::ToolCalls { calls }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmResponse {
    pub decision: ModelDecision,
}

impl From<ModelDecision> for LlmResponse {
    fn from(decision: ModelDecision) -> Self {
        Self { decision }
    }
}

/// One unit of a streamed model response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    TextDelta(String),
    /// Terminal chunk carrying the complete decision.
    Done(LlmResponse),
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamChunk>> + Send>>;

/// The opaque reasoning capability.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, request: LlmRequest) -> anyhow::Result<LlmResponse>;

    /// Streaming variant: zero or more `TextDelta`s followed by exactly one `Done`.
    /// Models without native streaming get a single `Done` chunk.
    async fn generate_stream(&self, request: LlmRequest) -> anyhow::Result<ChunkStream> {
        let response = self.generate(request).await?;
        Ok(Box::pin(stream::once(async move {
            Ok(StreamChunk::Done(response))
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    struct Fixed;

    #[async_trait]
    impl LanguageModel for Fixed {
        async fn generate(&self, _request: LlmRequest) -> anyhow::Result<LlmResponse> {
            Ok(ModelDecision::answer("hello").into())
        }
    }

    #[tokio::test]
    async fn default_stream_yields_single_done_chunk() {
        let chunks: Vec<_> = Fixed
            .generate_stream(LlmRequest::new("sys", vec![]))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(chunks.len(), 1);
        match &chunks[0] {
            Ok(StreamChunk::Done(response)) => {
                assert_eq!(response.decision, ModelDecision::answer("hello"))
            }
            other => panic!("unexpected chunk {other:?}"),
        }
    }
}
