use async_trait::async_trait;
use chatloop_core::llm::{
    ChunkStream, LanguageModel, LlmRequest, LlmResponse, ModelDecision, StreamChunk,
};
use chatloop_core::messaging::{MessageContent, MessageRole, ToolCall, ToolOutcome};
use chatloop_core::tools::{ToolParameterSchema, ToolSchema};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Groq's OpenAI-compatible endpoint.
pub const GROQ_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "moonshotai/kimi-k2-instruct-0905";

#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub api_url: Option<String>,
    pub temperature: Option<f32>,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            api_url: None,
            temperature: None,
        }
    }

    /// Groq endpoint with the default model.
    pub fn groq(api_key: impl Into<String>) -> Self {
        Self::new(api_key, DEFAULT_MODEL).with_api_url(Some(GROQ_API_URL.to_string()))
    }

    pub fn with_api_url(mut self, api_url: Option<String>) -> Self {
        self.api_url = api_url;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn url(&self) -> &str {
        self.api_url.as_deref().unwrap_or(OPENAI_API_URL)
    }
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("model", &self.model)
            .field("api_url", &self.url())
            .field("temperature", &self.temperature)
            .finish_non_exhaustive()
    }
}

/// Chat model speaking the OpenAI `/chat/completions` protocol, with tool calling.
pub struct OpenAiChatModel {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiChatModel {
    pub fn new(config: OpenAiConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder()
                .user_agent(concat!("chatloop/", env!("CARGO_PKG_VERSION")))
                .build()?,
            config,
        })
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    async fn send(&self, request: &LlmRequest, stream: bool) -> anyhow::Result<reqwest::Response> {
        let messages = to_openai_messages(request);
        let tools = to_openai_tools(&request.tools);
        let body = ChatRequest {
            model: &self.config.model,
            messages: &messages,
            tools: &tools,
            temperature: self.config.temperature,
            stream: stream.then_some(true),
        };

        tracing::debug!(
            model = %self.config.model,
            messages = messages.len(),
            tools = tools.len(),
            stream,
            "OpenAI request"
        );

        let response = self
            .client
            .post(self.config.url())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(%status, body = %error_text, "OpenAI API error");
            anyhow::bail!("OpenAI API error: {} - {}", status, error_text);
        }
        Ok(response)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [OpenAiMessage],
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    tools: &'a [OpenAiTool<'a>],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize, PartialEq)]
struct OpenAiMessage {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OpenAiToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl OpenAiMessage {
    fn text(role: &'static str, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct OpenAiToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: OpenAiFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct OpenAiFunctionCall {
    name: String,
    /// JSON-encoded arguments, as the protocol transmits them.
    #[serde(default)]
    arguments: String,
}

#[derive(Serialize)]
struct OpenAiTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: OpenAiFunction<'a>,
}

#[derive(Serialize)]
struct OpenAiFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a ToolParameterSchema,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

// Streaming response structures
#[derive(Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

#[derive(Deserialize)]
struct StreamToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Convert thread history into protocol messages.
///
/// History stores each tool call together with its result, while the protocol
/// wants an assistant message announcing the calls followed by one `tool`
/// message per result. Each contiguous run of tool results is expanded that way.
fn to_openai_messages(request: &LlmRequest) -> Vec<OpenAiMessage> {
    let mut messages = Vec::with_capacity(request.messages.len() + 2);
    messages.push(OpenAiMessage::text("system", request.system_prompt.clone()));

    let mut history = request.messages.iter().peekable();
    while let Some(msg) = history.next() {
        match &msg.content {
            MessageContent::Text(text) => {
                let role = match msg.role {
                    MessageRole::User => "user",
                    MessageRole::Assistant => "assistant",
                    MessageRole::Tool => "tool",
                };
                messages.push(OpenAiMessage::text(role, text.clone()));
            }
            MessageContent::ToolResult { call, outcome } => {
                let mut run: Vec<(&ToolCall, &ToolOutcome)> = vec![(call, outcome)];
                while let Some((call, outcome)) =
                    history.peek().and_then(|next| next.content.as_tool_result())
                {
                    run.push((call, outcome));
                    history.next();
                }

                messages.push(OpenAiMessage {
                    role: "assistant",
                    content: None,
                    tool_calls: run.iter().map(|(call, _)| to_openai_tool_call(call)).collect(),
                    tool_call_id: None,
                });
                for (call, outcome) in run {
                    messages.push(OpenAiMessage {
                        role: "tool",
                        content: Some(outcome.render()),
                        tool_calls: Vec::new(),
                        tool_call_id: Some(call.id.clone()),
                    });
                }
            }
        }
    }
    messages
}

fn to_openai_tool_call(call: &ToolCall) -> OpenAiToolCall {
    let arguments = match &call.arguments {
        // Unparseable arguments are kept verbatim so the model sees what it sent.
        Value::String(raw) => raw.clone(),
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    };
    OpenAiToolCall {
        id: call.id.clone(),
        kind: function_type(),
        function: OpenAiFunctionCall {
            name: call.name.clone(),
            arguments,
        },
    }
}

fn to_openai_tools(schemas: &[ToolSchema]) -> Vec<OpenAiTool<'_>> {
    schemas
        .iter()
        .map(|schema| OpenAiTool {
            kind: "function",
            function: OpenAiFunction {
                name: &schema.name,
                description: &schema.description,
                parameters: &schema.parameters,
            },
        })
        .collect()
}

/// Decode protocol-encoded arguments. Invalid JSON is passed through as a
/// string so schema validation rejects it and the model sees the error.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "tool call arguments are not valid JSON");
        Value::String(raw.to_string())
    })
}

fn tool_call_id(id: String) -> String {
    if id.is_empty() {
        format!("call_{}", uuid::Uuid::new_v4().simple())
    } else {
        id
    }
}

fn decision_from(content: Option<String>, tool_calls: Vec<ToolCall>) -> ModelDecision {
    if tool_calls.is_empty() {
        ModelDecision::answer(content.unwrap_or_default())
    } else {
        ModelDecision::tool_calls(tool_calls)
    }
}

/// Reassembles a streamed completion from `data:` lines.
#[derive(Default)]
struct StreamAccumulator {
    content: String,
    tool_calls: BTreeMap<usize, PartialToolCall>,
    /// A choice reported its `finish_reason`.
    finished: bool,
    done: bool,
}

#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl StreamAccumulator {
    /// Feed one line; returns the chunks it produced.
    fn push_line(&mut self, line: &str) -> anyhow::Result<Vec<StreamChunk>> {
        let Some(data) = line.trim().strip_prefix("data:").map(str::trim) else {
            return Ok(Vec::new());
        };
        if self.done || data.is_empty() {
            return Ok(Vec::new());
        }
        if data == "[DONE]" {
            return Ok(vec![self.finish()]);
        }

        let chunk = match serde_json::from_str::<StreamResponse>(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to parse streaming chunk");
                return Ok(Vec::new());
            }
        };
        if let Some(error) = chunk.error {
            anyhow::bail!("OpenAI stream error: {error}");
        }

        let mut out = Vec::new();
        for choice in chunk.choices {
            if choice.finish_reason.is_some_and(|reason| !reason.is_empty()) {
                self.finished = true;
            }
            let Some(delta) = choice.delta else {
                continue;
            };
            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                self.content.push_str(&text);
                out.push(StreamChunk::TextDelta(text));
            }
            for call in delta.tool_calls.into_iter().flatten() {
                let entry = self.tool_calls.entry(call.index).or_default();
                if let Some(id) = call.id.filter(|id| !id.is_empty()) {
                    entry.id = id;
                }
                if let Some(function) = call.function {
                    if let Some(name) = function.name {
                        entry.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        entry.arguments.push_str(&arguments);
                    }
                }
            }
        }
        Ok(out)
    }

    fn is_done(&self) -> bool {
        self.done
    }

    /// The body ended. Without `[DONE]` or a `finish_reason` the answer is truncated.
    fn end_of_body(&mut self) -> anyhow::Result<Option<StreamChunk>> {
        if self.done {
            return Ok(None);
        }
        if !self.finished {
            anyhow::bail!("stream ended before completion");
        }
        Ok(Some(self.finish()))
    }

    /// The terminal chunk. Later lines are ignored.
    fn finish(&mut self) -> StreamChunk {
        self.done = true;
        let calls = std::mem::take(&mut self.tool_calls)
            .into_values()
            .filter(|call| !call.name.is_empty())
            .map(|call| ToolCall::new(tool_call_id(call.id), call.name, parse_arguments(&call.arguments)))
            .collect();
        let content = std::mem::take(&mut self.content);
        StreamChunk::Done(LlmResponse::from(decision_from(Some(content), calls)))
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn generate(&self, request: LlmRequest) -> anyhow::Result<LlmResponse> {
        let data: ChatResponse = self.send(&request, false).await?.json().await?;
        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("OpenAI response missing choices"))?;

        let calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| {
                ToolCall::new(
                    tool_call_id(call.id),
                    call.function.name,
                    parse_arguments(&call.function.arguments),
                )
            })
            .collect();
        Ok(decision_from(choice.message.content, calls).into())
    }

    async fn generate_stream(&self, request: LlmRequest) -> anyhow::Result<ChunkStream> {
        let mut bytes = self.send(&request, true).await?.bytes_stream();

        let stream = async_stream::try_stream! {
            let mut accumulator = StreamAccumulator::default();
            let mut buffer: Vec<u8> = Vec::new();

            'read: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| anyhow::anyhow!("Stream error: {e}"))?;
                buffer.extend_from_slice(&chunk);
                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    for out in accumulator.push_line(&String::from_utf8_lossy(&line))? {
                        yield out;
                    }
                    if accumulator.is_done() {
                        break 'read;
                    }
                }
            }

            if !accumulator.is_done() {
                for out in accumulator.push_line(&String::from_utf8_lossy(&buffer))? {
                    yield out;
                }
            }
            if let Some(done) = accumulator.end_of_body()? {
                yield done;
            }
        };

        Ok(Box::pin(stream))
    }
}
