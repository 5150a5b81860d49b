use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AgentError;

/// One turn of a conversation. Immutable once appended to a
/// [`ConversationState`](crate::state::ConversationState).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Position within the thread, assigned when appended.
    pub ordinal: usize,
    pub role: MessageRole,
    pub content: MessageContent,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MessageContent {
    Text(String),
    /// A resolved tool invocation: the request that was dispatched and what came back.
    ToolResult { call: ToolCall, outcome: ToolOutcome },
}

impl MessageContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<(&ToolCall, &ToolOutcome)> {
        match self {
            MessageContent::ToolResult { call, outcome } => Some((call, outcome)),
            _ => None,
        }
    }
}

impl Message {
    fn new(role: MessageRole, content: MessageContent) -> Self {
        Self {
            ordinal: 0,
            role,
            content,
            created_at: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, MessageContent::Text(text.into()))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, MessageContent::Text(text.into()))
    }

    pub fn tool_result(call: ToolCall, outcome: ToolOutcome) -> Self {
        Self::new(MessageRole::Tool, MessageContent::ToolResult { call, outcome })
    }

    pub fn text(&self) -> Option<&str> {
        self.content.as_text()
    }
}

/// A tool invocation requested by the reasoning step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailureKind {
    Validation,
    Execution,
}

/// Result of a tool invocation as folded into history. Failures are data here,
/// so the next reasoning step can see them and adapt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { output: Value },
    Failure { kind: ToolFailureKind, message: String },
}

impl ToolOutcome {
    pub fn from_result(result: Result<Value, AgentError>) -> Self {
        match result {
            Ok(output) => ToolOutcome::Success { output },
            Err(err @ AgentError::Validation { .. }) => ToolOutcome::Failure {
                kind: ToolFailureKind::Validation,
                message: err.to_string(),
            },
            Err(err) => ToolOutcome::Failure {
                kind: ToolFailureKind::Execution,
                message: err.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success { .. })
    }

    /// Text handed back to the model for this outcome.
    pub fn render(&self) -> String {
        match self {
            ToolOutcome::Success {
                output: Value::String(text),
            } => text.clone(),
            ToolOutcome::Success { output } => output.to_string(),
            ToolOutcome::Failure { message, .. } => format!("Error: {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validation_errors_fold_as_validation_failures() {
        let outcome = ToolOutcome::from_result(Err(AgentError::Validation {
            tool: "calculator".into(),
            reason: "missing required property 'expression'".into(),
        }));
        match &outcome {
            ToolOutcome::Failure { kind, message } => {
                assert_eq!(*kind, ToolFailureKind::Validation);
                assert!(message.contains("expression"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(outcome.render().starts_with("Error: "));
    }

    #[test]
    fn string_outputs_render_without_quotes() {
        let outcome = ToolOutcome::Success {
            output: json!("sunny"),
        };
        assert_eq!(outcome.render(), "sunny");

        let outcome = ToolOutcome::Success {
            output: json!({"result": 84}),
        };
        assert_eq!(outcome.render(), r#"{"result":84}"#);
    }

    #[test]
    fn tool_result_message_serializes_with_call() {
        let message = Message::tool_result(
            ToolCall::new("call-1", "calculator", json!({"expression": "12*7"})),
            ToolOutcome::Success { output: json!(84) },
        );
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["content"]["type"], "tool_result");
        assert_eq!(value["content"]["value"]["call"]["name"], "calculator");
        assert_eq!(value["content"]["value"]["outcome"]["status"], "success");

        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back, message);
    }
}
