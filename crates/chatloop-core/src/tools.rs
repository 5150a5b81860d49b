//! Core tool system for the agent
//!
//! This module provides a schema-driven tool system that enables:
//! - Tool definitions with a JSON Schema subset for their inputs
//! - Argument validation before any tool code runs
//! - A registry the reasoning step can introspect and the runtime dispatches through

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::AgentError;

/// JSON Schema definition for tool parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolParameterSchema {
    /// JSON Schema type (object, string, number, integer, boolean, array, null)
    #[serde(rename = "type")]
    pub schema_type: String,

    /// Description of this parameter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Properties for object types (nested schemas)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<HashMap<String, ToolParameterSchema>>,

    /// Required property names for object types
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,

    /// Items schema for array types
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ToolParameterSchema>>,

    /// Enum values for restricted choices
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,

    /// Default value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Additional schema properties (minimum, additionalProperties, ...)
    #[serde(flatten)]
    pub additional: HashMap<String, Value>,
}

impl ToolParameterSchema {
    fn typed(schema_type: &str, description: impl Into<String>) -> Self {
        Self {
            schema_type: schema_type.to_string(),
            description: Some(description.into()),
            properties: None,
            required: None,
            items: None,
            enum_values: None,
            default: None,
            additional: HashMap::new(),
        }
    }

    /// Create a simple string parameter
    pub fn string(description: impl Into<String>) -> Self {
        Self::typed("string", description)
    }

    /// Create a number parameter
    pub fn number(description: impl Into<String>) -> Self {
        Self::typed("number", description)
    }

    /// Create an integer parameter
    pub fn integer(description: impl Into<String>) -> Self {
        Self::typed("integer", description)
    }

    /// Create a boolean parameter
    pub fn boolean(description: impl Into<String>) -> Self {
        Self::typed("boolean", description)
    }

    /// Create an object parameter with properties
    pub fn object(
        description: impl Into<String>,
        properties: HashMap<String, ToolParameterSchema>,
        required: Vec<String>,
    ) -> Self {
        Self {
            properties: Some(properties),
            required: Some(required),
            ..Self::typed("object", description)
        }
    }

    /// Create an array parameter
    pub fn array(description: impl Into<String>, items: ToolParameterSchema) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::typed("array", description)
        }
    }

    /// Restrict the accepted values.
    pub fn with_enum<I>(mut self, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Smallest accepted value for a number or integer.
    pub fn with_minimum(mut self, minimum: f64) -> Self {
        self.additional.insert("minimum".to_string(), minimum.into());
        self
    }

    /// Reject object keys that are not declared in `properties`.
    pub fn deny_unknown_properties(mut self) -> Self {
        self.additional
            .insert("additionalProperties".to_string(), Value::Bool(false));
        self
    }

    /// Check `value` against this schema. The error names the offending path.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        self.validate_at("", value)
    }

    fn validate_at(&self, path: &str, value: &Value) -> Result<(), String> {
        let label = if path.is_empty() { "arguments" } else { path };

        match self.schema_type.as_str() {
            "object" => {
                let empty = serde_json::Map::new();
                let object = match value {
                    Value::Object(object) => object,
                    // Models commonly send no arguments at all for parameterless tools.
                    Value::Null if path.is_empty() => &empty,
                    other => {
                        return Err(format!("{label} must be an object, got {}", json_type(other)))
                    }
                };
                for key in self.required.iter().flatten() {
                    if !object.contains_key(key) {
                        return Err(format!("missing required property '{}'", join(path, key)));
                    }
                }
                if let Some(properties) = &self.properties {
                    for (key, schema) in properties {
                        if let Some(child) = object.get(key) {
                            schema.validate_at(&join(path, key), child)?;
                        }
                    }
                }
                if self.additional.get("additionalProperties") == Some(&Value::Bool(false)) {
                    let declared = self.properties.as_ref();
                    if let Some(key) = object
                        .keys()
                        .find(|k| !declared.is_some_and(|p| p.contains_key(*k)))
                    {
                        return Err(format!("unexpected property '{}'", join(path, key)));
                    }
                }
            }
            "array" => {
                let items = value.as_array().ok_or_else(|| {
                    format!("{label} must be an array, got {}", json_type(value))
                })?;
                if let Some(schema) = &self.items {
                    for (index, item) in items.iter().enumerate() {
                        schema.validate_at(&format!("{label}[{index}]"), item)?;
                    }
                }
            }
            "string" if !value.is_string() => {
                return Err(format!("{label} must be a string, got {}", json_type(value)))
            }
            "number" if !value.is_number() => {
                return Err(format!("{label} must be a number, got {}", json_type(value)))
            }
            "integer" if !is_integer(value) => {
                return Err(format!("{label} must be an integer, got {}", json_type(value)))
            }
            "boolean" if !value.is_boolean() => {
                return Err(format!("{label} must be a boolean, got {}", json_type(value)))
            }
            "null" if !value.is_null() => {
                return Err(format!("{label} must be null, got {}", json_type(value)))
            }
            _ => {}
        }

        if let (Some(minimum), Some(number)) = (
            self.additional.get("minimum").and_then(Value::as_f64),
            value.as_f64(),
        ) {
            if number < minimum {
                return Err(format!("{label} must be at least {minimum}, got {number}"));
            }
        }

        if let Some(allowed) = &self.enum_values {
            if !allowed.contains(value) {
                return Err(format!("{label} must be one of {}", Value::Array(allowed.clone())));
            }
        }
        Ok(())
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn is_integer(value: &Value) -> bool {
    value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|f| f.fract() == 0.0)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Complete schema definition for a tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    /// Unique, stable name for this tool (used by the model for invocation)
    pub name: String,

    /// Human-readable description the reasoning step uses to decide applicability
    pub description: String,

    /// Input parameter schema (typically an object with properties)
    pub parameters: ToolParameterSchema,
}

impl ToolSchema {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameterSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Create a tool schema with no parameters
    pub fn no_params(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(
            name,
            description,
            ToolParameterSchema {
                description: None,
                ..ToolParameterSchema::object("", HashMap::new(), Vec::new())
            },
        )
    }
}

/// Core trait for tool implementations
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the schema definition for this tool
    fn schema(&self) -> ToolSchema;

    /// Executes the tool with arguments that already passed schema validation
    async fn execute(&self, args: Value) -> anyhow::Result<Value>;
}

/// Type alias for shared tool instances
pub type ToolBox = Arc<dyn Tool>;

/// Tool registry for managing, describing and invoking the available tools
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolBox>,
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool under its schema name. Names are unique.
    pub fn register(&mut self, tool: ToolBox) -> Result<&mut Self, AgentError> {
        let name = tool.schema().name;
        if name.trim().is_empty() {
            return Err(AgentError::Configuration(
                "tool name must not be empty".to_string(),
            ));
        }
        if self.tools.contains_key(&name) {
            return Err(AgentError::Configuration(format!(
                "tool '{name}' is already registered"
            )));
        }
        tracing::debug!(tool = %name, "registered tool");
        self.tools.insert(name, tool);
        Ok(self)
    }

    /// Register multiple tools, stopping at the first duplicate
    pub fn register_all<I>(&mut self, tools: I) -> Result<&mut Self, AgentError>
    where
        I: IntoIterator<Item = ToolBox>,
    {
        for tool in tools {
            self.register(tool)?;
        }
        Ok(self)
    }

    /// Validate `arguments` against the tool's input schema and run it.
    ///
    /// Unknown tools and schema mismatches are [`AgentError::Validation`]; errors
    /// raised by the tool itself are [`AgentError::ToolExecution`]. No retries.
    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<Value, AgentError> {
        let tool = self.get(name).ok_or_else(|| AgentError::Validation {
            tool: name.to_string(),
            reason: format!("no tool named '{name}' is registered"),
        })?;

        tool.schema()
            .parameters
            .validate(&arguments)
            .map_err(|reason| AgentError::Validation {
                tool: name.to_string(),
                reason,
            })?;

        tracing::debug!(tool = %name, "invoking tool");
        tool.execute(arguments).await.map_err(|err| {
            tracing::warn!(tool = %name, error = %err, "tool execution failed");
            AgentError::ToolExecution {
                tool: name.to_string(),
                reason: format!("{err:#}"),
            }
        })
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&ToolBox> {
        self.tools.get(name)
    }

    /// All tool schemas, sorted by name so prompts are stable
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|t| t.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Tool names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a tool is registered
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
