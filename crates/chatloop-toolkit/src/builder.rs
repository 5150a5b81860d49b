//! Closure-backed tools.
//!
//! [`ToolBuilder`] turns a plain function into a registrable [`Tool`]. Parameters
//! can be declared one by one with [`ToolBuilder::param`] or supplied as a whole
//! schema with [`ToolBuilder::with_parameters`].

use async_trait::async_trait;
use chatloop_core::tools::{Tool, ToolBox, ToolParameterSchema, ToolSchema};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

pub type AsyncToolFn = Arc<dyn Fn(Value) -> BoxFuture<anyhow::Result<Value>> + Send + Sync>;

pub struct ClosureTool {
    schema: ToolSchema,
    handler: AsyncToolFn,
}

#[async_trait]
impl Tool for ClosureTool {
    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        (self.handler)(args).await
    }
}

pub struct ToolBuilder {
    name: String,
    description: String,
    parameters: Option<ToolParameterSchema>,
    properties: HashMap<String, ToolParameterSchema>,
    required: Vec<String>,
    strict: bool,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: None,
            properties: HashMap::new(),
            required: Vec::new(),
            strict: false,
        }
    }

    /// Use `parameters` as the complete input schema. Overrides [`ToolBuilder::param`].
    pub fn with_parameters(mut self, parameters: ToolParameterSchema) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Declare one top-level argument.
    pub fn param(mut self, name: impl Into<String>, schema: ToolParameterSchema, required: bool) -> Self {
        let name = name.into();
        if required && !self.required.contains(&name) {
            self.required.push(name.clone());
        }
        self.properties.insert(name, schema);
        self
    }

    /// Reject arguments that were not declared with [`ToolBuilder::param`].
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    fn schema(self) -> ToolSchema {
        let parameters = self.parameters.unwrap_or_else(|| {
            let input = ToolParameterSchema::object(
                format!("Arguments for {}", self.name),
                self.properties,
                self.required,
            );
            if self.strict {
                input.deny_unknown_properties()
            } else {
                input
            }
        });
        ToolSchema::new(self.name, self.description, parameters)
    }

    pub fn build_async<F, Fut>(self, handler: F) -> ToolBox
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler: AsyncToolFn = Arc::new(move |args| Box::pin(handler(args)));
        Arc::new(ClosureTool {
            schema: self.schema(),
            handler,
        })
    }

    /// Build from a synchronous handler. It runs on the calling task, so keep it short.
    pub fn build_sync<F>(self, handler: F) -> ToolBox
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        self.build_async(move |args| {
            let handler = Arc::clone(&handler);
            async move { handler(args) }
        })
    }
}

/// Async tool from a full parameter schema.
pub fn tool<F, Fut>(
    name: impl Into<String>,
    description: impl Into<String>,
    parameters: ToolParameterSchema,
    handler: F,
) -> ToolBox
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    ToolBuilder::new(name, description)
        .with_parameters(parameters)
        .build_async(handler)
}

pub fn tool_sync<F>(
    name: impl Into<String>,
    description: impl Into<String>,
    parameters: ToolParameterSchema,
    handler: F,
) -> ToolBox
where
    F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    ToolBuilder::new(name, description)
        .with_parameters(parameters)
        .build_sync(handler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatloop_core::error::AgentError;
    use chatloop_core::tools::ToolRegistry;
    use serde_json::json;

    #[tokio::test]
    async fn declared_params_become_the_schema() {
        let greet = ToolBuilder::new("greet", "Greets someone")
            .param("name", ToolParameterSchema::string("Who to greet"), true)
            .param("shout", ToolParameterSchema::boolean("Uppercase the greeting"), false)
            .strict()
            .build_async(|args| async move {
                let name = args["name"].as_str().unwrap_or("stranger");
                let greeting = format!("Hello, {name}!");
                Ok(json!(if args["shout"] == json!(true) {
                    greeting.to_uppercase()
                } else {
                    greeting
                }))
            });

        let schema = greet.schema();
        assert_eq!(schema.name, "greet");
        assert_eq!(schema.parameters.required, Some(vec!["name".to_string()]));

        let mut registry = ToolRegistry::new();
        registry.register(greet).unwrap();
        assert_eq!(
            registry
                .invoke("greet", json!({"name": "Ada", "shout": true}))
                .await
                .unwrap(),
            json!("HELLO, ADA!")
        );
        assert!(matches!(
            registry.invoke("greet", json!({"name": "Ada", "volume": 11})).await,
            Err(AgentError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn sync_tool_registers_and_validates() {
        let add = tool_sync(
            "add",
            "Adds two numbers",
            ToolParameterSchema::object(
                "Add parameters",
                [
                    ("a".to_string(), ToolParameterSchema::number("First number")),
                    ("b".to_string(), ToolParameterSchema::number("Second number")),
                ]
                .into_iter()
                .collect(),
                vec!["a".to_string(), "b".to_string()],
            ),
            |args| {
                let a = args["a"].as_f64().unwrap_or(0.0);
                let b = args["b"].as_f64().unwrap_or(0.0);
                Ok(json!(a + b))
            },
        );

        let mut registry = ToolRegistry::new();
        registry.register(add).unwrap();

        let sum = registry.invoke("add", json!({"a": 5, "b": 3})).await.unwrap();
        assert_eq!(sum, json!(8.0));
        assert!(registry.invoke("add", json!({"a": 5})).await.is_err());
    }
}
