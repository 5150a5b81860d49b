//! Arithmetic calculator tool.
//!
//! Expressions are evaluated by `meval`, a pure expression evaluator: no code is executed.

use anyhow::Context;
use async_trait::async_trait;
use chatloop_core::tools::{Tool, ToolParameterSchema, ToolSchema};
use serde_json::{json, Value};

pub const CALCULATOR_TOOL_NAME: &str = "calculator";

const MAX_EXPRESSION_LEN: usize = 256;

/// Largest magnitude at which every integer is exactly representable as `f64`.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct Calculator;

impl Calculator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate `expression` to a JSON number. Integral results come back as integers.
    pub fn evaluate(&self, expression: &str) -> anyhow::Result<Value> {
        let expression = expression.trim();
        if expression.is_empty() {
            anyhow::bail!("expression must not be empty");
        }
        if expression.len() > MAX_EXPRESSION_LEN {
            anyhow::bail!(
                "expression is too long ({} characters, limit {MAX_EXPRESSION_LEN})",
                expression.len()
            );
        }

        let result = meval::eval_str(expression)
            .with_context(|| format!("failed to evaluate expression '{expression}'"))?;

        if result.is_nan() {
            anyhow::bail!("'{expression}' is undefined (not a real number)");
        }
        if result.is_infinite() {
            if expression.contains('/') || expression.contains('%') {
                anyhow::bail!("division by zero in '{expression}'");
            }
            anyhow::bail!("'{expression}' does not evaluate to a finite number");
        }

        if result.fract() == 0.0 && result.abs() < MAX_EXACT_INTEGER {
            Ok(json!(result as i64))
        } else {
            Ok(json!(result))
        }
    }
}

#[async_trait]
impl Tool for Calculator {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            CALCULATOR_TOOL_NAME,
            "Evaluate an arithmetic expression such as '12*7' or '(3 + 4) / 2'. \
             Supports + - * / % ^, parentheses and common functions like sqrt.",
            ToolParameterSchema::object(
                "Calculator input",
                [(
                    "expression".to_string(),
                    ToolParameterSchema::string("The arithmetic expression to evaluate"),
                )]
                .into_iter()
                .collect(),
                vec!["expression".to_string()],
            )
            .deny_unknown_properties(),
        )
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let expression = args
            .get("expression")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("calculator requires 'expression' string argument"))?;

        tracing::debug!(%expression, "evaluating expression");
        self.evaluate(expression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatloop_core::error::AgentError;
    use chatloop_core::tools::ToolRegistry;
    use std::sync::Arc;

    #[test]
    fn integral_results_are_integers() {
        let calc = Calculator::new();
        assert_eq!(calc.evaluate("12*7").unwrap(), json!(84));
        assert_eq!(calc.evaluate(" (3 + 4) * 2 ").unwrap(), json!(14));
        assert_eq!(calc.evaluate("7/2").unwrap(), json!(3.5));
    }

    #[test]
    fn division_by_zero_is_a_deterministic_error() {
        let err = Calculator::new().evaluate("2/0").unwrap_err();
        assert!(err.to_string().contains("division by zero"), "{err}");
    }

    #[test]
    fn undefined_results_are_not_called_division_by_zero() {
        let err = Calculator::new().evaluate("(-8)^(1/3)").unwrap_err();
        assert!(err.to_string().contains("not a real number"), "{err}");
        assert!(!err.to_string().contains("division by zero"), "{err}");
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        let calc = Calculator::new();
        assert!(calc.evaluate("12 *").is_err());
        assert!(calc.evaluate("").is_err());
        assert!(calc.evaluate(&"1+".repeat(200)).is_err());
    }

    #[tokio::test]
    async fn registry_validates_calculator_arguments() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Calculator::new())).unwrap();

        let out = registry
            .invoke(CALCULATOR_TOOL_NAME, json!({"expression": "12*7"}))
            .await
            .unwrap();
        assert_eq!(out, json!(84));

        let err = registry
            .invoke(CALCULATOR_TOOL_NAME, json!({"expr": "12*7"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation { .. }));

        let err = registry
            .invoke(CALCULATOR_TOOL_NAME, json!({"expression": "2/0"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolExecution { .. }));
    }
}
