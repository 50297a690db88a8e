//! The `Evaluator` abstraction — script/expression execution is an external
//! collaborator of this engine, not part of its core. The engine and the
//! built-in condition/expression-driven nodes (`IfElse`, `Switch`,
//! `ForEach`, `While`) only ever see this trait; which backend actually
//! parses and runs source text is a detail for whoever constructs a node.
//!
//! This crate ships exactly one concrete evaluator, [`JsonPathEvaluator`],
//! which understands just enough of a comparison-expression grammar to make
//! every scenario in the specification runnable without a real scripting
//! language plugged in. It is not a contract any production caller should
//! depend on.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::traits::ExecutionContext;

#[derive(Debug, Error, Clone)]
pub enum EvalError {
    #[error("expression failed to compile: {0}")]
    Compilation(String),

    #[error("expression raised at evaluation: {0}")]
    Runtime(String),
}

/// Evaluate source text against a binding context and return a value or
/// raise. The binding context is the node's own [`ExecutionContext`], which
/// already exposes `get_input`/`set_output`/`get_global`/`set_global`/`local`.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, source: &str, ctx: &ExecutionContext) -> Result<Value, EvalError>;
}

/// A minimal evaluator over a comparison-expression grammar:
///
/// - JSON literals (`true`, `false`, `42`, `"text"`, `[1,2,3]`, `null`).
/// - Bare identifiers, resolved in order against `local`, then `global`,
///   then `input` (dotted paths allowed, e.g. `order.total`).
/// - Binary comparisons `==`, `!=`, `>=`, `<=`, `>`, `<` between two such
///   operands, e.g. `"count > 100"`.
///
/// Anything else is a [`EvalError::Compilation`] — this evaluator does not
/// pretend to be a general-purpose expression language.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonPathEvaluator;

const OPERATORS: &[&str] = &["==", "!=", ">=", "<=", ">", "<"];

#[async_trait]
impl Evaluator for JsonPathEvaluator {
    async fn evaluate(&self, source: &str, ctx: &ExecutionContext) -> Result<Value, EvalError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(EvalError::Compilation("empty expression".into()));
        }

        for op in OPERATORS {
            if let Some(pos) = find_operator(trimmed, op) {
                let (lhs, rhs) = trimmed.split_at(pos);
                let rhs = &rhs[op.len()..];
                let lhs_val = resolve_operand(lhs.trim(), ctx)?;
                let rhs_val = resolve_operand(rhs.trim(), ctx)?;
                return compare(op, &lhs_val, &rhs_val);
            }
        }

        resolve_operand(trimmed, ctx)
    }
}

/// Find the first top-level occurrence of `op`, skipping over content inside
/// single/double quotes so `"a==b"` style string literals aren't split.
fn find_operator(source: &str, op: &str) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut in_quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match in_quote {
            Some(q) if b == q => in_quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => in_quote = Some(b),
            None if source[i..].starts_with(op) => return Some(i),
            None => {}
        }
        i += 1;
    }
    None
}

fn resolve_operand(token: &str, ctx: &ExecutionContext) -> Result<Value, EvalError> {
    if let Ok(v) = serde_json::from_str::<Value>(token) {
        return Ok(v);
    }
    if let Some(v) = ctx.local(token) {
        return Ok(v);
    }
    if let Some(v) = ctx.get_global(token) {
        return Ok(v);
    }
    if let Some(v) = ctx.get_input(token) {
        return Ok(v);
    }
    Err(EvalError::Runtime(format!("undefined variable '{token}'")))
}

fn compare(op: &str, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
    match op {
        "==" => Ok(Value::Bool(lhs == rhs)),
        "!=" => Ok(Value::Bool(lhs != rhs)),
        ">" | "<" | ">=" | "<=" => {
            let (l, r) = (as_f64(lhs), as_f64(rhs));
            match (l, r) {
                (Some(l), Some(r)) => {
                    let result = match op {
                        ">" => l > r,
                        "<" => l < r,
                        ">=" => l >= r,
                        "<=" => l <= r,
                        _ => unreachable!(),
                    };
                    Ok(Value::Bool(result))
                }
                _ => Err(EvalError::Runtime(format!(
                    "cannot compare non-numeric operands with '{op}'"
                ))),
            }
        }
        other => Err(EvalError::Compilation(format!("unknown operator '{other}'"))),
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    v.as_f64()
}

/// Coerce any JSON value to the string representation the `Switch` node
/// compares against its case labels.
pub fn to_plain_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globals::Globals;
    use serde_json::json;
    use uuid::Uuid;

    fn ctx_with_global(key: &str, value: Value) -> ExecutionContext {
        let globals = Globals::new();
        globals.set(key, value);
        ExecutionContext::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), globals, Value::Null)
    }

    #[tokio::test]
    async fn numeric_comparison_against_global() {
        let ctx = ctx_with_global("count", json!(150));
        let result = JsonPathEvaluator.evaluate("count>100", &ctx).await.unwrap();
        assert_eq!(result, json!(true));
    }

    #[tokio::test]
    async fn less_than_with_spaces() {
        let ctx = ctx_with_global("counter", json!(3));
        let result = JsonPathEvaluator.evaluate("counter < 5", &ctx).await.unwrap();
        assert_eq!(result, json!(true));
    }

    #[tokio::test]
    async fn boolean_literal() {
        let ctx = ctx_with_global("x", json!(1));
        let result = JsonPathEvaluator.evaluate("true", &ctx).await.unwrap();
        assert_eq!(result, json!(true));
    }

    #[tokio::test]
    async fn array_literal_for_collections() {
        let ctx = ctx_with_global("x", json!(1));
        let result = JsonPathEvaluator
            .evaluate(r#"["a","b","c"]"#, &ctx)
            .await
            .unwrap();
        assert_eq!(result, json!(["a", "b", "c"]));
    }

    #[tokio::test]
    async fn undefined_variable_is_runtime_error() {
        let ctx = ctx_with_global("x", json!(1));
        let err = JsonPathEvaluator.evaluate("ghost", &ctx).await.unwrap_err();
        assert!(matches!(err, EvalError::Runtime(_)));
    }

    #[test]
    fn plain_string_coercion() {
        assert_eq!(to_plain_string(&json!("gold")), "gold");
        assert_eq!(to_plain_string(&json!(42)), "42");
        assert_eq!(to_plain_string(&json!(true)), "true");
    }
}
