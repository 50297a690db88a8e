//! `ScriptNode` — the leaf "Script"/"Task" work node.
//!
//! Evaluates user-supplied source text against the node's own
//! [`ExecutionContext`] (used here as the binding context) through a
//! pluggable [`Evaluator`]. Compilation errors and runtime errors are both
//! contained: they fail the node, never the engine, matching the
//! error-containment policy in the spec.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::eval::{EvalError, Evaluator};
use crate::traits::{ExecutionContext, NodeSpec};
use crate::{ExecutableNode, NodeError, Outcome};

pub struct ScriptNode {
    name: String,
    script: Option<String>,
    evaluator: Arc<dyn Evaluator>,
}

impl ScriptNode {
    pub fn new(evaluator: Arc<dyn Evaluator>) -> Self {
        Self {
            name: String::new(),
            script: None,
            evaluator,
        }
    }
}

#[async_trait]
impl ExecutableNode for ScriptNode {
    fn initialize(&mut self, spec: &NodeSpec) -> Result<(), NodeError> {
        self.name = spec.name.clone();
        let script = spec
            .config
            .get("script")
            .and_then(Value::as_str)
            .map(str::to_owned);

        self.script = match script {
            Some(s) => Some(s),
            None if spec.config.get("scriptPath").is_some() => {
                return Err(NodeError::Fatal(
                    "scriptPath loading is out of scope for this engine; provide an inline 'script'"
                        .to_string(),
                ));
            }
            None => {
                return Err(NodeError::Fatal(
                    "missing required configuration field 'script'".to_string(),
                ))
            }
        };
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext, cancel: &CancelToken) -> Result<Outcome, NodeError> {
        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled("cancelled before execution".to_string()));
        }

        let script = self
            .script
            .as_deref()
            .ok_or_else(|| NodeError::Fatal("node was never initialized".to_string()))?;

        match self.evaluator.evaluate(script, ctx).await {
            Ok(value) => {
                ctx.set_output("result", value);
                Ok(Outcome::Completed)
            }
            Err(EvalError::Compilation(msg)) => {
                Err(NodeError::Fatal(format!("compilation error: {msg}")))
            }
            Err(EvalError::Runtime(msg)) => Err(NodeError::Fatal(format!("runtime error: {msg}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::JsonPathEvaluator;
    use crate::globals::Globals;
    use serde_json::json;
    use uuid::Uuid;

    fn make_node(script: &str) -> ScriptNode {
        let mut node = ScriptNode::new(Arc::new(JsonPathEvaluator));
        node.initialize(&NodeSpec {
            id: "n1".into(),
            name: "n1".into(),
            config: json!({ "script": script }),
        })
        .unwrap();
        node
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Globals::new(), Value::Null)
    }

    #[tokio::test]
    async fn evaluates_literal_and_sets_result() {
        let node = make_node("true");
        let c = ctx();
        let outcome = node.execute(&c, &CancelToken::new()).await.unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(c.get_output("result"), Some(json!(true)));
    }

    #[tokio::test]
    async fn runtime_error_fails_the_node() {
        let node = make_node("ghost_variable");
        let c = ctx();
        let err = node.execute(&c, &CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, NodeError::Fatal(_)));
    }

    #[test]
    fn missing_script_field_fails_initialize() {
        let mut node = ScriptNode::new(Arc::new(JsonPathEvaluator));
        let err = node
            .initialize(&NodeSpec { id: "n1".into(), name: "n1".into(), config: json!({}) })
            .unwrap_err();
        assert!(matches!(err, NodeError::Fatal(_)));
    }
}
