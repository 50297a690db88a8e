//! `IfElse` — evaluate a condition and branch on one of two ports.

use async_trait::async_trait;
use serde_json::Value;

use nodes::{CancelToken, Evaluator, ExecutionContext, NodeError, NodeSpec, Outcome};

use crate::context::WorkflowRunContext;

use super::{eval_err_to_node_err, ControlFlowNode};

pub struct IfElseNode {
    condition: String,
}

impl IfElseNode {
    pub fn new() -> Self {
        Self { condition: String::new() }
    }
}

#[async_trait]
impl ControlFlowNode for IfElseNode {
    fn initialize(&mut self, spec: &NodeSpec) -> Result<(), NodeError> {
        self.condition = spec
            .config
            .get("condition")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::Fatal("missing required configuration field 'condition'".into()))?
            .to_string();
        Ok(())
    }

    async fn execute(
        &self,
        _run: &WorkflowRunContext,
        ctx: &ExecutionContext,
        evaluator: &dyn Evaluator,
        cancel: &CancelToken,
    ) -> Result<Outcome, NodeError> {
        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled("cancelled before evaluation".into()));
        }

        let value = evaluator
            .evaluate(&self.condition, ctx)
            .await
            .map_err(eval_err_to_node_err)?;
        let truthy = value.as_bool().unwrap_or_else(|| !value.is_null());
        let branch = if truthy { "TrueBranch" } else { "FalseBranch" };

        ctx.set_output("ConditionResult", Value::Bool(truthy));
        ctx.set_output("BranchTaken", Value::String(branch.to_string()));
        ctx.set_source_port(branch);
        Ok(Outcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{empty_run_context, make_spec};
    use nodes::{Globals, JsonPathEvaluator};
    use serde_json::json;
    use uuid::Uuid;

    fn ctx(globals: Globals) -> ExecutionContext {
        ExecutionContext::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), globals, Value::Null)
    }

    #[tokio::test]
    async fn true_branch_sets_true_port() {
        let mut node = IfElseNode::new();
        node.initialize(&make_spec("n1", json!({ "condition": "count > 10" }))).unwrap();
        let globals = Globals::new();
        globals.set("count", json!(20));
        let c = ctx(globals.clone());
        let run = empty_run_context(globals);
        let outcome = node.execute(&run, &c, &JsonPathEvaluator, &CancelToken::new()).await.unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(c.source_port(), Some("TrueBranch".to_string()));
        assert_eq!(c.get_output("BranchTaken"), Some(json!("TrueBranch")));
    }

    #[tokio::test]
    async fn false_branch_sets_false_port() {
        let mut node = IfElseNode::new();
        node.initialize(&make_spec("n1", json!({ "condition": "count > 10" }))).unwrap();
        let globals = Globals::new();
        globals.set("count", json!(1));
        let c = ctx(globals.clone());
        let run = empty_run_context(globals);
        let outcome = node.execute(&run, &c, &JsonPathEvaluator, &CancelToken::new()).await.unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(c.source_port(), Some("FalseBranch".to_string()));
    }
}
