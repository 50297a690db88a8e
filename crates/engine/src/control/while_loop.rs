//! `While` — a feedback-loop control node. Unlike `ForEach`, which knows its
//! whole collection up front, `While` is re-entered once per iteration: the
//! loop body routes its own `Complete` back onto this node (a cycle the
//! validator special-cases, see [`crate::validator`]), and each re-entry is a
//! fresh consumer turn that calls [`WhileNode::execute`] again.
//!
//! The iteration counter therefore cannot live in the node's own
//! [`nodes::ExecutionContext`] — that's fresh per invocation. It lives in the
//! run's globals, keyed by this node's id (stable across every turn of one
//! run), under a reserved key so it never collides with a workflow author's
//! own globals.

use async_trait::async_trait;
use serde_json::Value;

use nodes::{CancelToken, Evaluator, ExecutionContext, NodeError, NodeSpec, Outcome};

use crate::context::WorkflowRunContext;
use crate::message::Envelope;
use crate::models::MessageKind;

use super::{eval_err_to_node_err, ControlFlowNode};

pub const LOOP_BODY_PORT: &str = "LoopBody";
/// Sentinel `SourcePort` set on the node's own `Complete` while the loop is
/// still running. Downstream connections must never trigger on
/// `Complete` + this port — see `validator::check_while_sentinel_ports`.
pub const ITERATION_CHECK_PORT: &str = "IterationCheck";
const DEFAULT_MAX_ITERATIONS: u64 = 1000;

fn counter_key(node_id: &str) -> String {
    format!("__while_counter_{node_id}")
}

pub struct WhileNode {
    id: String,
    condition: String,
    max_iterations: u64,
}

impl WhileNode {
    pub fn new() -> Self {
        Self {
            id: String::new(),
            condition: String::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

#[async_trait]
impl ControlFlowNode for WhileNode {
    fn initialize(&mut self, spec: &NodeSpec) -> Result<(), NodeError> {
        self.id = spec.id.clone();
        self.condition = spec
            .config
            .get("condition")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::Fatal("missing required configuration field 'condition'".into()))?
            .to_string();
        if let Some(max) = spec.config.get("maxIterations").and_then(Value::as_u64) {
            self.max_iterations = max;
        }
        Ok(())
    }

    async fn execute(
        &self,
        run: &WorkflowRunContext,
        ctx: &ExecutionContext,
        evaluator: &dyn Evaluator,
        cancel: &CancelToken,
    ) -> Result<Outcome, NodeError> {
        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled("cancelled before evaluation".into()));
        }

        let key = counter_key(&self.id);
        let counter = ctx.get_global(&key).and_then(|v| v.as_u64()).unwrap_or(0);

        if counter >= self.max_iterations {
            ctx.set_global(key, Value::from(0u64));
            return Ok(Outcome::Failed(format!(
                "maximum iterations exceeded (limit {})",
                self.max_iterations
            )));
        }

        let value = evaluator
            .evaluate(&self.condition, ctx)
            .await
            .map_err(eval_err_to_node_err)?;
        let condition_result = match value.as_bool() {
            Some(b) => b,
            None => return Ok(Outcome::Failed(format!("condition did not evaluate to a boolean: {value}"))),
        };

        if condition_result {
            let next_counter = counter + 1;
            ctx.set_global(key, Value::from(next_counter));

            let envelope = Envelope::new(
                MessageKind::Next,
                self.id.clone(),
                Some(LOOP_BODY_PORT.to_string()),
                Some(serde_json::json!({ "iterationIndex": counter })),
            );
            run.router
                .route(&envelope, &run.queues, evaluator, &run.globals, run.workflow_id, run.run_id)
                .await;

            ctx.set_source_port(ITERATION_CHECK_PORT);
            Ok(Outcome::Completed)
        } else {
            ctx.set_global(key, Value::from(0u64));
            ctx.set_output("IterationCount", Value::from(counter));
            ctx.set_source_port(LOOP_BODY_PORT);
            Ok(Outcome::Completed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{make_spec, run_context_with_queues};
    use nodes::{Globals, JsonPathEvaluator};
    use serde_json::json;
    use uuid::Uuid;

    fn ctx(globals: Globals) -> ExecutionContext {
        ExecutionContext::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), globals, Value::Null)
    }

    #[tokio::test]
    async fn emits_loop_body_while_condition_holds() {
        let mut node = WhileNode::new();
        node.initialize(&make_spec("loop", json!({ "condition": "counter < 3" }))).unwrap();
        let globals = Globals::new();
        globals.set("counter", json!(0));
        let run = run_context_with_queues(
            globals.clone(),
            &["body"],
            vec![crate::models::Connection::new("loop", "body")
                .with_kind(MessageKind::Next)
                .with_source_port(LOOP_BODY_PORT)],
        );
        let c = ctx(globals);

        let outcome = node.execute(&run, &c, &JsonPathEvaluator, &CancelToken::new()).await.unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(c.source_port(), Some(ITERATION_CHECK_PORT.to_string()));
        assert!(run.queue_for("body").unwrap().lease(&CancelToken::new(), std::time::Duration::from_millis(50)).await.is_some());
    }

    #[tokio::test]
    async fn exits_loop_body_port_when_condition_becomes_false() {
        let mut node = WhileNode::new();
        node.initialize(&make_spec("loop", json!({ "condition": "counter < 0" }))).unwrap();
        let globals = Globals::new();
        globals.set("counter", json!(0));
        let run = run_context_with_queues(globals.clone(), &[], vec![]);
        let c = ctx(globals);

        let outcome = node.execute(&run, &c, &JsonPathEvaluator, &CancelToken::new()).await.unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(c.source_port(), Some(LOOP_BODY_PORT.to_string()));
        assert_eq!(c.get_output("IterationCount"), Some(json!(0)));
    }

    #[tokio::test]
    async fn exceeding_max_iterations_fails() {
        let mut node = WhileNode::new();
        node.initialize(&make_spec("loop", json!({ "condition": "true", "maxIterations": 2 }))).unwrap();
        let globals = Globals::new();
        globals.set(counter_key("loop"), json!(2));
        let run = run_context_with_queues(globals.clone(), &[], vec![]);
        let c = ctx(globals.clone());

        let outcome = node.execute(&run, &c, &JsonPathEvaluator, &CancelToken::new()).await.unwrap();
        assert!(matches!(outcome, Outcome::Failed(msg) if msg.contains("maximum iterations")));
        assert_eq!(globals.get(&counter_key("loop")), Some(json!(0)));
    }
}
