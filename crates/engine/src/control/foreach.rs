//! `ForEach` — fan out one `Next` message per collection element, then
//! complete once every element has been handed to the router.
//!
//! Unlike `IfElse`/`Switch`, which only set `SourcePort` on their own
//! terminal outcome, `ForEach` reaches past its own outcome: each iteration
//! produces an auxiliary `Next` envelope that the node hands directly to the
//! router (see [`super::ControlFlowNode`]), carrying the loop body's item and
//! index. The node's own `Complete` only fires after every element has been
//! routed.

use async_trait::async_trait;
use serde_json::Value;

use nodes::{CancelToken, Evaluator, ExecutionContext, NodeError, NodeSpec, Outcome};

use crate::context::WorkflowRunContext;
use crate::message::Envelope;
use crate::models::MessageKind;

use super::{eval_err_to_node_err, ControlFlowNode};

pub const LOOP_BODY_PORT: &str = "LoopBody";
const DEFAULT_ITEM_VAR: &str = "item";

pub struct ForEachNode {
    id: String,
    collection_expression: String,
    item_variable_name: String,
}

impl ForEachNode {
    pub fn new() -> Self {
        Self {
            id: String::new(),
            collection_expression: String::new(),
            item_variable_name: DEFAULT_ITEM_VAR.to_string(),
        }
    }
}

#[async_trait]
impl ControlFlowNode for ForEachNode {
    fn initialize(&mut self, spec: &NodeSpec) -> Result<(), NodeError> {
        self.id = spec.id.clone();
        self.collection_expression = spec
            .config
            .get("collectionExpression")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::Fatal("missing required configuration field 'collectionExpression'".into()))?
            .to_string();
        if let Some(name) = spec.config.get("itemVariableName").and_then(Value::as_str) {
            self.item_variable_name = name.to_string();
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

        let collection = evaluator
            .evaluate(&self.collection_expression, ctx)
            .await
            .map_err(eval_err_to_node_err)?;

        let items = match collection {
            Value::Array(items) => items,
            Value::Null => return Ok(Outcome::Failed("collection expression evaluated to null".into())),
            other => {
                return Ok(Outcome::Failed(format!(
                    "collection expression did not evaluate to an array: {other}"
                )))
            }
        };

        let index_var = format!("{}Index", self.item_variable_name);

        for (index, item) in items.iter().enumerate() {
            if cancel.is_cancelled() {
                return Ok(Outcome::Cancelled("cancelled mid-iteration".into()));
            }

            // Deliberately not written to globals: a shared key would race
            // across concurrently-running loop-body invocations (one body
            // could read the next iteration's item before finishing its
            // own). Each body sees its own item/index only through the
            // routed envelope's output, which becomes that invocation's own
            // `input` — scoped per invocation, not per run.
            let mut output = serde_json::Map::new();
            output.insert(self.item_variable_name.clone(), item.clone());
            output.insert(index_var.clone(), Value::from(index));

            let envelope = Envelope::new(
                MessageKind::Next,
                self.id.clone(),
                Some(LOOP_BODY_PORT.to_string()),
                Some(Value::Object(output)),
            );
            run.router
                .route(&envelope, &run.queues, evaluator, &run.globals, run.workflow_id, run.run_id)
                .await;
        }

        ctx.set_output("ItemsProcessed", Value::from(items.len()));
        ctx.set_output("TotalItems", Value::from(items.len()));
        Ok(Outcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{make_spec, run_context_with_queues};
    use nodes::{Globals, JsonPathEvaluator};
    use serde_json::json;
    use uuid::Uuid;

    fn ctx(globals: Globals, input: Value) -> ExecutionContext {
        ExecutionContext::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), globals, input)
    }

    #[tokio::test]
    async fn fans_out_one_message_per_item() {
        let mut node = ForEachNode::new();
        node.initialize(&make_spec("loop", json!({ "collectionExpression": "items" })))
            .unwrap();

        let globals = Globals::new();
        let run = run_context_with_queues(
            globals.clone(),
            &["body"],
            vec![crate::models::Connection::new("loop", "body")
                .with_kind(MessageKind::Next)
                .with_source_port(LOOP_BODY_PORT)],
        );
        let c = ctx(globals.clone(), json!({ "items": ["a", "b", "c"] }));

        let outcome = node.execute(&run, &c, &JsonPathEvaluator, &CancelToken::new()).await.unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(c.get_output("ItemsProcessed"), Some(json!(3)));

        let body_queue = run.queue_for("body").unwrap();
        for expected in ["a", "b", "c"] {
            let lease = body_queue.lease(&CancelToken::new(), std::time::Duration::from_millis(50)).await.unwrap();
            assert_eq!(lease.envelope.output.unwrap()["item"], json!(expected));
        }
    }

    #[tokio::test]
    async fn empty_collection_completes_with_zero_items() {
        let mut node = ForEachNode::new();
        node.initialize(&make_spec("loop", json!({ "collectionExpression": "items" })))
            .unwrap();
        let globals = Globals::new();
        let run = run_context_with_queues(globals.clone(), &["body"], vec![]);
        let c = ctx(globals, json!({ "items": [] }));

        let outcome = node.execute(&run, &c, &JsonPathEvaluator, &CancelToken::new()).await.unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(c.get_output("ItemsProcessed"), Some(json!(0)));
    }

    #[tokio::test]
    async fn non_array_collection_fails() {
        let mut node = ForEachNode::new();
        node.initialize(&make_spec("loop", json!({ "collectionExpression": "items" })))
            .unwrap();
        let globals = Globals::new();
        let run = run_context_with_queues(globals.clone(), &[], vec![]);
        let c = ctx(globals, json!({ "items": 5 }));

        let outcome = node.execute(&run, &c, &JsonPathEvaluator, &CancelToken::new()).await.unwrap();
        assert!(matches!(outcome, Outcome::Failed(_)));
    }
}
