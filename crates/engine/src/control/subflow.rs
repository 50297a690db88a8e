//! `Subflow` — runs a whole child workflow to completion on an isolated
//! globals map, in contrast to `Container`'s shared-globals inline
//! sub-graph.
//!
//! Reaches the engine the same way `Container` does: through
//! [`WorkflowRunContext::engine`], calling [`crate::executor::WorkflowEngine::start`]
//! again for the child run rather than re-implementing run orchestration.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use nodes::{CancelToken, Evaluator, ExecutionContext, NodeError, NodeSpec, Outcome};

use crate::context::{WorkflowRunContext, WorkflowStatus};
use crate::models::Workflow;

use super::ControlFlowNode;

pub struct SubflowNode {
    id: String,
    child_workflow: Workflow,
    input_mappings: HashMap<String, String>,
    output_mappings: HashMap<String, String>,
    timeout: Option<Duration>,
}

impl SubflowNode {
    pub fn new() -> Self {
        Self {
            id: String::new(),
            child_workflow: Workflow::new("uninitialized-subflow", Vec::new(), Vec::new()),
            input_mappings: HashMap::new(),
            output_mappings: HashMap::new(),
            timeout: None,
        }
    }
}

#[async_trait]
impl ControlFlowNode for SubflowNode {
    fn initialize(&mut self, spec: &NodeSpec) -> Result<(), NodeError> {
        self.id = spec.id.clone();

        if spec.config.get("workflowFilePath").is_some() {
            return Err(NodeError::Fatal(
                "'workflowFilePath' is not supported; provide an inline 'workflow' definition".into(),
            ));
        }
        let raw_workflow = spec
            .config
            .get("workflow")
            .ok_or_else(|| NodeError::Fatal("missing required configuration field 'workflow'".into()))?;
        self.child_workflow = serde_json::from_value(raw_workflow.clone())
            .map_err(|err| NodeError::Fatal(format!("invalid 'workflow' definition: {err}")))?;

        self.input_mappings = spec
            .config
            .get("inputMappings")
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(|err| NodeError::Fatal(format!("invalid 'inputMappings': {err}")))?
            .unwrap_or_default();
        self.output_mappings = spec
            .config
            .get("outputMappings")
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(|err| NodeError::Fatal(format!("invalid 'outputMappings': {err}")))?
            .unwrap_or_default();

        if let Some(secs) = spec.config.get("timeout").and_then(Value::as_u64) {
            self.timeout = Some(Duration::from_secs(secs));
        }

        Ok(())
    }

    async fn execute(
        &self,
        run: &WorkflowRunContext,
        ctx: &ExecutionContext,
        _evaluator: &dyn Evaluator,
        cancel: &CancelToken,
    ) -> Result<Outcome, NodeError> {
        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled("cancelled before child workflow started".into()));
        }

        // Isolated: the child sees only what's explicitly mapped in, never
        // the parent's wider globals (spec.md §4.5 Subflow).
        let mut child_globals = HashMap::new();
        for (parent_key, child_key) in &self.input_mappings {
            if let Some(value) = ctx.get_global(parent_key) {
                child_globals.insert(child_key.clone(), value);
            }
        }

        let child_run = run
            .engine
            .start(&self.child_workflow, Some(child_globals), self.timeout)
            .await
            .map_err(|err| NodeError::Fatal(format!("failed to start child workflow: {err}")))?;

        for (child_key, parent_key) in &self.output_mappings {
            if let Some(value) = child_run.globals.get(child_key) {
                ctx.set_global(parent_key.clone(), value);
            }
        }

        match child_run.status() {
            WorkflowStatus::Completed => Ok(Outcome::Completed),
            WorkflowStatus::Cancelled => Ok(Outcome::Cancelled("child workflow was cancelled".into())),
            WorkflowStatus::Failed | WorkflowStatus::TimedOut => {
                let detail = child_run.aggregate_node_errors();
                let message = if detail.is_empty() { "child workflow failed".to_string() } else { detail };
                ctx.set_output("ChildErrors", Value::String(message.clone()));
                Ok(Outcome::Failed(message))
            }
            WorkflowStatus::Running => Ok(Outcome::Failed("child workflow did not terminate".into())),
        }
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

    fn child_workflow_json(script: &str) -> Value {
        json!({
            "id": Uuid::new_v4(),
            "name": "child",
            "nodes": [
                { "id": "only", "name": "only", "runtime_type": "Script", "config": { "script": script } },
            ],
            "connections": [],
            "created_at": chrono::Utc::now(),
        })
    }

    #[tokio::test]
    async fn a_completed_child_completes_the_subflow() {
        let mut node = SubflowNode::new();
        node.initialize(&make_spec(
            "sub",
            json!({
                "workflow": child_workflow_json("true"),
                "inputMappings": {},
                "outputMappings": {},
            }),
        ))
        .unwrap();

        let globals = Globals::new();
        let run = empty_run_context(globals.clone());
        let c = ctx(globals);
        let outcome = node.execute(&run, &c, &JsonPathEvaluator, &CancelToken::new()).await.unwrap();
        assert_eq!(outcome, Outcome::Completed);
    }

    #[tokio::test]
    async fn a_failing_child_fails_the_subflow_with_aggregated_detail() {
        let mut node = SubflowNode::new();
        node.initialize(&make_spec(
            "sub",
            json!({
                "workflow": child_workflow_json("ghost_variable"),
                "inputMappings": {},
                "outputMappings": {},
            }),
        ))
        .unwrap();

        let globals = Globals::new();
        let run = empty_run_context(globals.clone());
        let c = ctx(globals);
        let outcome = node.execute(&run, &c, &JsonPathEvaluator, &CancelToken::new()).await.unwrap();
        match outcome {
            Outcome::Failed(msg) => assert!(msg.contains("only")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn input_and_output_mappings_project_across_the_boundary() {
        let mut node = SubflowNode::new();
        node.initialize(&make_spec(
            "sub",
            json!({
                "workflow": child_workflow_json("seed"),
                "inputMappings": { "parentSeed": "seed" },
                "outputMappings": {},
            }),
        ))
        .unwrap();

        let globals = Globals::new();
        globals.set("parentSeed", json!(42));
        let run = empty_run_context(globals.clone());
        let c = ctx(globals);
        let outcome = node.execute(&run, &c, &JsonPathEvaluator, &CancelToken::new()).await.unwrap();
        assert_eq!(outcome, Outcome::Completed);
    }

    #[test]
    fn a_file_path_reference_is_rejected_at_initialize() {
        let mut node = SubflowNode::new();
        let err = node
            .initialize(&make_spec("sub", json!({ "workflowFilePath": "./child.json" })))
            .unwrap_err();
        assert!(matches!(err, NodeError::Fatal(_)));
    }
}
