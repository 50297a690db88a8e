//! `Switch` — evaluate an expression, route on the matching case label.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use nodes::{to_plain_string, CancelToken, Evaluator, ExecutionContext, NodeError, NodeSpec, Outcome};

use crate::context::WorkflowRunContext;

use super::{eval_err_to_node_err, ControlFlowNode};

pub struct SwitchNode {
    expression: String,
    cases: HashMap<String, String>,
}

impl SwitchNode {
    pub fn new() -> Self {
        Self {
            expression: String::new(),
            cases: HashMap::new(),
        }
    }
}

#[async_trait]
impl ControlFlowNode for SwitchNode {
    fn initialize(&mut self, spec: &NodeSpec) -> Result<(), NodeError> {
        self.expression = spec
            .config
            .get("expression")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::Fatal("missing required configuration field 'expression'".into()))?
            .to_string();

        let cases = spec
            .config
            .get("cases")
            .and_then(Value::as_object)
            .ok_or_else(|| NodeError::Fatal("missing required configuration field 'cases'".into()))?;
        self.cases = cases
            .iter()
            .map(|(label, port)| (label.clone(), port.as_str().unwrap_or(label).to_string()))
            .collect();
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
            .evaluate(&self.expression, ctx)
            .await
            .map_err(eval_err_to_node_err)?;
        let label = to_plain_string(&value);

        let (matched_case, port) = match self.cases.get(&label) {
            Some(port) => (Value::String(label), port.clone()),
            None => (Value::Null, "Default".to_string()),
        };

        ctx.set_output("ExpressionResult", value);
        ctx.set_output("MatchedCase", matched_case);
        ctx.set_output("PortSelected", Value::String(port.clone()));
        ctx.set_source_port(port);
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
    async fn matches_a_configured_case() {
        let mut node = SwitchNode::new();
        node.initialize(&make_spec(
            "n1",
            json!({ "expression": "tier", "cases": { "gold": "GoldPort", "silver": "SilverPort" } }),
        ))
        .unwrap();
        let globals = Globals::new();
        globals.set("tier", json!("gold"));
        let c = ctx(globals.clone());
        let run = empty_run_context(globals);
        let outcome = node.execute(&run, &c, &JsonPathEvaluator, &CancelToken::new()).await.unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(c.source_port(), Some("GoldPort".to_string()));
        assert_eq!(c.get_output("MatchedCase"), Some(json!("gold")));
    }

    #[tokio::test]
    async fn falls_back_to_default_port_when_no_case_matches() {
        let mut node = SwitchNode::new();
        node.initialize(&make_spec(
            "n1",
            json!({ "expression": "tier", "cases": { "gold": "GoldPort" } }),
        ))
        .unwrap();
        let globals = Globals::new();
        globals.set("tier", json!("bronze"));
        let c = ctx(globals.clone());
        let run = empty_run_context(globals);
        let outcome = node.execute(&run, &c, &JsonPathEvaluator, &CancelToken::new()).await.unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(c.source_port(), Some("Default".to_string()));
        assert_eq!(c.get_output("MatchedCase"), Some(Value::Null));
        assert_eq!(c.get_output("PortSelected"), Some(json!("Default")));
    }
}
