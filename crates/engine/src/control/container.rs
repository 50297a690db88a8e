//! `Container` — an inline sub-graph that shares the parent's globals.
//!
//! Behaves like a `Subflow` whose child graph runs in the *same* globals
//! map instead of an isolated one: children are driven by the same
//! consumer-loop/router/queue machinery as the top-level engine, just
//! scoped to the container's own node list via
//! [`WorkflowRunContext::with_subgraph`].

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::Value;

use nodes::{CancelToken, Evaluator, ExecutionContext, NodeError, NodeSpec, Outcome};

use crate::buffer::CircularMessageBuffer;
use crate::context::WorkflowRunContext;
use crate::executor::entry_points;
use crate::instance::NodeInstanceStatus;
use crate::models::{Connection, NodeDefinition};
use crate::queue::NodeMessageQueue;
use crate::router::MessageRouter;

use super::ControlFlowNode;

pub struct ContainerNode {
    id: String,
    child_nodes: Vec<NodeDefinition>,
    child_connections: Vec<Connection>,
}

impl ContainerNode {
    pub fn new() -> Self {
        Self {
            id: String::new(),
            child_nodes: Vec::new(),
            child_connections: Vec::new(),
        }
    }
}

#[async_trait]
impl ControlFlowNode for ContainerNode {
    fn initialize(&mut self, spec: &NodeSpec) -> Result<(), NodeError> {
        self.id = spec.id.clone();

        let raw_nodes = spec
            .config
            .get("childNodes")
            .and_then(Value::as_array)
            .ok_or_else(|| NodeError::Fatal("missing required configuration field 'childNodes'".into()))?;
        if raw_nodes.is_empty() {
            return Err(NodeError::Fatal("container must declare at least one child node".into()));
        }
        self.child_nodes = raw_nodes
            .iter()
            .map(|v| serde_json::from_value(v.clone()))
            .collect::<Result<_, _>>()
            .map_err(|err| NodeError::Fatal(format!("invalid 'childNodes' entry: {err}")))?;

        let raw_connections = spec.config.get("childConnections").and_then(Value::as_array).cloned().unwrap_or_default();
        self.child_connections = raw_connections
            .iter()
            .map(|v| serde_json::from_value(v.clone()))
            .collect::<Result<_, _>>()
            .map_err(|err| NodeError::Fatal(format!("invalid 'childConnections' entry: {err}")))?;

        let ids: HashSet<&str> = self.child_nodes.iter().map(|n| n.id.as_str()).collect();
        for conn in &self.child_connections {
            if !ids.contains(conn.from.as_str()) || !ids.contains(conn.to.as_str()) {
                return Err(NodeError::Fatal(format!(
                    "child connection references a node not declared in 'childNodes' (from='{}', to='{}')",
                    conn.from, conn.to
                )));
            }
        }
        if has_cycle(&self.child_nodes, &self.child_connections) {
            return Err(NodeError::Fatal("container's child graph contains a cycle".into()));
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
            return Ok(Outcome::Cancelled("cancelled before children started".into()));
        }

        let queues = self
            .child_nodes
            .iter()
            .map(|def| {
                let buffer = CircularMessageBuffer::new(run.engine.config.queue_capacity, run.engine.config.visibility_timeout);
                (def.id.clone(), std::sync::Arc::new(NodeMessageQueue::new(def.id.clone(), buffer)))
            })
            .collect();
        let router = std::sync::Arc::new(MessageRouter::new(&self.child_connections));
        let child_run = run.with_subgraph(queues, router);

        let entries = entry_points(&self.child_nodes, &self.child_connections);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handles = run
            .engine
            .spawn_subgraph(&self.child_nodes, &entries, &child_run, cancel, Some(tx))
            .map_err(|err| NodeError::Fatal(format!("failed to start container children: {err}")))?;

        let child_ids: Vec<String> = self.child_nodes.iter().map(|n| n.id.clone()).collect();
        let total = child_ids.len();
        let mut completed_or_cancelled = 0usize;
        let mut failure: Option<String> = None;

        loop {
            tokio::select! {
                message = rx.recv() => {
                    match message {
                        Some((node_id, NodeInstanceStatus::Failed)) => {
                            failure = Some(node_id);
                            break;
                        }
                        Some((_, NodeInstanceStatus::Completed)) | Some((_, NodeInstanceStatus::Cancelled)) => {
                            completed_or_cancelled += 1;
                            if completed_or_cancelled >= total {
                                break;
                            }
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }

        // Drop the handles without awaiting them: a failure returns as soon as
        // it's observed, and any children still in flight are left running
        // rather than forcibly cancelled (spec.md 4.5 Container).
        drop(handles);

        let results = child_run.instances_for(&child_ids);
        let child_results_json = Value::Object(
            results
                .iter()
                .map(|(id, snaps)| {
                    let last = snaps.last();
                    (
                        id.clone(),
                        last.map(|s| s.output.clone()).unwrap_or(Value::Null),
                    )
                })
                .collect(),
        );

        if let Some(failed_id) = failure {
            let error = results
                .get(&failed_id)
                .and_then(|snaps| snaps.last())
                .and_then(|s| s.error_message.clone())
                .unwrap_or_default();
            ctx.set_output("FailedChildId", Value::String(failed_id.clone()));
            ctx.set_output("FailedChildError", Value::String(error.clone()));
            ctx.set_output("ChildResults", child_results_json);
            return Ok(Outcome::Failed(format!("child '{failed_id}' failed: {error}")));
        }

        ctx.set_output("ChildResults", child_results_json);
        Ok(Outcome::Completed)
    }
}

fn has_cycle(nodes: &[NodeDefinition], connections: &[Connection]) -> bool {
    use std::collections::HashMap;

    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for node in nodes {
        adjacency.entry(node.id.as_str()).or_default();
    }
    for conn in connections {
        adjacency.entry(conn.from.as_str()).or_default().push(conn.to.as_str());
    }

    let mut visiting: HashSet<&str> = HashSet::new();
    let mut visited: HashSet<&str> = HashSet::new();

    fn dfs<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        visiting: &mut HashSet<&'a str>,
        visited: &mut HashSet<&'a str>,
    ) -> bool {
        if visited.contains(node) {
            return false;
        }
        if !visiting.insert(node) {
            return true;
        }
        if let Some(neighbours) = adjacency.get(node) {
            for &next in neighbours {
                if dfs(next, adjacency, visiting, visited) {
                    return true;
                }
            }
        }
        visiting.remove(node);
        visited.insert(node);
        false
    }

    nodes.iter().any(|n| dfs(n.id.as_str(), &adjacency, &mut visiting, &mut visited))
}
