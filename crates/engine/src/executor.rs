//! `WorkflowEngine` — the orchestrator that owns one workflow run end to
//! end: validate, instantiate nodes, wire queues, launch per-node consumer
//! loops, seed the entry point, and wait for termination.
//!
//! A `Subflow` or `Container` node doesn't get its own engine type — it
//! just holds onto the `Arc<WorkflowEngine>` reachable through
//! [`crate::context::WorkflowRunContext::engine`] and either calls
//! [`WorkflowEngine::start`] again for an isolated child run (`Subflow`) or
//! instantiates its own children via [`WorkflowEngine::instantiate`] and
//! drives them with the same consumer-loop primitive under a nested
//! [`crate::context::WorkflowRunContext`] (`Container`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{info, instrument, warn};

use nodes::{CancelToken, Evaluator, ExecutableNode, JsonPathEvaluator, NodeSpec, ScriptNode};

use crate::buffer::{CircularMessageBuffer, DEFAULT_CAPACITY, DEFAULT_VISIBILITY_TIMEOUT};
use crate::consumer::consumer_loop;
use crate::context::{WorkflowRunContext, WorkflowStatus};
use crate::control::{ContainerNode, ForEachNode, IfElseNode, SubflowNode, SwitchNode, WhileNode};
use crate::deadletter::DeadLetterSink;
use crate::error::EngineError;
use crate::message::Envelope;
use crate::models::{NodeDefinition, RuntimeKind, Workflow};
use crate::node_kind::RuntimeNode;
use crate::queue::NodeMessageQueue;
use crate::router::MessageRouter;
use crate::validator::validate;

/// A caller-supplied constructor for a `Custom` runtime kind's leaf node.
/// Cloned out of the registry and invoked once per node instantiation, so
/// it must not carry per-call state — `ExecutableNode::initialize` is
/// where a node captures its configuration.
pub type NodeFactory = Arc<dyn Fn() -> Box<dyn ExecutableNode> + Send + Sync>;

/// Maps a `RuntimeKind::Custom` label to the factory that builds it.
/// Built-in kinds (`Script`, `IfElse`, …) never consult this map.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    factories: HashMap<String, NodeFactory>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, label: impl Into<String>, factory: NodeFactory) -> &mut Self {
        self.factories.insert(label.into(), factory);
        self
    }
}

/// Tunable defaults, overridable per workflow/connection/node where the
/// data model provides a slot for it (`Workflow::timeout`,
/// `Connection`/`NodeDefinition::retry_policy`).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub queue_capacity: usize,
    pub visibility_timeout: Duration,
    pub idle_timeout: Duration,
    pub default_wait: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_CAPACITY,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            idle_timeout: Duration::from_secs(10),
            default_wait: Duration::from_secs(30),
        }
    }
}

/// Owns the node registry, the shared `Evaluator`, and the tunables every
/// run is built from. Cheap to clone (everything behind an `Arc`), and
/// `Arc<WorkflowEngine>` is itself threaded into every
/// [`crate::context::WorkflowRunContext`] so nested runs (`Subflow`) and
/// nested sub-graphs (`Container`) can reach back into it.
pub struct WorkflowEngine {
    pub registry: NodeRegistry,
    pub evaluator: Arc<dyn Evaluator>,
    pub config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(registry: NodeRegistry, evaluator: Arc<dyn Evaluator>, config: EngineConfig) -> Arc<Self> {
        Arc::new(Self { registry, evaluator, config })
    }

    /// An engine with no custom node factories, the default
    /// [`JsonPathEvaluator`], and default tunables — convenient for tests
    /// and callers whose workflows only use built-in runtime kinds.
    pub fn with_defaults() -> Arc<Self> {
        Self::new(NodeRegistry::new(), Arc::new(JsonPathEvaluator), EngineConfig::default())
    }

    /// Validate `definition`, instantiate every node, wire queues and the
    /// router, launch one consumer per node, seed the entry point, and
    /// block until every consumer terminates or the run's timeout elapses.
    ///
    /// Returns `Err` only for the out-of-band failures §7 of the spec
    /// calls out as propagating past `Start`: a malformed or cyclic
    /// definition. A run that times out, or in which a node fails, still
    /// returns `Ok` with the context's status set accordingly — callers
    /// need `node_instances()` to inspect a failed or timed-out run, which
    /// an `Err` would deny them.
    #[instrument(skip(self, workflow, initial_globals), fields(workflow_id = %workflow.id, workflow_name = %workflow.name))]
    pub async fn start(
        self: &Arc<Self>,
        workflow: &Workflow,
        initial_globals: Option<HashMap<String, Value>>,
        timeout_override: Option<Duration>,
    ) -> Result<Arc<WorkflowRunContext>, EngineError> {
        let report = validate(workflow);
        if !report.is_valid() {
            return Err(EngineError::GraphError(report));
        }
        for warning in &report.warnings {
            warn!(%warning, workflow_id = %workflow.id, "workflow validation warning");
        }
        let entry_point = report
            .resolved_entry_point
            .clone()
            .ok_or_else(|| EngineError::ConfigurationError("no usable entry point".to_string()))?;

        let globals = nodes::Globals::new();
        if let Some(vars) = &workflow.default_variables {
            if let Some(obj) = vars.as_object() {
                for (k, v) in obj {
                    globals.set(k.clone(), v.clone());
                }
            }
        }
        for (k, v) in initial_globals.into_iter().flatten() {
            globals.set(k, v);
        }

        let queues = self.build_queues(&workflow.nodes);
        let router = Arc::new(MessageRouter::new(&workflow.connections));

        let mut nodes = HashMap::with_capacity(workflow.nodes.len());
        for def in &workflow.nodes {
            let node = self.instantiate(def)?;
            nodes.insert(def.id.clone(), Arc::new(node));
        }

        let timeout = timeout_override.or(workflow.timeout).unwrap_or(self.config.default_wait);
        let run = Arc::new(WorkflowRunContext::new(
            workflow.id,
            globals,
            queues,
            router,
            Arc::new(DeadLetterSink::new()),
            timeout,
            self.clone(),
        ));

        let cancel = CancelToken::new();
        let mut handles = Vec::with_capacity(workflow.nodes.len());
        for def in &workflow.nodes {
            let node_id = def.id.clone();
            let node = nodes[&node_id].clone();
            let run = run.clone();
            let evaluator = self.evaluator.clone();
            let retry_policy = def.retry_policy.clone().unwrap_or_default();
            let idle_timeout = self.config.idle_timeout;
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                consumer_loop(node_id, node, run, evaluator, retry_policy, idle_timeout, cancel, None).await;
            }));
        }

        if let Some(queue) = run.queue_for(&entry_point) {
            if let Err(err) = queue.enqueue(Envelope::seed()) {
                warn!(%err, node_id = %entry_point, "failed to seed entry point");
            }
        }

        let remaining = run.deadline.saturating_duration_since(Instant::now());
        let mut handles = handles;
        let deadline_hit = tokio::time::timeout(remaining, futures::future::join_all(handles.iter_mut())).await.is_err();

        if deadline_hit {
            // A node's own idle-trigger timeout can legitimately be longer
            // than the time left on the workflow clock (e.g. `IfElse`'s
            // untaken branch) — signal cancellation and give every consumer
            // a brief grace period to observe it and record its terminal
            // instance before concluding the run is genuinely stuck.
            cancel.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(2), futures::future::join_all(handles.iter_mut())).await;
        }

        let still_pending: Vec<String> = run
            .node_instances()
            .into_iter()
            .filter(|inst| !inst.status.is_terminal())
            .map(|inst| inst.node_id)
            .collect();

        if deadline_hit && !still_pending.is_empty() {
            run.globals.set(
                "__node_errors",
                Value::String(format!("workflow timed out; still pending/running: {still_pending:?}")),
            );
            run.finish(WorkflowStatus::Failed);
            info!(workflow_id = %workflow.id, run_id = %run.run_id, "workflow run timed out");
            return Ok(run);
        }

        let final_status = run.compute_final_status();
        if final_status == WorkflowStatus::Failed {
            run.globals.set("__node_errors", Value::String(run.aggregate_node_errors()));
        }
        run.finish(final_status);
        info!(workflow_id = %workflow.id, run_id = %run.run_id, status = ?final_status, "workflow run finished");
        Ok(run)
    }

    fn build_queues(&self, defs: &[NodeDefinition]) -> HashMap<String, Arc<NodeMessageQueue>> {
        defs.iter()
            .map(|def| {
                let capacity = self.config.queue_capacity;
                let buffer = CircularMessageBuffer::new(capacity, self.config.visibility_timeout);
                (def.id.clone(), Arc::new(NodeMessageQueue::new(def.id.clone(), buffer)))
            })
            .collect()
    }

    /// Build and initialize one node from its declarative definition.
    /// Built-in `RuntimeKind`s dispatch directly; `Custom` labels resolve
    /// against [`NodeRegistry`].
    pub fn instantiate(self: &Arc<Self>, def: &NodeDefinition) -> Result<RuntimeNode, EngineError> {
        let spec = NodeSpec { id: def.id.clone(), name: def.name.clone(), config: def.config.clone() };

        let mut node = match def.kind() {
            RuntimeKind::Script | RuntimeKind::Task => RuntimeNode::Leaf(Box::new(ScriptNode::new(self.evaluator.clone()))),
            RuntimeKind::IfElse => RuntimeNode::Control(Box::new(IfElseNode::new())),
            RuntimeKind::Switch => RuntimeNode::Control(Box::new(SwitchNode::new())),
            RuntimeKind::ForEach => RuntimeNode::Control(Box::new(ForEachNode::new())),
            RuntimeKind::While => RuntimeNode::Control(Box::new(WhileNode::new())),
            RuntimeKind::Subflow => RuntimeNode::Control(Box::new(SubflowNode::new())),
            RuntimeKind::Container => RuntimeNode::Control(Box::new(ContainerNode::new())),
            RuntimeKind::Custom(label) => {
                let factory = self.registry.factories.get(&label).ok_or_else(|| {
                    EngineError::CompilationError(format!("no node factory registered for runtime type '{label}'"))
                })?;
                RuntimeNode::Leaf(factory())
            }
        };
        node.initialize(&spec).map_err(|err| EngineError::ConfigurationError(err.to_string()))?;
        Ok(node)
    }

    /// Instantiate and spawn one consumer per node of a sub-graph under
    /// `run` (already the right [`WorkflowRunContext`] — a
    /// `with_subgraph` one for a `Container`), seed every entry point,
    /// and return the spawned handles. Shared by `Container` so it
    /// doesn't have to re-derive the engine's own node-instantiation and
    /// consumer-spawning logic.
    pub fn spawn_subgraph(
        self: &Arc<Self>,
        defs: &[NodeDefinition],
        entry_points: &[String],
        run: &Arc<WorkflowRunContext>,
        cancel: &CancelToken,
        on_terminal: Option<tokio::sync::mpsc::UnboundedSender<(String, crate::instance::NodeInstanceStatus)>>,
    ) -> Result<Vec<tokio::task::JoinHandle<()>>, EngineError> {
        let mut handles = Vec::with_capacity(defs.len());
        for def in defs {
            let node = Arc::new(self.instantiate(def)?);
            let node_id = def.id.clone();
            let run = run.clone();
            let evaluator = self.evaluator.clone();
            let retry_policy = def.retry_policy.clone().unwrap_or_default();
            let idle_timeout = self.config.idle_timeout;
            let cancel = cancel.clone();
            let on_terminal = on_terminal.clone();
            handles.push(tokio::spawn(async move {
                consumer_loop(node_id, node, run, evaluator, retry_policy, idle_timeout, cancel, on_terminal).await;
            }));
        }

        for entry in entry_points {
            if let Some(queue) = run.queue_for(entry) {
                let _ = queue.enqueue(Envelope::seed());
            }
        }

        Ok(handles)
    }
}

/// Ids of `defs` with no incoming connection among `connections` — the
/// same "entry point" rule the top-level engine applies, reused by
/// `Container` for its child sub-graph.
pub fn entry_points(defs: &[NodeDefinition], connections: &[crate::models::Connection]) -> Vec<String> {
    let targets: std::collections::HashSet<&str> = connections.iter().map(|c| c.to.as_str()).collect();
    defs.iter().map(|n| n.id.clone()).filter(|id| !targets.contains(id.as_str())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Connection, NodeDefinition};
    use serde_json::json;

    fn script_node(id: &str, script: &str) -> NodeDefinition {
        NodeDefinition {
            id: id.into(),
            name: id.into(),
            runtime_type: "Script".into(),
            config: json!({ "script": script }),
            retry_policy: None,
            max_concurrent_executions: None,
        }
    }

    #[tokio::test]
    async fn linear_pipeline_completes_in_order() {
        let engine = WorkflowEngine::with_defaults();
        let workflow = Workflow::new(
            "linear",
            vec![script_node("a", "10"), script_node("b", "20"), script_node("c", "true")],
            vec![Connection::new("a", "b"), Connection::new("b", "c")],
        );

        let run = engine.start(&workflow, None, Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(run.status(), WorkflowStatus::Completed);

        let instances = run.node_instances();
        assert_eq!(instances.len(), 3);
        assert!(instances.iter().all(|i| i.status == crate::instance::NodeInstanceStatus::Completed));
    }

    #[tokio::test]
    async fn if_else_false_branch_leaves_other_branch_cancelled() {
        let engine = WorkflowEngine::with_defaults();
        let if_else = NodeDefinition {
            id: "gate".into(),
            name: "gate".into(),
            runtime_type: "IfElse".into(),
            config: json!({ "condition": "count>100" }),
            retry_policy: None,
            max_concurrent_executions: None,
        };
        let workflow = Workflow::new(
            "branch",
            vec![if_else, script_node("high", "true"), script_node("normal", "true")],
            vec![
                Connection::new("gate", "high").with_source_port("TrueBranch"),
                Connection::new("gate", "normal").with_source_port("FalseBranch"),
            ],
        );

        let mut globals = HashMap::new();
        globals.insert("count".to_string(), json!(150));
        let run = engine.start(&workflow, Some(globals), Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(run.status(), WorkflowStatus::Completed);

        let instances = run.node_instances();
        let high = instances.iter().find(|i| i.node_id == "high").unwrap();
        let normal = instances.iter().find(|i| i.node_id == "normal").unwrap();
        assert_eq!(high.status, crate::instance::NodeInstanceStatus::Completed);
        assert_eq!(normal.status, crate::instance::NodeInstanceStatus::Cancelled);
    }

    #[tokio::test]
    async fn a_failing_node_fails_the_run() {
        let engine = WorkflowEngine::with_defaults();
        let workflow = Workflow::new(
            "fails",
            vec![script_node("boom", "ghost_variable")],
            vec![],
        );
        let run = engine.start(&workflow, None, Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(run.status(), WorkflowStatus::Failed);
        assert!(run.globals.get("__node_errors").unwrap().as_str().unwrap().contains("boom"));
    }
}
