//! The state shared by every consumer loop in one workflow run: the per-node
//! queues, the router, the dead-letter sink, the run's globals, and the
//! accumulated node instance records.
//!
//! A `Container` child graph runs under its own [`WorkflowRunContext`] —
//! built by [`WorkflowRunContext::with_subgraph`] — with its own queues and
//! router but the *same* globals, dead-letter sink, and instance table as
//! its parent, so child node instances show up in the overall run's
//! [`WorkflowRunContext::node_instances`] right alongside the nodes that
//! spawned them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use nodes::Globals;

use crate::deadletter::DeadLetterSink;
use crate::executor::WorkflowEngine;
use crate::instance::{NodeInstance, NodeInstanceRecord};
use crate::queue::NodeMessageQueue;
use crate::router::MessageRouter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

type InstanceTable = DashMap<String, Vec<Arc<NodeInstanceRecord>>>;

pub struct WorkflowRunContext {
    pub run_id: Uuid,
    pub workflow_id: Uuid,
    pub globals: Globals,
    pub queues: HashMap<String, Arc<NodeMessageQueue>>,
    pub router: Arc<MessageRouter>,
    pub dead_letter: Arc<DeadLetterSink>,
    pub engine: Arc<WorkflowEngine>,
    instances: Arc<InstanceTable>,
    status: RwLock<WorkflowStatus>,
    started_at: DateTime<Utc>,
    ended_at: RwLock<Option<DateTime<Utc>>>,
    pub deadline: Instant,
}

impl WorkflowRunContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workflow_id: Uuid,
        globals: Globals,
        queues: HashMap<String, Arc<NodeMessageQueue>>,
        router: Arc<MessageRouter>,
        dead_letter: Arc<DeadLetterSink>,
        timeout: Duration,
        engine: Arc<WorkflowEngine>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            workflow_id,
            globals,
            queues,
            router,
            dead_letter,
            engine,
            instances: Arc::new(DashMap::new()),
            status: RwLock::new(WorkflowStatus::Running),
            started_at: Utc::now(),
            ended_at: RwLock::new(None),
            deadline: Instant::now() + timeout,
        }
    }

    /// Build a context for a nested sub-graph (a `Container`'s children):
    /// fresh queues and router scoped to just those children, but the same
    /// run id, globals, dead-letter sink, and instance table as `self` —
    /// so a container's children are recorded as part of the same run.
    pub fn with_subgraph(
        &self,
        queues: HashMap<String, Arc<NodeMessageQueue>>,
        router: Arc<MessageRouter>,
    ) -> Arc<WorkflowRunContext> {
        Arc::new(Self {
            run_id: self.run_id,
            workflow_id: self.workflow_id,
            globals: self.globals.clone(),
            queues,
            router,
            dead_letter: self.dead_letter.clone(),
            engine: self.engine.clone(),
            instances: self.instances.clone(),
            status: RwLock::new(WorkflowStatus::Running),
            started_at: self.started_at,
            ended_at: RwLock::new(None),
            deadline: self.deadline,
        })
    }

    pub fn queue_for(&self, node_id: &str) -> Option<Arc<NodeMessageQueue>> {
        self.queues.get(node_id).cloned()
    }

    pub fn new_instance(&self, node_id: &str, input: Value) -> Arc<NodeInstanceRecord> {
        let record = Arc::new(NodeInstanceRecord::new(node_id, self.run_id, input));
        self.instances.entry(node_id.to_string()).or_default().push(record.clone());
        record
    }

    pub fn node_instances(&self) -> Vec<NodeInstance> {
        self.instances
            .iter()
            .flat_map(|entry| entry.value().iter().map(|r| r.snapshot()).collect::<Vec<_>>())
            .collect()
    }

    /// Terminal-status snapshots for just `node_ids`, in the order given —
    /// used by `Container` to assemble `ChildResults`.
    pub fn instances_for(&self, node_ids: &[String]) -> HashMap<String, Vec<NodeInstance>> {
        node_ids
            .iter()
            .map(|id| {
                let snaps = self
                    .instances
                    .get(id)
                    .map(|entry| entry.value().iter().map(|r| r.snapshot()).collect())
                    .unwrap_or_default();
                (id.clone(), snaps)
            })
            .collect()
    }

    pub fn status(&self) -> WorkflowStatus {
        *self.status.read()
    }

    pub fn finish(&self, status: WorkflowStatus) {
        let mut current = self.status.write();
        if *current == WorkflowStatus::Running {
            *current = status;
            *self.ended_at.write() = Some(Utc::now());
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        *self.ended_at.read()
    }

    /// Compute the run's final status from every instance ever recorded:
    /// any `Failed` instance fails the run; otherwise the run completes
    /// only if every instance reached `Completed` or `Cancelled`.
    pub fn compute_final_status(&self) -> WorkflowStatus {
        use crate::instance::NodeInstanceStatus;

        let mut any_failed = false;
        let mut all_terminal = true;
        for entry in self.instances.iter() {
            for record in entry.value() {
                match record.status() {
                    NodeInstanceStatus::Failed => any_failed = true,
                    NodeInstanceStatus::Completed | NodeInstanceStatus::Cancelled => {}
                    _ => all_terminal = false,
                }
            }
        }

        if any_failed {
            WorkflowStatus::Failed
        } else if all_terminal {
            WorkflowStatus::Completed
        } else {
            WorkflowStatus::TimedOut
        }
    }

    /// Aggregate every failed node instance into the `"nodeId: message; …"`
    /// diagnostic the spec's `__node_errors` global carries on a `Failed` run.
    pub fn aggregate_node_errors(&self) -> String {
        use crate::instance::NodeInstanceStatus;

        let mut parts = Vec::new();
        for entry in self.instances.iter() {
            for record in entry.value() {
                let snap = record.snapshot();
                if snap.status == NodeInstanceStatus::Failed {
                    let message = snap.error_message.unwrap_or_default();
                    parts.push(format!("{}: {}", snap.node_id, message));
                }
            }
        }
        parts.join("; ")
    }
}
