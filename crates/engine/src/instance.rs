//! A node instance: the record of one invocation of one node within one
//! workflow run.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeInstanceStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl NodeInstanceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// An immutable snapshot of a node instance, returned by
/// [`crate::context::WorkflowRunContext::node_instances`].
#[derive(Debug, Clone)]
pub struct NodeInstance {
    pub id: Uuid,
    pub node_id: String,
    pub run_id: Uuid,
    pub status: NodeInstanceStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub input: Value,
    pub output: Value,
    pub source_port: Option<String>,
}

struct MutableState {
    status: NodeInstanceStatus,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    input: Value,
    output: Value,
    source_port: Option<String>,
}

/// The live, interior-mutable handle consumer loops update as an
/// invocation progresses. A run accumulates one of these per invocation —
/// not per node id — since re-entrant nodes (`While`'s loop body) invoke
/// many times over a run's life, each a distinct instance.
pub struct NodeInstanceRecord {
    pub id: Uuid,
    pub node_id: String,
    pub run_id: Uuid,
    state: RwLock<MutableState>,
}

impl NodeInstanceRecord {
    pub fn new(node_id: impl Into<String>, run_id: Uuid, input: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            node_id: node_id.into(),
            run_id,
            state: RwLock::new(MutableState {
                status: NodeInstanceStatus::Pending,
                started_at: None,
                ended_at: None,
                error_message: None,
                input,
                output: Value::Null,
                source_port: None,
            }),
        }
    }

    pub fn start(&self) {
        let mut state = self.state.write();
        if state.status == NodeInstanceStatus::Pending {
            state.status = NodeInstanceStatus::Running;
            state.started_at = Some(Utc::now());
        }
    }

    /// Transition to a terminal status. A no-op once already terminal —
    /// terminal status is write-once.
    fn finish(&self, status: NodeInstanceStatus, output: Value, error_message: Option<String>, source_port: Option<String>) {
        let mut state = self.state.write();
        if state.status.is_terminal() {
            return;
        }
        state.status = status;
        state.output = output;
        state.error_message = error_message;
        state.source_port = source_port;
        state.ended_at = Some(Utc::now());
    }

    pub fn finish_completed(&self, output: Value, source_port: Option<String>) {
        self.finish(NodeInstanceStatus::Completed, output, None, source_port);
    }

    pub fn finish_failed(&self, message: impl Into<String>, output: Value) {
        self.finish(NodeInstanceStatus::Failed, output, Some(message.into()), None);
    }

    pub fn finish_cancelled(&self, reason: impl Into<String>) {
        self.finish(NodeInstanceStatus::Cancelled, Value::Null, Some(reason.into()), None);
    }

    pub fn status(&self) -> NodeInstanceStatus {
        self.state.read().status
    }

    pub fn snapshot(&self) -> NodeInstance {
        let state = self.state.read();
        NodeInstance {
            id: self.id,
            node_id: self.node_id.clone(),
            run_id: self.run_id,
            status: state.status,
            started_at: state.started_at,
            ended_at: state.ended_at,
            error_message: state.error_message.clone(),
            input: state.input.clone(),
            output: state.output.clone(),
            source_port: state.source_port.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn terminal_status_is_write_once() {
        let record = NodeInstanceRecord::new("n1", Uuid::new_v4(), Value::Null);
        record.start();
        record.finish_completed(json!({ "a": 1 }), Some("Out".into()));
        record.finish_failed("should not override", Value::Null);
        let snap = record.snapshot();
        assert_eq!(snap.status, NodeInstanceStatus::Completed);
        assert_eq!(snap.output, json!({ "a": 1 }));
    }

    #[test]
    fn pending_until_started() {
        let record = NodeInstanceRecord::new("n1", Uuid::new_v4(), Value::Null);
        assert_eq!(record.status(), NodeInstanceStatus::Pending);
        record.start();
        assert_eq!(record.status(), NodeInstanceStatus::Running);
    }
}
