//! Shared test fixtures for the control-flow node test modules.

#![cfg(test)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use nodes::{Globals, NodeSpec};

use crate::buffer::CircularMessageBuffer;
use crate::context::WorkflowRunContext;
use crate::deadletter::DeadLetterSink;
use crate::models::Connection;
use crate::queue::NodeMessageQueue;
use crate::router::MessageRouter;

pub fn make_spec(id: &str, config: Value) -> NodeSpec {
    NodeSpec { id: id.to_string(), name: id.to_string(), config }
}

pub fn empty_run_context(globals: Globals) -> WorkflowRunContext {
    run_context_with_queues(globals, &[], vec![])
}

pub fn run_context_with_queues(globals: Globals, queue_ids: &[&str], connections: Vec<Connection>) -> WorkflowRunContext {
    let queues: HashMap<String, Arc<NodeMessageQueue>> = queue_ids
        .iter()
        .map(|id| {
            (
                id.to_string(),
                Arc::new(NodeMessageQueue::new(*id, CircularMessageBuffer::new(16, Duration::from_secs(10)))),
            )
        })
        .collect();

    WorkflowRunContext::new(
        Uuid::new_v4(),
        globals,
        queues,
        Arc::new(MessageRouter::new(&connections)),
        Arc::new(DeadLetterSink::new()),
        Duration::from_secs(30),
        crate::executor::WorkflowEngine::with_defaults(),
    )
}
