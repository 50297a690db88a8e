//! `MockNode` — a test double for `ExecutableNode`.
//!
//! Useful in unit and integration tests where a real node implementation is
//! either unavailable or irrelevant.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use crate::cancel::CancelToken;
use crate::{traits::ExecutionContext, ExecutableNode, NodeError, Outcome};

/// Behaviour injected into `MockNode` at construction time.
pub enum MockBehaviour {
    /// Complete, merging the given JSON object into the output.
    ReturnValue(Value),
    /// Fail with a `Retryable` error (the engine will re-lease).
    FailRetryable(String),
    /// Fail with a `Fatal` error (no retry).
    FailFatal(String),
    /// Report `Cancelled` directly, without raising.
    ReportCancelled(String),
}

/// A mock node that records every call it receives and returns a
/// programmer-specified result.
pub struct MockNode {
    /// Label used in test assertions and merged into `output["node"]`.
    pub name: String,
    /// What the node will do when `execute` is called.
    pub behaviour: MockBehaviour,
    /// All inputs seen by this node (in call order).
    pub calls: Arc<Mutex<Vec<Value>>>,
}

impl MockNode {
    /// Create a mock that always completes, merging `value`'s fields into
    /// its output alongside `{"node": name}`.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::ReturnValue(value),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::FailFatal(msg.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always fails with a `Retryable` error.
    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::FailRetryable(msg.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always reports `Cancelled`.
    pub fn cancelling(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::ReportCancelled(reason.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of times this node has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ExecutableNode for MockNode {
    async fn execute(&self, ctx: &ExecutionContext, _cancel: &CancelToken) -> Result<Outcome, NodeError> {
        self.calls.lock().unwrap().push(ctx.input.clone());

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => {
                ctx.set_output("node", json!(self.name));
                if let Some(obj) = v.as_object() {
                    for (k, val) in obj {
                        ctx.set_output(k.clone(), val.clone());
                    }
                }
                Ok(Outcome::Completed)
            }
            MockBehaviour::FailRetryable(msg) => Err(NodeError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(NodeError::Fatal(msg.clone())),
            MockBehaviour::ReportCancelled(reason) => Ok(Outcome::Cancelled(reason.clone())),
        }
    }
}
