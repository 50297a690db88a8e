//! The `ExecutableNode` trait — the contract every node must fulfil.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::globals::Globals;
use crate::NodeError;

/// Declarative capture handed to a node at construction time.
///
/// Deliberately narrow: the full `NodeDefinition` (runtime kind, retry
/// policy, max concurrency) lives in the `engine` crate, which owns the
/// workflow graph. A node only needs its own id, name, and configuration.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub id: String,
    pub name: String,
    pub config: Value,
}

/// Per-invocation state for one `Execute` call.
///
/// Doubles as the "binding context" a script/expression `Evaluator` sees:
/// `get_input`/`set_output`/`get_global`/`set_global`/`local` are the exact
/// five accessors the spec names. A node mutates `output` and (optionally)
/// `source_port` to communicate its result; the engine reads both back
/// after `execute` returns.
pub struct ExecutionContext {
    pub workflow_id: Uuid,
    pub execution_id: Uuid,
    pub node_instance_id: Uuid,
    pub globals: Globals,
    /// The attached output of the triggering envelope, or `Value::Null` if
    /// this invocation's trigger carried none (e.g. the synthetic seed).
    pub input: Value,
    locals: Mutex<serde_json::Map<String, Value>>,
    output: Mutex<serde_json::Map<String, Value>>,
    source_port: Mutex<Option<String>>,
}

impl ExecutionContext {
    pub fn new(
        workflow_id: Uuid,
        execution_id: Uuid,
        node_instance_id: Uuid,
        globals: Globals,
        input: Value,
    ) -> Self {
        Self {
            workflow_id,
            execution_id,
            node_instance_id,
            globals,
            input,
            locals: Mutex::new(serde_json::Map::new()),
            output: Mutex::new(serde_json::Map::new()),
            source_port: Mutex::new(None),
        }
    }

    /// Look up a (possibly dotted) path into `input`. An empty path returns
    /// the whole input value.
    pub fn get_input(&self, path: &str) -> Option<Value> {
        lookup_path(&self.input, path)
    }

    pub fn set_output(&self, key: impl Into<String>, value: Value) {
        self.output.lock().insert(key.into(), value);
    }

    pub fn get_output(&self, key: &str) -> Option<Value> {
        self.output.lock().get(key).cloned()
    }

    pub fn get_global(&self, key: &str) -> Option<Value> {
        self.globals.get(key)
    }

    pub fn set_global(&self, key: impl Into<String>, value: Value) {
        self.globals.set(key, value);
    }

    pub fn local(&self, key: &str) -> Option<Value> {
        self.locals.lock().get(key).cloned()
    }

    pub fn set_local(&self, key: impl Into<String>, value: Value) {
        self.locals.lock().insert(key.into(), value);
    }

    pub fn set_source_port(&self, port: impl Into<String>) {
        *self.source_port.lock() = Some(port.into());
    }

    pub fn source_port(&self) -> Option<String> {
        self.source_port.lock().clone()
    }

    /// Snapshot `output` as a single `Value::Object` — what the engine
    /// attaches to the `Complete`/`Next`/`Fail` envelope it routes.
    pub fn output_snapshot(&self) -> Value {
        Value::Object(self.output.lock().clone())
    }
}

fn lookup_path(root: &Value, path: &str) -> Option<Value> {
    if path.is_empty() {
        return Some(root.clone());
    }
    let mut current = root;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

/// What a node decided about its own invocation. Distinct from `NodeError`:
/// an `Outcome` is the node's own terminal verdict (no retry follows, even
/// `Failed`); a `NodeError::Retryable` means "the engine should re-try me",
/// which never produces an `Outcome` — the lease is abandoned instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed(String),
    Cancelled(String),
}

/// The core node trait. All built-in nodes and plugins implement this.
///
/// Implementations must be re-entrant: a consumer loop may invoke `execute`
/// many times on the same node instance across a run's lifetime (e.g. a
/// `While` loop body re-triggered by a feedback edge), so no invocation may
/// assume it is the first or the last.
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    /// Capture id/name/configuration; may precompile scripts. Must not
    /// perform side effects on shared state.
    fn initialize(&mut self, spec: &NodeSpec) -> Result<(), NodeError> {
        let _ = spec;
        Ok(())
    }

    /// Run the node's logic. `ctx` is both the input/output surface and the
    /// binding context for expression evaluation.
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        cancel: &CancelToken,
    ) -> Result<Outcome, NodeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(input: Value) -> ExecutionContext {
        ExecutionContext::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Globals::new(),
            input,
        )
    }

    #[test]
    fn dotted_path_lookup() {
        let c = ctx(json!({ "a": { "b": 5 } }));
        assert_eq!(c.get_input("a.b"), Some(json!(5)));
        assert_eq!(c.get_input(""), Some(json!({ "a": { "b": 5 } })));
        assert_eq!(c.get_input("a.missing"), None);
    }

    #[test]
    fn output_snapshot_reflects_writes() {
        let c = ctx(Value::Null);
        c.set_output("x", json!(1));
        c.set_output("y", json!("hi"));
        assert_eq!(c.output_snapshot(), json!({ "x": 1, "y": "hi" }));
    }

    #[test]
    fn source_port_round_trip() {
        let c = ctx(Value::Null);
        assert_eq!(c.source_port(), None);
        c.set_source_port("TrueBranch");
        assert_eq!(c.source_port(), Some("TrueBranch".to_string()));
    }
}
