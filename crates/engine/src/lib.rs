//! `engine` crate — the workflow execution engine: message buffer and
//! queue, router, validator, node instance bookkeeping, built-in
//! control-flow nodes, and the `WorkflowEngine` orchestrator that ties
//! them together into a single workflow run.

pub mod buffer;
pub mod consumer;
pub mod context;
pub mod control;
pub mod deadletter;
pub mod error;
pub mod executor;
pub mod instance;
pub mod message;
pub mod models;
pub mod node_kind;
pub mod queue;
pub mod router;
#[cfg(test)]
mod test_support;
pub mod validator;

pub use context::{WorkflowRunContext, WorkflowStatus};
pub use error::EngineError;
pub use executor::{entry_points, EngineConfig, NodeFactory, NodeRegistry, WorkflowEngine};
pub use instance::{NodeInstance, NodeInstanceStatus};
pub use message::{Envelope, Lease};
pub use models::{Connection, MessageKind, NodeDefinition, RetryPolicy, RetryStrategy, RuntimeKind, Workflow};
