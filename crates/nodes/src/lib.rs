//! `nodes` crate — the `ExecutableNode` trait and leaf node implementations.
//!
//! Every node — built-in control-flow and leaf alike — implements
//! [`ExecutableNode`]. The control-flow nodes (`IfElse`, `Switch`, `ForEach`,
//! `While`, `Subflow`, `Container`) are coupled to engine internals (the
//! router, the workflow engine) and so live in the `engine` crate instead;
//! this crate holds what has no such dependency: the contract itself, the
//! run-scoped globals handle, the `Evaluator` abstraction for script/
//! expression backends, the leaf `ScriptNode`, and the `MockNode` test
//! double.

pub mod cancel;
pub mod error;
pub mod eval;
pub mod globals;
pub mod mock;
pub mod task;
pub mod traits;

pub use cancel::CancelToken;
pub use error::NodeError;
pub use eval::{to_plain_string, EvalError, Evaluator, JsonPathEvaluator};
pub use globals::Globals;
pub use task::ScriptNode;
pub use traits::{ExecutableNode, ExecutionContext, NodeSpec, Outcome};
