//! Built-in control-flow nodes.
//!
//! These differ from an ordinary [`nodes::ExecutableNode`] in one respect:
//! they need to reach past their own [`nodes::ExecutionContext`] into the
//! running workflow's router and queues (`ForEach` fans an item out per
//! collection entry; `While` re-triggers its own loop body; `Container` and
//! `Subflow` drive a nested sub-graph). [`ControlFlowNode`] is the trait
//! that gives them that reach, which is why they live in this crate rather
//! than alongside the leaf nodes.

mod container;
mod foreach;
mod if_else;
mod subflow;
mod switch;
mod while_loop;

pub use container::ContainerNode;
pub use foreach::ForEachNode;
pub use if_else::IfElseNode;
pub use subflow::SubflowNode;
pub use switch::SwitchNode;
pub use while_loop::WhileNode;

use async_trait::async_trait;
use nodes::{CancelToken, EvalError, Evaluator, ExecutionContext, NodeError, NodeSpec, Outcome};

use crate::context::WorkflowRunContext;

/// The contract a built-in control-flow node fulfils. Mirrors
/// [`nodes::ExecutableNode`] but is additionally handed the
/// [`WorkflowRunContext`] it's running inside of, so it can emit auxiliary
/// messages (a `ForEach` item, a `While` loop-body trigger) directly via the
/// router instead of only through its own `Complete`/`Fail` outcome.
#[async_trait]
pub trait ControlFlowNode: Send + Sync {
    fn initialize(&mut self, spec: &NodeSpec) -> Result<(), NodeError> {
        let _ = spec;
        Ok(())
    }

    async fn execute(
        &self,
        run: &WorkflowRunContext,
        ctx: &ExecutionContext,
        evaluator: &dyn Evaluator,
        cancel: &CancelToken,
    ) -> Result<Outcome, NodeError>;
}

pub(crate) fn eval_err_to_node_err(err: EvalError) -> NodeError {
    match err {
        EvalError::Compilation(msg) => NodeError::Fatal(format!("compilation error: {msg}")),
        EvalError::Runtime(msg) => NodeError::Fatal(format!("runtime error: {msg}")),
    }
}
