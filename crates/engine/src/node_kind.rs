//! Type-erasing wrapper unifying leaf [`nodes::ExecutableNode`] and the
//! in-crate [`crate::control::ControlFlowNode`] behind one dispatch surface,
//! so [`crate::consumer::consumer_loop`] can drive either kind of node
//! without knowing which one it has.

use nodes::{CancelToken, Evaluator, ExecutableNode, ExecutionContext, NodeError, NodeSpec, Outcome};

use crate::context::WorkflowRunContext;
use crate::control::ControlFlowNode;

pub enum RuntimeNode {
    Leaf(Box<dyn ExecutableNode>),
    Control(Box<dyn ControlFlowNode>),
}

impl RuntimeNode {
    pub fn initialize(&mut self, spec: &NodeSpec) -> Result<(), NodeError> {
        match self {
            Self::Leaf(n) => n.initialize(spec),
            Self::Control(n) => n.initialize(spec),
        }
    }

    pub async fn execute(
        &self,
        run: &WorkflowRunContext,
        ctx: &ExecutionContext,
        evaluator: &dyn Evaluator,
        cancel: &CancelToken,
    ) -> Result<Outcome, NodeError> {
        match self {
            Self::Leaf(n) => n.execute(ctx, cancel).await,
            Self::Control(n) => n.execute(run, ctx, evaluator, cancel).await,
        }
    }
}
