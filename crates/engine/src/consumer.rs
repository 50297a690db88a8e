//! The per-node consumer loop shared by the top-level engine run and by a
//! `Container`'s inline sub-graph: lease a message, run the node, route the
//! result, record a node instance — and repeat until cancelled or the
//! node's queue goes idle past its idle-trigger timeout.
//!
//! Kept in a loop rather than a single lease-then-exit turn (spec.md §4.6
//! notes both are legal) so a re-entrant node like `While` — re-triggered
//! by its own loop body's feedback edge — is driven by one long-lived task
//! instead of the engine having to notice new mail in an already-finished
//! node's queue and spin up a fresh consumer for it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use nodes::{CancelToken, Evaluator, ExecutionContext, NodeError, Outcome};

use crate::context::WorkflowRunContext;
use crate::instance::NodeInstanceStatus;
use crate::message::Envelope;
use crate::models::{MessageKind, RetryPolicy};
use crate::node_kind::RuntimeNode;
use crate::queue::AbandonOutcome;

/// Drive `node_id`'s queue under `run` until cancelled or idle.
///
/// `on_terminal`, when supplied, receives `(node_id, status)` every time a
/// node instance reaches a terminal status — `Container` uses this to learn
/// about a child's completion or failure without polling the instance table.
pub async fn consumer_loop(
    node_id: String,
    node: Arc<RuntimeNode>,
    run: Arc<WorkflowRunContext>,
    evaluator: Arc<dyn Evaluator>,
    retry_policy: RetryPolicy,
    idle_timeout: Duration,
    cancel: CancelToken,
    on_terminal: Option<UnboundedSender<(String, NodeInstanceStatus)>>,
) {
    let Some(queue) = run.queue_for(&node_id) else {
        return;
    };
    let mut ever_executed = false;

    loop {
        let Some(lease) = queue.lease(&cancel, idle_timeout).await else {
            if !ever_executed {
                let instance = run.new_instance(&node_id, Value::Null);
                instance.finish_cancelled("no trigger received before idle timeout");
                notify(&on_terminal, &node_id, NodeInstanceStatus::Cancelled);
            }
            return;
        };
        ever_executed = true;

        let input = lease.envelope.output.clone().unwrap_or(Value::Null);
        let instance = run.new_instance(&node_id, input.clone());
        instance.start();
        let exec_ctx = ExecutionContext::new(run.workflow_id, run.run_id, instance.id, run.globals.clone(), input);

        let outcome = match node.execute(&run, &exec_ctx, evaluator.as_ref(), &cancel).await {
            Ok(outcome) => outcome,
            Err(NodeError::Fatal(msg)) => Outcome::Failed(msg),
            Err(NodeError::Cancelled(msg)) => Outcome::Cancelled(msg),
            Err(NodeError::Retryable(msg)) => {
                let fail_envelope = Envelope::fail(node_id.clone(), None, msg.clone());
                run.router
                    .route(&fail_envelope, &run.queues, evaluator.as_ref(), &run.globals, run.workflow_id, run.run_id)
                    .await;
                match queue.abandon_lease(lease, &retry_policy, "retryable", &run.dead_letter) {
                    Ok(AbandonOutcome::DeadLettered) => {
                        instance.finish_failed(format!("retry budget exhausted: {msg}"), Value::Null);
                        notify(&on_terminal, &node_id, NodeInstanceStatus::Failed);
                    }
                    Ok(AbandonOutcome::Redelivered) | Err(_) => {
                        // This attempt still raised; it's terminal even though the
                        // envelope lives on for a fresh attempt with its own instance.
                        instance.finish_failed(msg.clone(), Value::Null);
                        notify(&on_terminal, &node_id, NodeInstanceStatus::Failed);
                    }
                }
                if cancel.is_cancelled() {
                    return;
                }
                continue;
            }
        };

        match outcome {
            Outcome::Completed => {
                let output = exec_ctx.output_snapshot();
                let port = exec_ctx.source_port();
                instance.finish_completed(output.clone(), port.clone());
                notify(&on_terminal, &node_id, NodeInstanceStatus::Completed);
                let envelope = Envelope::new(MessageKind::Complete, node_id.clone(), port, Some(output));
                run.router
                    .route(&envelope, &run.queues, evaluator.as_ref(), &run.globals, run.workflow_id, run.run_id)
                    .await;
                let _ = queue.complete_lease(lease.lease_id);
            }
            Outcome::Failed(msg) => {
                instance.finish_failed(msg.clone(), Value::Null);
                notify(&on_terminal, &node_id, NodeInstanceStatus::Failed);
                let envelope = Envelope::fail(node_id.clone(), None, msg);
                run.router
                    .route(&envelope, &run.queues, evaluator.as_ref(), &run.globals, run.workflow_id, run.run_id)
                    .await;
                let _ = queue.complete_lease(lease.lease_id);
            }
            Outcome::Cancelled(reason) => {
                instance.finish_cancelled(reason);
                notify(&on_terminal, &node_id, NodeInstanceStatus::Cancelled);
                let _ = queue.abandon_lease(lease, &retry_policy, "cancelled", &run.dead_letter);
            }
        }

        if cancel.is_cancelled() {
            return;
        }
    }
}

fn notify(sender: &Option<UnboundedSender<(String, NodeInstanceStatus)>>, node_id: &str, status: NodeInstanceStatus) {
    if let Some(tx) = sender {
        let _ = tx.send((node_id.to_string(), status));
    }
}
