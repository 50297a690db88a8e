//! The message router: given a node's outgoing envelope, decide which
//! connections fire and enqueue a new envelope on each target's queue.
//!
//! Four gates, all of which must pass for a connection to fire:
//! 1. `enabled` is `true`.
//! 2. `trigger_kind` matches the envelope's `kind`.
//! 3. `source_port`, if set, matches the envelope's `source_port`
//!    (`None`/absent means the default port on both sides).
//! 3b. `target_port`, if set, matches the target's expected input port —
//!     no node currently declares named input ports, so a connection
//!     with a `target_port` set can never fire; `None` is the only port
//!     any node exposes today.
//! 4. `condition`, if set, evaluates truthy against the envelope's
//!    attached output. A condition that raises is treated as `false` —
//!    routing fails safe rather than wedging the run.
//!
//! Surviving connections fire in priority order (higher first), ties
//! broken by declaration order — established once at construction time so
//! routing itself never resorts.

use std::collections::HashMap;
use std::sync::Arc;

use nodes::{Evaluator, ExecutionContext, Globals};
use uuid::Uuid;

use crate::message::Envelope;
use crate::models::Connection;
use crate::queue::NodeMessageQueue;

pub struct MessageRouter {
    /// Connections grouped by source node id, pre-sorted by
    /// (priority desc, declaration order asc).
    by_source: HashMap<String, Vec<Connection>>,
}

impl MessageRouter {
    pub fn new(connections: &[Connection]) -> Self {
        let mut by_source: HashMap<String, Vec<(usize, Connection)>> = HashMap::new();
        for (idx, conn) in connections.iter().enumerate() {
            if !conn.enabled {
                continue;
            }
            by_source.entry(conn.from.clone()).or_default().push((idx, conn.clone()));
        }

        let by_source = by_source
            .into_iter()
            .map(|(source, mut conns)| {
                conns.sort_by(|(idx_a, a), (idx_b, b)| b.priority.cmp(&a.priority).then(idx_a.cmp(idx_b)));
                (source, conns.into_iter().map(|(_, c)| c).collect())
            })
            .collect();

        Self { by_source }
    }

    /// Route `envelope` (just emitted by `envelope.source_node_id`) to every
    /// connection that gates it through, enqueuing a fresh envelope on each
    /// target's queue.
    pub async fn route(
        &self,
        envelope: &Envelope,
        queues: &HashMap<String, Arc<NodeMessageQueue>>,
        evaluator: &dyn Evaluator,
        globals: &Globals,
        workflow_id: Uuid,
        run_id: Uuid,
    ) {
        let Some(candidates) = self.by_source.get(&envelope.source_node_id) else {
            return;
        };

        for conn in candidates {
            if conn.trigger_kind != envelope.kind {
                continue;
            }
            if conn.source_port != envelope.source_port {
                continue;
            }
            // No built-in or custom node currently declares named input
            // ports (only named *output* ports via `SourcePort`), so the
            // only `target_port` a connection can ever match is the
            // implicit default one.
            if conn.target_port.is_some() {
                continue;
            }
            if let Some(condition) = &conn.condition {
                let binding = ExecutionContext::new(
                    workflow_id,
                    run_id,
                    Uuid::new_v4(),
                    globals.clone(),
                    envelope.output.clone().unwrap_or(serde_json::Value::Null),
                );
                let passes = match evaluator.evaluate(condition, &binding).await {
                    Ok(value) => value.as_bool().unwrap_or_else(|| !value.is_null()),
                    Err(_) => false,
                };
                if !passes {
                    continue;
                }
            }

            let Some(queue) = queues.get(&conn.to) else {
                tracing::warn!(target = %conn.to, "routed connection targets a node with no queue");
                continue;
            };

            let new_envelope = Envelope::new(
                envelope.kind,
                envelope.source_node_id.clone(),
                envelope.source_port.clone(),
                envelope.output.clone(),
            );
            if let Err(err) = queue.enqueue(new_envelope) {
                tracing::warn!(target = %conn.to, error = %err, "failed to enqueue routed message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::CircularMessageBuffer;
    use crate::models::MessageKind;
    use nodes::JsonPathEvaluator;
    use std::time::Duration;

    fn queues(ids: &[&str]) -> HashMap<String, Arc<NodeMessageQueue>> {
        ids.iter()
            .map(|id| {
                (
                    id.to_string(),
                    Arc::new(NodeMessageQueue::new(*id, CircularMessageBuffer::new(4, Duration::from_secs(10)))),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn routes_on_matching_kind() {
        let conns = vec![Connection::new("a", "b")];
        let router = MessageRouter::new(&conns);
        let queues = queues(&["b"]);
        let envelope = Envelope::new(MessageKind::Complete, "a", None, None);

        router
            .route(&envelope, &queues, &JsonPathEvaluator, &Globals::new(), Uuid::new_v4(), Uuid::new_v4())
            .await;

        let lease = queues["b"].lease(&nodes::CancelToken::new(), Duration::from_millis(10)).await;
        assert!(lease.is_some());
    }

    #[tokio::test]
    async fn does_not_route_on_mismatched_kind() {
        let conns = vec![Connection::new("a", "b").with_kind(MessageKind::Fail)];
        let router = MessageRouter::new(&conns);
        let queues = queues(&["b"]);
        let envelope = Envelope::new(MessageKind::Complete, "a", None, None);

        router
            .route(&envelope, &queues, &JsonPathEvaluator, &Globals::new(), Uuid::new_v4(), Uuid::new_v4())
            .await;

        let lease = queues["b"].lease(&nodes::CancelToken::new(), Duration::from_millis(10)).await;
        assert!(lease.is_none());
    }

    #[tokio::test]
    async fn condition_gates_routing() {
        let conns = vec![Connection::new("a", "b").with_condition("flag == true")];
        let router = MessageRouter::new(&conns);
        let queues = queues(&["b"]);
        let envelope = Envelope::new(MessageKind::Complete, "a", None, Some(serde_json::json!({ "flag": false })));

        router
            .route(&envelope, &queues, &JsonPathEvaluator, &Globals::new(), Uuid::new_v4(), Uuid::new_v4())
            .await;

        assert!(queues["b"].lease(&nodes::CancelToken::new(), Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn higher_priority_fires_before_lower() {
        let conns = vec![
            Connection::new("a", "low").with_priority(0),
            Connection::new("a", "high").with_priority(10),
        ];
        let router = MessageRouter::new(&conns);
        // Both present; this test only checks both still fire (priority
        // governs order of dispatch, not exclusivity) and the router
        // doesn't panic on multiple identical-kind targets.
        let queues = queues(&["low", "high"]);
        let envelope = Envelope::new(MessageKind::Complete, "a", None, None);
        router
            .route(&envelope, &queues, &JsonPathEvaluator, &Globals::new(), Uuid::new_v4(), Uuid::new_v4())
            .await;
        assert!(queues["low"].lease(&nodes::CancelToken::new(), Duration::from_millis(10)).await.is_some());
        assert!(queues["high"].lease(&nodes::CancelToken::new(), Duration::from_millis(10)).await.is_some());
    }
}
