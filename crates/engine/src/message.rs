//! The envelope that travels through a node message queue, and its slot
//! lifecycle inside the circular message buffer.

use serde_json::Value;
use std::time::Instant;
use uuid::Uuid;

use crate::models::MessageKind;

/// One message in flight toward a node's queue.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub id: Uuid,
    pub kind: MessageKind,
    pub source_node_id: String,
    pub source_port: Option<String>,
    /// Attached data — the emitting node's output snapshot for
    /// `Complete`/`Next`/`Progress`, `None` for a bare `Fail`.
    pub output: Option<Value>,
    /// Set only on `Fail`.
    pub error: Option<String>,
    pub created_at: Instant,
    /// How many times this envelope has been handed to a consumer,
    /// including the current lease if any. Starts at 0.
    pub enqueue_count: u32,
    pub lease_id: Option<Uuid>,
    /// Not eligible for checkout until this instant — the visibility
    /// timeout after a lease, or a retry backoff after an abandon.
    pub visible_after: Instant,
}

impl Envelope {
    pub fn new(
        kind: MessageKind,
        source_node_id: impl Into<String>,
        source_port: Option<String>,
        output: Option<Value>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            source_node_id: source_node_id.into(),
            source_port,
            output,
            error: None,
            created_at: now,
            enqueue_count: 0,
            lease_id: None,
            visible_after: now,
        }
    }

    pub fn fail(source_node_id: impl Into<String>, source_port: Option<String>, error: impl Into<String>) -> Self {
        let mut env = Self::new(MessageKind::Fail, source_node_id, source_port, None);
        env.error = Some(error.into());
        env
    }

    /// The synthetic message the engine seeds the entry queue with at the
    /// start of a run.
    pub fn seed() -> Self {
        Self::new(MessageKind::Complete, "__trigger__", None, None)
    }
}

/// A leased envelope, handed to a consumer by [`crate::queue::NodeMessageQueue::lease`].
#[derive(Debug, Clone)]
pub struct Lease {
    pub envelope: Envelope,
    pub lease_id: Uuid,
}

/// The three states a circular-buffer slot can be in. A fourth, logical
/// "Completed" state described by the data model is realized here as a
/// transition back to `Empty` — `Complete` frees the slot outright rather
/// than leaving a tombstone behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotStatus {
    Empty,
    Ready,
    InFlight,
}
