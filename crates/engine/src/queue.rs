//! A node message queue: one [`CircularMessageBuffer`] plus a waiter so
//! consumers can block until something becomes available instead of
//! busy-polling.

use std::time::{Duration, Instant};
use tokio::sync::Notify;
use uuid::Uuid;

use nodes::CancelToken;

use crate::buffer::{BufferError, CircularMessageBuffer};
use crate::deadletter::DeadLetterSink;
use crate::message::{Envelope, Lease};
use crate::models::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// What became of a lease handed to [`NodeMessageQueue::abandon_lease`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonOutcome {
    /// Re-armed for delivery after its back-off delay.
    Redelivered,
    /// Retry budget exhausted (or the error was excluded from retry); the
    /// envelope was handed to the dead-letter sink and the slot freed.
    DeadLettered,
}

/// How often a blocked `lease` re-checks the buffer while waiting on the
/// notifier — a safety net against a missed wakeup, not the primary signal.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct NodeMessageQueue {
    node_id: String,
    buffer: CircularMessageBuffer,
    notify: Notify,
}

impl NodeMessageQueue {
    pub fn new(node_id: impl Into<String>, buffer: CircularMessageBuffer) -> Self {
        Self {
            node_id: node_id.into(),
            buffer,
            notify: Notify::new(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn enqueue(&self, envelope: Envelope) -> Result<(), QueueError> {
        self.buffer.insert(envelope)?;
        self.notify.notify_one();
        Ok(())
    }

    /// Block (cooperatively, respecting `cancel`) until a message is
    /// available or `idle_timeout` elapses with nothing delivered.
    pub async fn lease(&self, cancel: &CancelToken, idle_timeout: Duration) -> Option<Lease> {
        let deadline = Instant::now() + idle_timeout;
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            if let Some(lease) = self.buffer.checkout(Instant::now()) {
                return Some(lease);
            }
            if Instant::now() >= deadline {
                return None;
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    pub fn complete_lease(&self, lease_id: Uuid) -> Result<(), QueueError> {
        self.buffer.complete(lease_id)?;
        Ok(())
    }

    /// Either schedule `lease` for redelivery, or — if its retry budget
    /// under `policy` is exhausted, or `error_label` is excluded from
    /// retry — hand it to `dead_letter` and free the slot outright.
    pub fn abandon_lease(
        &self,
        lease: Lease,
        policy: &RetryPolicy,
        error_label: &str,
        dead_letter: &DeadLetterSink,
    ) -> Result<AbandonOutcome, QueueError> {
        let attempt = lease.envelope.enqueue_count + 1;
        let exhausted = attempt > policy.max_attempts || !policy.allows_retry(error_label);

        if exhausted {
            dead_letter.record(&self.node_id, lease.envelope.clone(), error_label.to_string());
            self.buffer.complete(lease.lease_id)?;
            Ok(AbandonOutcome::DeadLettered)
        } else {
            let delay = policy.compute_delay(attempt);
            self.buffer.abandon_with_delay(lease.lease_id, delay)?;
            self.notify.notify_one();
            Ok(AbandonOutcome::Redelivered)
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }
}
