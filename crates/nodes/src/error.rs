//! Node-level error type.

use thiserror::Error;

/// Errors returned by a node's `execute` method.
///
/// The engine uses the variant to decide what happens next:
/// - `Retryable` — the lease is abandoned and re-queued with back-off.
/// - `Fatal`     — the node instance is marked `Failed` immediately, no retry.
/// - `Cancelled` — the node observed cancellation and stopped cooperatively;
///   the node instance is marked `Cancelled`.
#[derive(Debug, Error, Clone)]
pub enum NodeError {
    /// Transient failure; the engine should re-try the job.
    #[error("retryable node error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal node error: {0}")]
    Fatal(String),

    /// The node observed cancellation and stopped before finishing.
    #[error("node cancelled: {0}")]
    Cancelled(String),
}
