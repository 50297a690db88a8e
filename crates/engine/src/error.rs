//! Engine-level error types.

use thiserror::Error;

use crate::validator::ValidationReport;

/// Errors produced by the workflow engine — validating a definition,
/// compiling it into runnable queues, and driving a run to completion.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The workflow definition itself is malformed (missing id, no nodes,
    /// out-of-range `MaxConcurrency`/`TimeoutSeconds`, missing required
    /// per-node-kind configuration).
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Structural validation failed — duplicate node ids, dangling
    /// connection endpoints, disallowed cycles, missing entry point.
    #[error("graph validation failed: {0}")]
    GraphError(#[from] ValidationReport),

    /// The definition is well-formed but something about turning it into
    /// runnable state failed (e.g. an unknown `RuntimeType` with no
    /// registered factory).
    #[error("compilation error: {0}")]
    CompilationError(String),

    /// A node raised an error the engine could not contain — propagation
    /// out of a `Start` node, or a lease operation against a vanished slot.
    #[error("runtime error: {0}")]
    RuntimeError(String),

    /// The run's overall timeout elapsed before all consumers terminated.
    #[error("workflow run timed out after {0:?}")]
    TimeoutError(std::time::Duration),

    /// A bounded resource (the circular buffer, a concurrency permit) was
    /// exhausted and the caller's request could not be satisfied.
    #[error("resource budget exhausted: {0}")]
    BudgetError(String),

    /// The run (or a nested subflow/container) was cooperatively cancelled.
    #[error("run cancelled: {0}")]
    CancelledError(String),

    /// A lease-scoped operation (`CompleteLease`/`AbandonLease`) referenced
    /// a lease id the buffer no longer recognizes — it already expired and
    /// was reaped, or was completed twice.
    #[error("stale lease: {0}")]
    StaleLease(String),
}
