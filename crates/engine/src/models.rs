//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow looks like in
//! memory. Wire format — how they arrive from a file or an API request — is
//! out of scope here; callers build them directly and hand them to
//! [`crate::WorkflowEngine::start`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// The four message kinds a node's outcome translates into, and the four
/// kinds a [`Connection`] can gate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// The node finished its work; its primary, successful result.
    Complete,
    /// The node's own verdict on its invocation was failure (terminal, no
    /// retry follows).
    Fail,
    /// An auxiliary message a control-flow node emits alongside — or
    /// instead of — its own `Complete` (a `ForEach` item, a `While`
    /// loop-body trigger).
    Next,
    /// Informational, non-terminal progress.
    Progress,
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Backoff shape for [`RetryPolicy::compute_delay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryStrategy {
    /// No retry: the first `Retryable` error exhausts the budget.
    None,
    /// Always wait `initial_delay`.
    Fixed,
    /// `initial_delay * multiplier^(attempt - 1)`, capped at `max_delay`.
    Exponential,
    /// `initial_delay * attempt`, capped at `max_delay`.
    Linear,
}

/// Per-node retry configuration, consulted by the node message queue on
/// `AbandonLease`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub strategy: RetryStrategy,
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// If non-empty, only these error labels are retried; anything else is
    /// dead-lettered on first failure regardless of `max_attempts`.
    #[serde(default)]
    pub retry_on: Vec<String>,
    /// Error labels that are never retried, even if they'd otherwise match
    /// `retry_on` or fall under `max_attempts`.
    #[serde(default)]
    pub do_not_retry_on: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::Fixed,
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            retry_on: Vec::new(),
            do_not_retry_on: Vec::new(),
        }
    }
}

impl RetryPolicy {
    /// Whether an error labelled `label` is retryable at all, ignoring
    /// `max_attempts` — that part is the queue's job once this is `true`.
    pub fn allows_retry(&self, label: &str) -> bool {
        if self.do_not_retry_on.iter().any(|l| l == label) {
            return false;
        }
        if self.retry_on.is_empty() {
            return true;
        }
        self.retry_on.iter().any(|l| l == label)
    }

    /// Backoff before the `attempt`'th redelivery (1-based: the delay
    /// before a node is handed a message for the second time).
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let base = match self.strategy {
            RetryStrategy::None => return Duration::ZERO,
            RetryStrategy::Fixed => self.initial_delay,
            RetryStrategy::Exponential => {
                let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
                self.initial_delay.mul_f64(factor.max(0.0))
            }
            RetryStrategy::Linear => self.initial_delay.mul_f64(attempt.max(1) as f64),
        };
        base.min(self.max_delay)
    }

    /// Apply up to ±25% jitter to `delay`, given a caller-supplied random
    /// fraction in `[0.0, 1.0)`.
    pub fn jittered(delay: Duration, random_fraction: f64) -> Duration {
        let span = delay.as_secs_f64() * 0.25;
        let offset = (random_fraction * 2.0 - 1.0) * span;
        Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
    }
}

// ---------------------------------------------------------------------------
// NodeDefinition
// ---------------------------------------------------------------------------

/// What kind of runtime behaviour a node instantiates. Known kinds have a
/// built-in factory; anything else is `Custom`, resolved against whatever
/// the caller registered under that label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeKind {
    Script,
    Task,
    IfElse,
    Switch,
    ForEach,
    While,
    Subflow,
    Container,
    Custom(String),
}

impl RuntimeKind {
    pub fn parse(label: &str) -> Self {
        match label {
            "Script" => Self::Script,
            "Task" => Self::Task,
            "IfElse" => Self::IfElse,
            "Switch" => Self::Switch,
            "ForEach" => Self::ForEach,
            "While" => Self::While,
            "Subflow" => Self::Subflow,
            "Container" => Self::Container,
            other => Self::Custom(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Script => "Script",
            Self::Task => "Task",
            Self::IfElse => "IfElse",
            Self::Switch => "Switch",
            Self::ForEach => "ForEach",
            Self::While => "While",
            Self::Subflow => "Subflow",
            Self::Container => "Container",
            Self::Custom(label) => label,
        }
    }
}

/// A single step in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Unique identifier within this workflow (referenced by connections).
    pub id: String,
    pub name: String,
    /// Maps to a registered node factory; see [`RuntimeKind::parse`].
    pub runtime_type: String,
    /// Arbitrary configuration passed to the node at initialization time.
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default)]
    pub max_concurrent_executions: Option<usize>,
}

impl NodeDefinition {
    pub fn kind(&self) -> RuntimeKind {
        RuntimeKind::parse(&self.runtime_type)
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A directed edge between two nodes, gated on message kind, ports, and an
/// optional condition expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub from: String,
    pub to: String,
    #[serde(default = "default_trigger_kind")]
    pub trigger_kind: MessageKind,
    #[serde(default)]
    pub source_port: Option<String>,
    #[serde(default)]
    pub target_port: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
}

fn default_trigger_kind() -> MessageKind {
    MessageKind::Complete
}

fn default_true() -> bool {
    true
}

impl Connection {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            trigger_kind: MessageKind::Complete,
            source_port: None,
            target_port: None,
            condition: None,
            enabled: true,
            priority: 0,
        }
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.trigger_kind = kind;
        self
    }

    pub fn with_source_port(mut self, port: impl Into<String>) -> Self {
        self.source_port = Some(port.into());
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A complete, runnable workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub nodes: Vec<NodeDefinition>,
    pub connections: Vec<Connection>,
    /// Which node receives the synthetic seed message at start. `None`
    /// means "the one node with no incoming connection" — the validator
    /// rejects the ambiguous case of more than one such node.
    #[serde(default)]
    pub entry_point_node_id: Option<String>,
    #[serde(default)]
    pub default_variables: Option<Value>,
    #[serde(default)]
    pub timeout: Option<Duration>,
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    /// Convenience constructor for testing.
    pub fn new(name: impl Into<String>, nodes: Vec<NodeDefinition>, connections: Vec<Connection>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            nodes,
            connections,
            entry_point_node_id: None,
            default_variables: None,
            timeout: None,
            created_at: Utc::now(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.id == id)
    }
}
