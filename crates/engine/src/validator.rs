//! Workflow structural validation — run this before `WorkflowEngine::start`
//! compiles a definition into runnable queues.
//!
//! Rules enforced as errors:
//! 1. The workflow has at least one node.
//! 2. Node ids are unique.
//! 3. `MaxConcurrentExecutions`, if set on a node, is non-zero.
//! 4. Every `RuntimeType` that has required configuration fields (`Script`/
//!    `Task` need `script`, `IfElse` needs `condition`, `Switch` needs
//!    `expression` and `cases`, `ForEach` needs `collectionExpression`,
//!    `While` needs `condition`) has them.
//! 5. Every connection's `from`/`to` references a node that exists.
//! 6. There is exactly one usable entry point; an explicit
//!    `entry_point_node_id` must reference a declared node.
//! 7. The graph is acyclic — except for feedback edges that target a
//!    `While` node, which are how a loop re-triggers its own condition
//!    check and are expected to close a cycle.
//! 8. No connection fires on a `While` node's `Complete` message while
//!    `source_port` is the `"IterationCheck"` sentinel (mirrors
//!    `control::while_loop::ITERATION_CHECK_PORT`) — that port exists only
//!    to keep the engine from treating a mid-loop `Complete` as a real exit.
//!
//! And as warnings (non-fatal, surfaced for the caller to act on):
//! - A node with an empty name.
//! - A connection whose `from` and `to` are the same node (outside the
//!   `While` feedback exception).
//! - More than one node with no incoming connection when no explicit
//!   `entry_point_node_id` was set — the validator defaults to the first
//!   one declared, but this is almost always a graph-authoring mistake.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use thiserror::Error;

use crate::models::{MessageKind, RuntimeKind, Workflow};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("workflow has no nodes")]
    NoNodes,
    #[error("duplicate node id: '{0}'")]
    DuplicateNodeId(String),
    #[error("node '{0}' has a zero MaxConcurrentExecutions")]
    NegativeMaxConcurrency(String),
    #[error("node '{node_id}' ({runtime_type}) is missing required configuration field '{field}'")]
    MissingRequiredConfig {
        node_id: String,
        runtime_type: String,
        field: &'static str,
    },
    #[error("connection #{index} references unknown node '{node_id}' ({side} side)")]
    UnknownConnectionEndpoint {
        index: usize,
        node_id: String,
        side: &'static str,
    },
    #[error("workflow has no usable entry point")]
    MissingEntryPoint,
    #[error("entry_point_node_id '{0}' does not reference any declared node")]
    UnknownEntryPoint(String),
    #[error("workflow graph contains a disallowed cycle among: {0:?}")]
    DisallowedCycle(Vec<String>),
    #[error("connection #{index} routes on While node '{node_id}'s IterationCheck sentinel port, which is reserved for the engine's internal loop re-entry and can never be a downstream Complete route")]
    IterationCheckPortRouted { index: usize, node_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    EmptyName(String),
    SelfReferencingConnection(String),
    AmbiguousEntryPoint(Vec<String>),
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyName(id) => write!(f, "node '{id}' has an empty name"),
            Self::SelfReferencingConnection(id) => write!(f, "node '{id}' has a connection to itself"),
            Self::AmbiguousEntryPoint(ids) => write!(
                f,
                "multiple candidate entry points {ids:?}; defaulting to the first declared"
            ),
        }
    }
}

/// The result of [`validate`]: all errors and warnings found, plus the
/// resolved entry point id when validation succeeds.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
    pub resolved_entry_point: Option<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", messages.join("; "))
    }
}

impl std::error::Error for ValidationReport {}

pub fn validate(workflow: &Workflow) -> ValidationReport {
    let mut report = ValidationReport::default();

    if workflow.nodes.is_empty() {
        report.errors.push(ValidationError::NoNodes);
        return report;
    }

    let mut seen_ids: HashSet<&str> = HashSet::new();
    for node in &workflow.nodes {
        if !seen_ids.insert(node.id.as_str()) {
            report.errors.push(ValidationError::DuplicateNodeId(node.id.clone()));
        }
        if node.name.trim().is_empty() {
            report.warnings.push(ValidationWarning::EmptyName(node.id.clone()));
        }
        if let Some(max) = node.max_concurrent_executions {
            if max == 0 {
                report.errors.push(ValidationError::NegativeMaxConcurrency(node.id.clone()));
            }
        }
        check_required_config(node, &mut report);
    }

    let node_ids: HashSet<&str> = workflow.nodes.iter().map(|n| n.id.as_str()).collect();
    for (index, conn) in workflow.connections.iter().enumerate() {
        if !node_ids.contains(conn.from.as_str()) {
            report.errors.push(ValidationError::UnknownConnectionEndpoint {
                index,
                node_id: conn.from.clone(),
                side: "from",
            });
        }
        if !node_ids.contains(conn.to.as_str()) {
            report.errors.push(ValidationError::UnknownConnectionEndpoint {
                index,
                node_id: conn.to.clone(),
                side: "to",
            });
        }
        let is_while_feedback = workflow.node(&conn.to).map(|n| n.kind()) == Some(RuntimeKind::While);
        if conn.from == conn.to && !is_while_feedback {
            report
                .warnings
                .push(ValidationWarning::SelfReferencingConnection(conn.from.clone()));
        }

        let from_is_while = workflow.node(&conn.from).map(|n| n.kind()) == Some(RuntimeKind::While);
        if from_is_while
            && conn.trigger_kind == MessageKind::Complete
            && conn.source_port.as_deref() == Some("IterationCheck")
        {
            report.errors.push(ValidationError::IterationCheckPortRouted {
                index,
                node_id: conn.from.clone(),
            });
        }
    }

    if !report.errors.is_empty() {
        return report;
    }

    resolve_entry_point(workflow, &mut report);
    check_cycles(workflow, &mut report);

    report
}

fn check_required_config(node: &crate::models::NodeDefinition, report: &mut ValidationReport) {
    let required: &[&str] = match node.kind() {
        RuntimeKind::Script | RuntimeKind::Task => &["script"],
        RuntimeKind::IfElse => &["condition"],
        RuntimeKind::Switch => &["expression", "cases"],
        RuntimeKind::ForEach => &["collectionExpression"],
        RuntimeKind::While => &["condition"],
        RuntimeKind::Subflow => &["workflow"],
        _ => &[],
    };
    for field in required {
        if node.config.get(field).is_none() {
            report.errors.push(ValidationError::MissingRequiredConfig {
                node_id: node.id.clone(),
                runtime_type: node.runtime_type.clone(),
                field,
            });
        }
    }
}

fn resolve_entry_point(workflow: &Workflow, report: &mut ValidationReport) {
    if let Some(explicit) = &workflow.entry_point_node_id {
        if workflow.node(explicit).is_none() {
            report.errors.push(ValidationError::UnknownEntryPoint(explicit.clone()));
            return;
        }
        report.resolved_entry_point = Some(explicit.clone());
        return;
    }

    // A feedback edge back onto a `While` node doesn't disqualify the
    // `While` itself from being an entry point — it's the loop's own
    // re-entry, not a "something upstream always triggers me first" edge.
    let targets: HashSet<&str> = workflow
        .connections
        .iter()
        .filter(|c| workflow.node(&c.to).map(|n| n.kind()) != Some(RuntimeKind::While))
        .map(|c| c.to.as_str())
        .collect();
    let candidates: Vec<&str> = workflow
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| !targets.contains(id))
        .collect();

    match candidates.len() {
        0 => report.errors.push(ValidationError::MissingEntryPoint),
        1 => report.resolved_entry_point = Some(candidates[0].to_string()),
        _ => {
            report.warnings.push(ValidationWarning::AmbiguousEntryPoint(
                candidates.iter().map(|s| s.to_string()).collect(),
            ));
            report.resolved_entry_point = Some(candidates[0].to_string());
        }
    }
}

/// Kahn's algorithm, excluding feedback edges that target a `While` node —
/// those are expected to close a cycle back onto the loop's own condition
/// check and are not a graph-authoring mistake.
fn check_cycles(workflow: &Workflow, report: &mut ValidationReport) {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();

    for node in &workflow.nodes {
        adjacency.entry(node.id.as_str()).or_default();
        in_degree.entry(node.id.as_str()).or_insert(0);
    }

    for conn in &workflow.connections {
        if conn.trigger_kind != MessageKind::Complete && conn.trigger_kind != MessageKind::Next {
            continue;
        }
        let targets_while = workflow.node(&conn.to).map(|n| n.kind()) == Some(RuntimeKind::While);
        if targets_while {
            continue;
        }
        adjacency.entry(conn.from.as_str()).or_default().push(conn.to.as_str());
        *in_degree.entry(conn.to.as_str()).or_insert(0) += 1;
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut visited = 0;

    while let Some(node_id) = queue.pop_front() {
        visited += 1;
        if let Some(neighbours) = adjacency.get(node_id) {
            for &neighbour in neighbours {
                let deg = in_degree.entry(neighbour).or_insert(0);
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(neighbour);
                }
            }
        }
    }

    if visited != workflow.nodes.len() {
        let stuck: Vec<String> = in_degree
            .into_iter()
            .filter(|&(_, deg)| deg > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        report.errors.push(ValidationError::DisallowedCycle(stuck));
    }
}
