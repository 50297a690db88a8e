//! The run-scoped globals map shared by every node in a workflow run.
//!
//! Concurrent-safe for single-key put/get (backed by `dashmap`, the same
//! lock-free-striped-map crate the wider automation-engine family in this
//! codebase reaches for). Bulk iteration (`snapshot`) takes a point-in-time
//! copy rather than holding the map locked.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

/// Keys beginning with `__` are reserved for engine diagnostics
/// (`__error`, `__node_errors`) — callers should not rely on them staying
/// stable, and nodes should avoid writing under this prefix.
pub const RESERVED_PREFIX: &str = "__";

#[derive(Debug, Clone, Default)]
pub struct Globals(Arc<DashMap<String, Value>>);

impl Globals {
    pub fn new() -> Self {
        Self(Arc::new(DashMap::new()))
    }

    /// Seed a fresh globals map from an initial set of values (used both at
    /// workflow start and when a `Subflow` builds its child's isolated map).
    pub fn from_map(values: impl IntoIterator<Item = (String, Value)>) -> Self {
        let map = DashMap::new();
        for (k, v) in values {
            map.insert(k, v);
        }
        Self(Arc::new(map))
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.get(key).map(|v| v.clone())
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Point-in-time snapshot for bulk iteration (e.g. projecting a child
    /// Subflow's globals back to the parent via `OutputMappings`).
    pub fn snapshot(&self) -> std::collections::HashMap<String, Value> {
        self.0
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}
