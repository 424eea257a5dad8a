//! Versioned workflow state with conflict-checked patch application.
//!
//! The engine owns a single [`WorkflowState`]: a JSON-valued key/value map
//! plus a version counter. Handlers never touch it directly; they receive an
//! immutable [`StateSnapshot`] and return a [`StatePatch`], and the executor
//! merges all patches of a superstep atomically through
//! [`WorkflowState::apply`].
//!
//! # Versioning
//!
//! The version starts at 0, becomes 1 when the initial input is applied, and
//! bumps exactly once per merged superstep regardless of how many sibling
//! patches it contained. A failed merge leaves both data and version
//! untouched.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::NodeId;

/// Error raised when a superstep merge cannot be applied.
#[derive(Debug, Error, Diagnostic)]
pub enum StateError {
    /// Two sibling nodes of the same superstep wrote the same key.
    ///
    /// The merge is rejected wholesale; there is no partial application and
    /// no last-writer-wins.
    #[error("state patch conflict on key '{key}': written by both '{first}' and '{second}'")]
    #[diagnostic(
        code(phaseloom::state::patch_conflict),
        help("Parallel nodes must write disjoint keys. Namespace per-node outputs or merge them in a downstream node.")
    )]
    PatchConflict {
        key: String,
        first: NodeId,
        second: NodeId,
    },
}

/// A set of key/value writes produced by one node invocation.
///
/// Patches are the only mutation vehicle in the engine. A patch replaces
/// the value of each key it names; keys it does not name are untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatePatch(FxHashMap<String, Value>);

impl StatePatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fluent single-entry constructor, handy in handlers and tests.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl FromIterator<(String, Value)> for StatePatch {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Immutable view of the state handed to handlers and the router.
///
/// Taken once at the start of a superstep; every sibling of that superstep
/// observes this same snapshot, never each other's writes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub data: FxHashMap<String, Value>,
    pub version: u64,
}

impl StateSnapshot {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Boolean flag lookup: absent keys and non-boolean values read as `false`.
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        self.data.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

/// The authoritative run state: data map plus monotonically increasing
/// version.
///
/// Only the executor mutates this, and only through [`apply`](Self::apply).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    data: FxHashMap<String, Value>,
    version: u64,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowState {
    /// Empty state at version 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: FxHashMap::default(),
            version: 0,
        }
    }

    /// State seeded with the run's initial input, at version 1.
    #[must_use]
    pub fn with_input(input: StatePatch) -> Self {
        let mut state = Self::new();
        if !input.is_empty() {
            state.data.extend(input.0);
        }
        state.version = 1;
        state
    }

    /// Rebuild a state from persisted parts. Used when restoring from a
    /// checkpoint.
    #[must_use]
    pub fn from_parts(data: FxHashMap<String, Value>, version: u64) -> Self {
        Self { data, version }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn data(&self) -> &FxHashMap<String, Value> {
        &self.data
    }

    /// Take an immutable snapshot of the current state.
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            data: self.data.clone(),
            version: self.version,
        }
    }

    /// Merge the patches of one superstep atomically.
    ///
    /// All patches are validated for cross-patch key conflicts before any
    /// write happens. On success every entry is applied and the version is
    /// bumped exactly once; the new version is returned. On conflict the
    /// state is left exactly as it was.
    ///
    /// A single patch overwriting an existing state key is fine; only two
    /// *sibling* patches naming the same key conflict.
    pub fn apply(&mut self, patches: &[(NodeId, StatePatch)]) -> Result<u64, StateError> {
        let mut writers: FxHashMap<&str, &NodeId> = FxHashMap::default();
        for (node, patch) in patches {
            for key in patch.keys() {
                if let Some(first) = writers.insert(key.as_str(), node) {
                    return Err(StateError::PatchConflict {
                        key: key.clone(),
                        first: first.clone(),
                        second: node.clone(),
                    });
                }
            }
        }

        for (_, patch) in patches {
            for (key, value) in patch.iter() {
                self.data.insert(key.clone(), value.clone());
            }
        }
        self.version += 1;
        Ok(self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(name: &str) -> NodeId {
        NodeId::Named(name.to_string())
    }

    #[test]
    fn with_input_starts_at_version_one() {
        let state = WorkflowState::with_input(StatePatch::new().with("task", json!("fix bug")));
        assert_eq!(state.version(), 1);
        assert_eq!(state.get("task"), Some(&json!("fix bug")));
    }

    #[test]
    fn apply_bumps_version_once_per_superstep() {
        let mut state = WorkflowState::with_input(StatePatch::new());
        let patches = vec![
            (node("a"), StatePatch::new().with("x", json!(1))),
            (node("b"), StatePatch::new().with("y", json!(2))),
        ];
        let v = state.apply(&patches).unwrap();
        assert_eq!(v, 2);
        assert_eq!(state.version(), 2);
    }

    #[test]
    fn conflict_leaves_state_untouched() {
        let mut state = WorkflowState::with_input(StatePatch::new().with("keep", json!(true)));
        let before = state.clone();
        let patches = vec![
            (node("a"), StatePatch::new().with("dup", json!(1))),
            (node("b"), StatePatch::new().with("dup", json!(2))),
        ];
        let err = state.apply(&patches).unwrap_err();
        assert!(matches!(err, StateError::PatchConflict { ref key, .. } if key == "dup"));
        assert_eq!(state, before);
    }

    #[test]
    fn single_patch_may_overwrite_existing_key() {
        let mut state = WorkflowState::with_input(StatePatch::new().with("status", json!("old")));
        let patches = vec![(node("a"), StatePatch::new().with("status", json!("new")))];
        state.apply(&patches).unwrap();
        assert_eq!(state.get("status"), Some(&json!("new")));
    }

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let mut state = WorkflowState::with_input(StatePatch::new().with("k", json!("v1")));
        let snap = state.snapshot();
        state
            .apply(&[(node("a"), StatePatch::new().with("k", json!("v2")))])
            .unwrap();
        assert_eq!(snap.get_str("k"), Some("v1"));
        assert_eq!(snap.version, 1);
        assert_eq!(state.version(), 2);
    }
}
