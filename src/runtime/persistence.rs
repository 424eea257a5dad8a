/*!
Persistence primitives for serializing/deserializing run state and
checkpoints (used by the SQLite store and any future durable backends).

Design goals:
- Explicit serde-friendly structs decoupled from in-memory representations.
- Conversion logic localized in From / TryFrom impls so store code stays
  lean and declarative.
- Timestamps persisted as RFC3339 strings, readable without this crate.

This module performs no I/O; it is pure data transformation glue.
*/

use chrono::Utc;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::node::NodeExecution;
use crate::runtime::checkpoint::Checkpoint;
use crate::state::WorkflowState;
use crate::types::RunStatus;

/// Conversion and serialization errors for persistence models.
#[derive(Debug, Error, Diagnostic)]
pub enum PersistenceError {
    #[error("unknown run status: {0}")]
    #[diagnostic(
        code(phaseloom::persistence::unknown_status),
        help("The stored status string does not match any known run status.")
    )]
    UnknownStatus(String),

    #[error("invalid timestamp: {0}")]
    #[diagnostic(
        code(phaseloom::persistence::invalid_timestamp),
        help("Stored timestamps must be RFC3339 strings.")
    )]
    InvalidTimestamp(String),

    #[error("JSON serialization/deserialization failed: {source}")]
    #[diagnostic(
        code(phaseloom::persistence::serde),
        help("Ensure the JSON structure matches the Persisted* types.")
    )]
    Serde {
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Persisted shape of the in-memory [`WorkflowState`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedState {
    pub version: u64,
    #[serde(default)]
    pub data: FxHashMap<String, Value>,
}

/// Full persisted checkpoint representation.
///
/// Step history tables store one instance of this shape per row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedCheckpoint {
    pub run_id: String,
    pub step: u64,
    pub state: PersistedState,
    #[serde(default)]
    pub history: Vec<NodeExecution>,
    /// Lowercase status string, matching [`RunStatus`]'s display form.
    pub status: String,
    /// RFC3339 string form of creation time.
    pub created_at: String,
}

impl PersistedState {
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| PersistenceError::Serde { source: e })
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| PersistenceError::Serde { source: e })
    }
}

/* ---------- WorkflowState <-> PersistedState ---------- */

impl From<&WorkflowState> for PersistedState {
    fn from(s: &WorkflowState) -> Self {
        PersistedState {
            version: s.version(),
            data: s.data().clone(),
        }
    }
}

impl From<PersistedState> for WorkflowState {
    fn from(p: PersistedState) -> Self {
        WorkflowState::from_parts(p.data, p.version)
    }
}

/* ---------- RunStatus <-> status string ---------- */

pub(crate) fn status_from_str(s: &str) -> Result<RunStatus> {
    match s {
        "pending" => Ok(RunStatus::Pending),
        "running" => Ok(RunStatus::Running),
        "succeeded" => Ok(RunStatus::Succeeded),
        "failed" => Ok(RunStatus::Failed),
        "cancelled" => Ok(RunStatus::Cancelled),
        other => Err(PersistenceError::UnknownStatus(other.to_string())),
    }
}

/* ---------- Checkpoint <-> PersistedCheckpoint ---------- */

impl From<&Checkpoint> for PersistedCheckpoint {
    fn from(cp: &Checkpoint) -> Self {
        PersistedCheckpoint {
            run_id: cp.run_id.clone(),
            step: cp.step,
            state: PersistedState::from(&cp.state),
            history: cp.history.clone(),
            status: cp.status.to_string(),
            created_at: cp.created_at.to_rfc3339(),
        }
    }
}

impl TryFrom<PersistedCheckpoint> for Checkpoint {
    type Error = PersistenceError;

    fn try_from(p: PersistedCheckpoint) -> Result<Self> {
        let status = status_from_str(&p.status)?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&p.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| PersistenceError::InvalidTimestamp(p.created_at.clone()))?;
        Ok(Checkpoint {
            run_id: p.run_id,
            step: p.step,
            state: WorkflowState::from(p.state),
            history: p.history,
            status,
            created_at,
        })
    }
}
