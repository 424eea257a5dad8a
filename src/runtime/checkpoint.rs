//! Checkpoint store contract and the in-memory backend.
//!
//! A checkpoint captures everything needed to resume a run: the versioned
//! state, the execution history, the run status, and the superstep number
//! it was taken at. Checkpoints are written only after a superstep fully
//! completes (and once at step 0 when the run is created), so a resumed
//! run never observes a half-applied superstep.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::node::NodeExecution;
use crate::state::WorkflowState;
use crate::types::RunStatus;

/// Errors surfaced by checkpoint backends.
#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointError {
    #[error("checkpoint backend error: {message}")]
    #[diagnostic(code(phaseloom::checkpoint::backend))]
    Backend { message: String },

    #[error("checkpoint serialization error: {message}")]
    #[diagnostic(code(phaseloom::checkpoint::serialization))]
    Serialization { message: String },
}

/// A durable snapshot of a run at a superstep boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub step: u64,
    pub state: WorkflowState,
    pub history: Vec<NodeExecution>,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
}

/// Listing entry describing one stored step of a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMetadata {
    pub step: u64,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
}

/// Persistence contract for run checkpoints.
///
/// `save` must be durable before it returns; the executor treats a
/// returned `Ok` as permission to consider the superstep committed.
/// Saving the same `(run_id, step)` twice replaces the stored checkpoint,
/// which is how terminal status updates land without adding a step.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError>;

    /// Latest checkpoint of a run by step number, or `None` for an unknown
    /// run.
    async fn load_latest(&self, run_id: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Stored steps of a run, ordered by step ascending.
    async fn list_steps(&self, run_id: &str) -> Result<Vec<StepMetadata>, CheckpointError>;

    /// All run ids known to the store.
    async fn list_runs(&self) -> Result<Vec<String>, CheckpointError>;
}

/// Process-local checkpoint store for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    runs: Mutex<FxHashMap<String, Vec<Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        let mut runs = self.runs.lock();
        let steps = runs.entry(checkpoint.run_id.clone()).or_default();
        match steps.iter_mut().find(|c| c.step == checkpoint.step) {
            Some(existing) => *existing = checkpoint,
            None => {
                steps.push(checkpoint);
                steps.sort_by_key(|c| c.step);
            }
        }
        Ok(())
    }

    async fn load_latest(&self, run_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self
            .runs
            .lock()
            .get(run_id)
            .and_then(|steps| steps.last().cloned()))
    }

    async fn list_steps(&self, run_id: &str) -> Result<Vec<StepMetadata>, CheckpointError> {
        Ok(self
            .runs
            .lock()
            .get(run_id)
            .map(|steps| {
                steps
                    .iter()
                    .map(|c| StepMetadata {
                        step: c.step,
                        status: c.status,
                        created_at: c.created_at,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_runs(&self) -> Result<Vec<String>, CheckpointError> {
        let mut ids: Vec<String> = self.runs.lock().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
