//! Run state held by the supervisor between supersteps.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::node::{ErrorRecord, NodeExecution};
use crate::runtime::checkpoint::Checkpoint;
use crate::state::{StatePatch, WorkflowState};
use crate::types::{NodeId, RunStatus};

/// In-memory state of one workflow run.
///
/// Everything here except `created_at` is reconstructed verbatim from the
/// latest checkpoint on resume.
#[derive(Clone, Debug)]
pub struct WorkflowRun {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub state: WorkflowState,
    pub history: Vec<NodeExecution>,
    pub status: RunStatus,
    /// Number of the last completed superstep; 0 before any ran.
    pub step: u64,
}

impl WorkflowRun {
    /// Fresh run seeded with the initial input.
    #[must_use]
    pub fn new(run_id: String, input: StatePatch) -> Self {
        Self {
            run_id,
            created_at: Utc::now(),
            state: WorkflowState::with_input(input),
            history: Vec::new(),
            status: RunStatus::Pending,
            step: 0,
        }
    }

    /// Rebuild a run from its latest checkpoint.
    #[must_use]
    pub fn from_checkpoint(checkpoint: Checkpoint) -> Self {
        Self {
            run_id: checkpoint.run_id,
            created_at: checkpoint.created_at,
            state: checkpoint.state,
            history: checkpoint.history,
            status: checkpoint.status,
            step: checkpoint.step,
        }
    }

    /// Snapshot this run as a checkpoint at its current step.
    #[must_use]
    pub fn to_checkpoint(&self) -> Checkpoint {
        Checkpoint {
            run_id: self.run_id.clone(),
            step: self.step,
            state: self.state.clone(),
            history: self.history.clone(),
            status: self.status,
            created_at: Utc::now(),
        }
    }
}

/// Whether a supervisor run handle was created fresh or restored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunInit {
    Fresh,
    Resumed { checkpoint_step: u64 },
}

/// Final report returned by
/// [`run_until_complete`](crate::runtime::RunSupervisor::run_until_complete).
#[derive(Clone, Debug)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    /// Supersteps completed.
    pub steps: u64,
    /// Full per-node execution history with timings and attempt counts.
    pub history: Vec<NodeExecution>,
    pub state_version: u64,
    /// Final state contents.
    pub outputs: FxHashMap<String, Value>,
    /// The error that ended the run, for failed runs.
    pub failure: Option<ErrorRecord>,
}

impl RunReport {
    #[must_use]
    pub fn from_run(run: &WorkflowRun) -> Self {
        let failure = run
            .history
            .iter()
            .rev()
            .find_map(|e| e.error.clone())
            .filter(|_| run.status == RunStatus::Failed);
        Self {
            run_id: run.run_id.clone(),
            status: run.status,
            steps: run.step,
            history: run.history.clone(),
            state_version: run.state.version(),
            outputs: run.state.data().clone(),
            failure,
        }
    }

    #[must_use]
    pub fn output(&self, key: &str) -> Option<&Value> {
        self.outputs.get(key)
    }

    /// Total handler invocations recorded for a node across the run.
    #[must_use]
    pub fn attempts_for(&self, node: &NodeId) -> u32 {
        self.history
            .iter()
            .filter(|e| &e.node == node)
            .map(|e| e.attempts)
            .sum()
    }
}
