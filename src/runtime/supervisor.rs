//! Run supervisor: lifecycle management for workflow runs.
//!
//! The [`RunSupervisor`] owns the checkpoint store, the live run table,
//! and one cancel token per run. It validates the graph before a run is
//! created (an invalid graph fails [`start`](RunSupervisor::start) with
//! zero checkpoints written), restores runs from their latest checkpoint
//! on [`resume`](RunSupervisor::resume), and drives supersteps either one
//! at a time ([`step`](RunSupervisor::step)) or to completion
//! ([`run_until_complete`](RunSupervisor::run_until_complete)).

use std::sync::Arc;
use std::time::Instant;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use crate::graph::{GraphError, WorkflowGraph};
use crate::node::{CancelToken, ErrorKind, ErrorRecord};
use crate::runtime::checkpoint::{CheckpointError, CheckpointStore, InMemoryCheckpointStore};
use crate::runtime::config::{CheckpointStoreType, RuntimeConfig};
use crate::runtime::executor::{Executor, ExecutorError, StepReport};
use crate::runtime::run::{RunInit, RunReport, WorkflowRun};
use crate::state::StatePatch;
use crate::types::RunStatus;

#[derive(Debug, Error, Diagnostic)]
pub enum SupervisorError {
    #[error("run not found: {run_id}")]
    #[diagnostic(
        code(phaseloom::supervisor::run_not_found),
        help("Start a run first, or resume one the checkpoint store knows about.")
    )]
    UnknownRun { run_id: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Owns run lifecycles for one compiled graph.
pub struct RunSupervisor {
    graph: Arc<WorkflowGraph>,
    executor: Executor,
    checkpointer: Arc<dyn CheckpointStore>,
    runs: FxHashMap<String, WorkflowRun>,
    cancels: FxHashMap<String, CancelToken>,
    config: RuntimeConfig,
}

impl RunSupervisor {
    /// Build a supervisor with the store named by the config.
    pub async fn new(
        graph: WorkflowGraph,
        config: RuntimeConfig,
    ) -> Result<Self, SupervisorError> {
        let checkpointer: Arc<dyn CheckpointStore> = match config.checkpointer {
            CheckpointStoreType::InMemory => Arc::new(InMemoryCheckpointStore::new()),
            #[cfg(feature = "sqlite")]
            CheckpointStoreType::Sqlite => {
                let db_name = config
                    .sqlite_db_name
                    .clone()
                    .unwrap_or_else(|| "phaseloom.db".to_string());
                Arc::new(
                    crate::runtime::checkpoint_sqlite::SqliteCheckpointStore::open(&db_name)
                        .await?,
                )
            }
        };
        Ok(Self::with_store(graph, checkpointer, config))
    }

    /// Build a supervisor around an existing store.
    ///
    /// Lets several supervisors (or a restarted process) share one durable
    /// store, which is the resume path in practice.
    #[must_use]
    pub fn with_store(
        graph: WorkflowGraph,
        checkpointer: Arc<dyn CheckpointStore>,
        config: RuntimeConfig,
    ) -> Self {
        let graph = Arc::new(graph);
        let executor = Executor::new(Arc::clone(&graph), Arc::clone(&checkpointer));
        Self {
            graph,
            executor,
            checkpointer,
            runs: FxHashMap::default(),
            cancels: FxHashMap::default(),
            config,
        }
    }

    /// Create a run from an initial input patch.
    ///
    /// Validates the graph first: a structurally broken graph fails here
    /// and nothing is written to the store. On success the run is
    /// checkpointed at step 0 with status pending, so it is resumable from
    /// the moment this returns.
    #[instrument(skip(self, input), err)]
    pub async fn start(&mut self, input: StatePatch) -> Result<String, SupervisorError> {
        self.graph.validate()?;

        let run_id = Uuid::new_v4().to_string();
        let run = WorkflowRun::new(run_id.clone(), input);
        self.checkpointer.save(run.to_checkpoint()).await?;

        tracing::info!(run_id = %run_id, "run created");
        self.runs.insert(run_id.clone(), run);
        self.cancels.insert(run_id.clone(), CancelToken::new());
        Ok(run_id)
    }

    /// Restore a run from its latest checkpoint.
    ///
    /// A run already held in memory is left as-is. Otherwise the store is
    /// consulted; an unknown id is an error. The restored run gets a fresh
    /// cancel token.
    #[instrument(skip(self), err)]
    pub async fn resume(&mut self, run_id: &str) -> Result<RunInit, SupervisorError> {
        if self.runs.contains_key(run_id) {
            return Ok(RunInit::Fresh);
        }
        let checkpoint = self
            .checkpointer
            .load_latest(run_id)
            .await?
            .ok_or_else(|| SupervisorError::UnknownRun {
                run_id: run_id.to_string(),
            })?;
        let checkpoint_step = checkpoint.step;
        let run = WorkflowRun::from_checkpoint(checkpoint);
        tracing::info!(run_id = %run_id, checkpoint_step, "run restored from checkpoint");
        self.runs.insert(run_id.to_string(), run);
        self.cancels
            .insert(run_id.to_string(), CancelToken::new());
        Ok(RunInit::Resumed { checkpoint_step })
    }

    /// Execute a single superstep of a run.
    #[instrument(skip(self), err)]
    pub async fn step(&mut self, run_id: &str) -> Result<StepReport, SupervisorError> {
        let cancel = self.token(run_id)?;
        let executor = self.executor.clone();
        let run = self
            .runs
            .get_mut(run_id)
            .ok_or_else(|| SupervisorError::UnknownRun {
                run_id: run_id.to_string(),
            })?;
        Ok(executor.advance(run, &cancel).await?)
    }

    /// Drive a run until it reaches a terminal status.
    ///
    /// The configured run deadline is enforced at superstep boundaries:
    /// once exceeded, the run is marked failed with a timeout record and a
    /// terminal checkpoint is written. Cancellation via the run's token
    /// likewise lands at the next boundary.
    #[instrument(skip(self), err)]
    pub async fn run_until_complete(
        &mut self,
        run_id: &str,
    ) -> Result<RunReport, SupervisorError> {
        let started = Instant::now();
        let mut deadline_failure: Option<ErrorRecord> = None;

        loop {
            if let Some(deadline) = self.config.run_deadline {
                let run_active = self
                    .runs
                    .get(run_id)
                    .is_some_and(|r| !r.status.is_terminal());
                if run_active && started.elapsed() >= deadline {
                    let checkpoint = {
                        let run = self.runs.get_mut(run_id).ok_or_else(|| {
                            SupervisorError::UnknownRun {
                                run_id: run_id.to_string(),
                            }
                        })?;
                        run.status = RunStatus::Failed;
                        run.to_checkpoint()
                    };
                    self.checkpointer.save(checkpoint).await?;
                    tracing::warn!(run_id = %run_id, ?deadline, "run deadline exceeded");
                    deadline_failure = Some(ErrorRecord::new(
                        ErrorKind::Timeout,
                        "run deadline exceeded",
                        false,
                    ));
                    break;
                }
            }

            let report = self.step(run_id).await?;
            if report.completed {
                break;
            }
        }

        let run = self
            .runs
            .get(run_id)
            .ok_or_else(|| SupervisorError::UnknownRun {
                run_id: run_id.to_string(),
            })?;
        let mut report = RunReport::from_run(run);
        if deadline_failure.is_some() {
            report.failure = deadline_failure;
        }
        Ok(report)
    }

    /// Cancel token for a run; clone it into whatever task should be able
    /// to request cancellation.
    pub fn cancel_token(&self, run_id: &str) -> Result<CancelToken, SupervisorError> {
        self.token(run_id)
    }

    /// Current in-memory view of a run, if this supervisor holds it.
    #[must_use]
    pub fn run(&self, run_id: &str) -> Option<&WorkflowRun> {
        self.runs.get(run_id)
    }

    #[must_use]
    pub fn checkpointer(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpointer
    }

    fn token(&self, run_id: &str) -> Result<CancelToken, SupervisorError> {
        self.cancels
            .get(run_id)
            .cloned()
            .ok_or_else(|| SupervisorError::UnknownRun {
                run_id: run_id.to_string(),
            })
    }
}
