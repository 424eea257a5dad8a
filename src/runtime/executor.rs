//! Superstep executor.
//!
//! One call to [`Executor::advance`] runs one superstep: it asks the
//! router for the next frontier, dispatches every frontier node as a
//! concurrent task (each under its own timeout and retry policy), waits
//! at the barrier, merges all successful patches atomically, appends the
//! execution history, and checkpoints. The sequence per superstep:
//!
//! 1. route against the current snapshot and history
//! 2. resolve every frontier node before any handler runs
//! 3. dispatch tasks against the shared pre-superstep snapshot
//! 4. barrier: await every task, retries included
//! 5. merge patches atomically (version bump exactly once)
//! 6. append history and save the checkpoint
//!
//! Cancellation is checked before dispatch and again after the barrier;
//! a cancelled superstep discards its results and writes no checkpoint of
//! its own. The cancelled status is saved at the last durable step, so a
//! resumed run stays cancelled.

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use miette::Diagnostic;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::instrument;

use crate::graph::WorkflowGraph;
use crate::node::{
    CancelToken, ErrorKind, ErrorRecord, ExecutionResult, ExecutionStatus, HandlerContext,
    NodeExecution,
};
use crate::registry::{NodeDefinition, RegistryError};
use crate::router::Transition;
use crate::runtime::checkpoint::{CheckpointError, CheckpointStore};
use crate::runtime::run::WorkflowRun;
use crate::state::{StateError, StatePatch, StateSnapshot};
use crate::types::{NodeId, RunStatus};

/// Result of executing one superstep.
#[derive(Debug, Clone)]
pub struct StepReport {
    /// Superstep number this report describes.
    pub step: u64,
    /// Nodes dispatched in this superstep, in frontier order.
    pub ran_nodes: Vec<NodeId>,
    /// State version after the barrier merge.
    pub state_version: u64,
    /// Whether the run reached a terminal status.
    pub completed: bool,
}

#[derive(Debug, Error, Diagnostic)]
pub enum ExecutorError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    StateConflict(#[from] StateError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    UnknownNode(#[from] RegistryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("superstep task join error: {0}")]
    #[diagnostic(code(phaseloom::executor::join))]
    Join(#[from] JoinError),
}

/// Drives supersteps for one graph against one checkpoint store.
#[derive(Clone)]
pub struct Executor {
    graph: Arc<WorkflowGraph>,
    checkpointer: Arc<dyn CheckpointStore>,
}

impl Executor {
    #[must_use]
    pub fn new(graph: Arc<WorkflowGraph>, checkpointer: Arc<dyn CheckpointStore>) -> Self {
        Self {
            graph,
            checkpointer,
        }
    }

    /// Execute one superstep of `run`.
    ///
    /// Returns a completed report without touching the store when the run
    /// is already terminal. A checkpoint save failure is returned as-is:
    /// the merged state stays in memory, so a later call retries the save
    /// path without re-running handlers.
    #[instrument(skip(self, run, cancel), fields(run_id = %run.run_id, step = run.step), err)]
    pub async fn advance(
        &self,
        run: &mut WorkflowRun,
        cancel: &CancelToken,
    ) -> Result<StepReport, ExecutorError> {
        if run.status.is_terminal() {
            return Ok(self.report(run, Vec::new(), true));
        }
        if cancel.is_cancelled() {
            run.status = RunStatus::Cancelled;
            self.checkpointer.save(run.to_checkpoint()).await?;
            tracing::info!(run_id = %run.run_id, "run cancelled before dispatch");
            return Ok(self.report(run, Vec::new(), true));
        }

        let snapshot = run.state.snapshot();
        let decision = self.graph.router().decide(&snapshot, &run.history);
        tracing::debug!(run_id = %run.run_id, ?decision, "routing decision");

        let frontier = match decision {
            Transition::Succeed => {
                run.status = RunStatus::Succeeded;
                self.checkpointer.save(run.to_checkpoint()).await?;
                return Ok(self.report(run, Vec::new(), true));
            }
            Transition::Fail => {
                run.status = RunStatus::Failed;
                self.checkpointer.save(run.to_checkpoint()).await?;
                return Ok(self.report(run, Vec::new(), true));
            }
            Transition::Next(node) | Transition::Retry(node) => vec![node],
            Transition::Parallel(nodes) => nodes,
        };

        // Resolve the full frontier before any handler runs: a route to an
        // unregistered node aborts the superstep with nothing dispatched.
        let mut definitions = Vec::with_capacity(frontier.len());
        for node in &frontier {
            match self.graph.registry().resolve(node) {
                Ok(def) => definitions.push(def.clone()),
                Err(e) => {
                    run.status = RunStatus::Failed;
                    return Err(e.into());
                }
            }
        }

        run.status = RunStatus::Running;
        run.step += 1;
        let step = run.step;

        let tasks: Vec<_> = definitions
            .into_iter()
            .map(|def| {
                let snapshot = snapshot.clone();
                let cancel = cancel.clone();
                tokio::spawn(run_node(def, snapshot, step, cancel))
            })
            .collect();

        let mut results = Vec::with_capacity(tasks.len());
        for joined in join_all(tasks).await {
            results.push(joined?);
        }

        // Cancellation observed during the barrier: discard everything.
        // The superstep never happened as far as durable state goes; the
        // cancelled status replaces the last durable step's checkpoint.
        if cancel.is_cancelled() {
            run.status = RunStatus::Cancelled;
            run.step -= 1;
            self.checkpointer.save(run.to_checkpoint()).await?;
            tracing::info!(run_id = %run.run_id, "run cancelled at barrier; superstep discarded");
            return Ok(self.report(run, Vec::new(), true));
        }

        let patches: Vec<(NodeId, StatePatch)> = results
            .iter()
            .filter(|r| r.status == ExecutionStatus::Success)
            .filter_map(|r| r.patch.clone().map(|p| (r.node.clone(), p)))
            .collect();

        let version = match run.state.apply(&patches) {
            Ok(version) => version,
            Err(conflict) => {
                run.status = RunStatus::Failed;
                return Err(conflict.into());
            }
        };

        for result in &results {
            run.history.push(NodeExecution::from_result(result, step));
        }

        self.checkpointer.save(run.to_checkpoint()).await?;

        tracing::info!(
            run_id = %run.run_id,
            step,
            nodes = frontier.len(),
            version,
            "superstep committed"
        );
        Ok(self.report(run, frontier, false))
    }

    fn report(&self, run: &WorkflowRun, ran_nodes: Vec<NodeId>, completed: bool) -> StepReport {
        StepReport {
            step: run.step,
            ran_nodes,
            state_version: run.state.version(),
            completed: completed || run.status.is_terminal(),
        }
    }
}

/// Run one node to its final result, retries and timeout included.
async fn run_node(
    def: NodeDefinition,
    snapshot: StateSnapshot,
    step: u64,
    cancel: CancelToken,
) -> ExecutionResult {
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let ctx = HandlerContext {
            node: def.id.clone(),
            step,
            attempt,
            cancel: cancel.clone(),
        };

        let outcome = tokio::time::timeout(def.timeout, def.handler.invoke(snapshot.clone(), ctx))
            .await;

        let (kind, message, status) = match outcome {
            Ok(Ok(patch)) => {
                return ExecutionResult {
                    node: def.id,
                    status: ExecutionStatus::Success,
                    patch: Some(patch),
                    error: None,
                    attempts: attempt,
                    elapsed: started.elapsed(),
                };
            }
            Ok(Err(e)) => (e.kind(), e.to_string(), ExecutionStatus::Failure),
            Err(_) => (
                ErrorKind::Timeout,
                format!("node '{}' exceeded its {:?} budget", def.id, def.timeout),
                ExecutionStatus::Timeout,
            ),
        };

        let retryable = def.retry.retries(kind);
        if retryable && attempt < def.retry.max_attempts && !cancel.is_cancelled() {
            let delay = def.retry.delay_for(attempt);
            tracing::debug!(
                node = %def.id,
                attempt,
                kind = %kind,
                ?delay,
                "retrying after failure"
            );
            tokio::time::sleep(delay).await;
            continue;
        }

        return ExecutionResult {
            node: def.id,
            status,
            patch: None,
            error: Some(ErrorRecord::new(kind, message, retryable)),
            attempts: attempt,
            elapsed: started.elapsed(),
        };
    }
}
