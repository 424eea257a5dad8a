//! Node handler contract and execution records.
//!
//! This module provides the abstractions for pluggable workflow phases:
//! the [`NodeHandler`] trait, the [`HandlerContext`] passed to every
//! invocation, the [`HandlerError`] taxonomy the retry policy keys on,
//! and the durable [`NodeExecution`] records the engine appends to each
//! run's history.
//!
//! # Design Principles
//!
//! - **Stateless**: handlers read a snapshot and return a patch; they
//!   never mutate shared state
//! - **Focused**: one handler per phase (analyze, generate, test, ...)
//! - **Classified failures**: errors carry an [`ErrorKind`] so the engine
//!   can decide retryability without inspecting messages
//!
//! # Examples
//!
//! ```rust,no_run
//! use phaseloom::node::{NodeHandler, HandlerContext, HandlerError};
//! use phaseloom::state::{StatePatch, StateSnapshot};
//! use async_trait::async_trait;
//! use serde_json::json;
//!
//! struct ClassifyTask;
//!
//! #[async_trait]
//! impl NodeHandler for ClassifyTask {
//!     async fn invoke(
//!         &self,
//!         snapshot: StateSnapshot,
//!         _ctx: HandlerContext,
//!     ) -> Result<StatePatch, HandlerError> {
//!         let task = snapshot
//!             .get_str("task")
//!             .ok_or(HandlerError::InvalidInput { what: "task" })?;
//!         let kind = if task.contains("test") { "testing" } else { "feature" };
//!         Ok(StatePatch::new().with("taskKind", json!(kind)))
//!     }
//! }
//! ```

use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

use crate::state::{StatePatch, StateSnapshot};
use crate::types::NodeId;

// ============================================================================
// Error Taxonomy
// ============================================================================

/// Classification of a handler failure.
///
/// The retry policy keys on this classification: by default only
/// [`Transient`](Self::Transient) failures are retried. Timeouts are
/// assigned by the executor when a handler exceeds its per-invocation
/// budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Likely to succeed on a later attempt (network blip, rate limit).
    Transient,
    /// Will not succeed no matter how often it is retried.
    Permanent,
    /// The invocation exceeded its time budget.
    Timeout,
    /// The state handed to the handler was missing or malformed.
    InvalidInput,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Timeout => "timeout",
            Self::InvalidInput => "invalid input",
        };
        write!(f, "{s}")
    }
}

/// Errors returned by handler invocations.
///
/// Handlers pick the variant that matches the failure mode they observed;
/// everything else about recovery (retries, backoff, skip routes) is
/// policy owned by the engine.
#[derive(Debug, Error, Diagnostic)]
pub enum HandlerError {
    /// A failure worth retrying.
    #[error("transient failure: {0}")]
    #[diagnostic(
        code(phaseloom::node::transient),
        help("Transient failures are retried per the node's retry policy.")
    )]
    Transient(String),

    /// A failure no retry will fix.
    #[error("permanent failure: {0}")]
    #[diagnostic(code(phaseloom::node::permanent))]
    Permanent(String),

    /// The handler observed its own work exceed a time budget.
    ///
    /// The executor also assigns [`ErrorKind::Timeout`] itself when the
    /// whole invocation exceeds the node's timeout; this variant lets a
    /// handler report a finer-grained timeout without misclassifying it.
    #[error("timed out: {0}")]
    #[diagnostic(code(phaseloom::node::timeout))]
    Timeout(String),

    /// Expected input data is missing or malformed in the snapshot.
    #[error("missing or invalid input: {what}")]
    #[diagnostic(
        code(phaseloom::node::invalid_input),
        help("Check that an upstream node produced the required key.")
    )]
    InvalidInput { what: &'static str },

    /// JSON serialization error while reading or building state values.
    #[error(transparent)]
    #[diagnostic(code(phaseloom::node::serde_json))]
    Serde(#[from] serde_json::Error),
}

impl HandlerError {
    /// The classification the retry policy sees.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient(_) => ErrorKind::Transient,
            Self::Permanent(_) => ErrorKind::Permanent,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::InvalidInput { .. } | Self::Serde(_) => ErrorKind::InvalidInput,
        }
    }
}

/// Serializable record of a failure, carried in run history and reports.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    /// Whether the node's retry policy considered this kind retryable.
    pub retryable: bool,
}

impl ErrorRecord {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation flag shared between the supervisor and the
/// executor.
///
/// Cancellation takes effect at superstep boundaries: in-flight handlers
/// are awaited, their results discarded, and no further superstep starts.
/// Long-running handlers may also poll the token through
/// [`HandlerContext::is_cancelled`] to return early.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Execution Context
// ============================================================================

/// Execution context passed to handlers on every invocation.
///
/// Carries the node's identity, the superstep number, and which attempt
/// this is (1-based), so handlers can log and adapt without reaching into
/// engine internals.
#[derive(Clone, Debug)]
pub struct HandlerContext {
    /// Identity of the node being executed.
    pub node: NodeId,
    /// Superstep number this invocation belongs to.
    pub step: u64,
    /// 1-based attempt counter; 1 on the first try.
    pub attempt: u32,
    /// Cooperative cancellation token for the owning run.
    pub cancel: CancelToken,
}

impl HandlerContext {
    /// Whether the owning run has been asked to cancel.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// ============================================================================
// Core Trait
// ============================================================================

/// A single unit of computation within a workflow.
///
/// Handlers receive the pre-superstep [`StateSnapshot`] and return a
/// [`StatePatch`] describing the writes they want. The engine merges all
/// sibling patches atomically after the superstep barrier.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Execute this node against the given snapshot.
    async fn invoke(
        &self,
        snapshot: StateSnapshot,
        ctx: HandlerContext,
    ) -> Result<StatePatch, HandlerError>;
}

// ============================================================================
// Execution Records
// ============================================================================

/// Final outcome of one node within a superstep, after retries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionStatus {
    Success,
    Failure,
    Timeout,
}

/// Transient result the executor collects at the superstep barrier.
///
/// The patch is present only on success; the error record only on
/// failure or timeout.
#[derive(Clone, Debug)]
pub struct ExecutionResult {
    pub node: NodeId,
    pub status: ExecutionStatus,
    pub patch: Option<StatePatch>,
    pub error: Option<ErrorRecord>,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Durable history entry, one per node per superstep it ran in.
///
/// History entries are checkpointed with the state, which is what lets the
/// router re-derive the last superstep after a resume.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    pub node: NodeId,
    pub step: u64,
    pub status: ExecutionStatus,
    pub attempts: u32,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ErrorRecord>,
}

impl NodeExecution {
    /// Build a history entry from a barrier result.
    #[must_use]
    pub fn from_result(result: &ExecutionResult, step: u64) -> Self {
        Self {
            node: result.node.clone(),
            step,
            status: result.status,
            attempts: result.attempts,
            elapsed_ms: result.elapsed.as_millis() as u64,
            error: result.error.clone(),
        }
    }

    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}
