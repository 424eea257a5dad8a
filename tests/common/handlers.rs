//! Reusable test handlers covering the common execution shapes:
//! plain patch writers, flaky nodes that succeed after N failures,
//! permanent failures, slow nodes, and invocation counters.

use async_trait::async_trait;
use parking_lot::Mutex;
use phaseloom::node::{ErrorKind, HandlerContext, HandlerError, NodeHandler};
use phaseloom::state::{StatePatch, StateSnapshot};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Writes a fixed patch and succeeds.
pub struct PatchHandler {
    pub key: String,
    pub value: Value,
}

impl PatchHandler {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[async_trait]
impl NodeHandler for PatchHandler {
    async fn invoke(
        &self,
        _snapshot: StateSnapshot,
        _ctx: HandlerContext,
    ) -> Result<StatePatch, HandlerError> {
        Ok(StatePatch::new().with(self.key.clone(), self.value.clone()))
    }
}

/// Fails transiently until the configured attempt, then succeeds.
pub struct FlakyHandler {
    pub succeed_on_attempt: u32,
    pub invocations: Arc<AtomicU32>,
}

impl FlakyHandler {
    pub fn succeed_after(failures: u32) -> (Self, Arc<AtomicU32>) {
        let invocations = Arc::new(AtomicU32::new(0));
        (
            Self {
                succeed_on_attempt: failures + 1,
                invocations: Arc::clone(&invocations),
            },
            invocations,
        )
    }
}

#[async_trait]
impl NodeHandler for FlakyHandler {
    async fn invoke(
        &self,
        _snapshot: StateSnapshot,
        ctx: HandlerContext,
    ) -> Result<StatePatch, HandlerError> {
        let count = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;
        if count < self.succeed_on_attempt {
            return Err(HandlerError::Transient(format!(
                "attempt {} of node {} failed",
                ctx.attempt, ctx.node
            )));
        }
        Ok(StatePatch::new().with("recovered", true))
    }
}

/// Always fails with the given kind.
pub struct AlwaysFails {
    pub kind: ErrorKind,
    pub invocations: Arc<AtomicU32>,
}

impl AlwaysFails {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            invocations: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn counted(kind: ErrorKind) -> (Self, Arc<AtomicU32>) {
        let handler = Self::new(kind);
        let invocations = Arc::clone(&handler.invocations);
        (handler, invocations)
    }
}

#[async_trait]
impl NodeHandler for AlwaysFails {
    async fn invoke(
        &self,
        _snapshot: StateSnapshot,
        _ctx: HandlerContext,
    ) -> Result<StatePatch, HandlerError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        match self.kind {
            ErrorKind::Transient => Err(HandlerError::Transient("still broken".into())),
            ErrorKind::Permanent => Err(HandlerError::Permanent("unfixable".into())),
            ErrorKind::Timeout => Err(HandlerError::Timeout("too slow".into())),
            ErrorKind::InvalidInput => Err(HandlerError::InvalidInput { what: "fixture" }),
        }
    }
}

/// Sleeps for a fixed duration, then writes a completion marker.
///
/// The `finished` flag records that the handler ran to completion even
/// when the engine later discards its patch.
pub struct SlowHandler {
    pub delay: Duration,
    pub marker: String,
    pub finished: Arc<AtomicBool>,
}

impl SlowHandler {
    pub fn new(delay: Duration, marker: impl Into<String>) -> (Self, Arc<AtomicBool>) {
        let finished = Arc::new(AtomicBool::new(false));
        (
            Self {
                delay,
                marker: marker.into(),
                finished: Arc::clone(&finished),
            },
            finished,
        )
    }
}

#[async_trait]
impl NodeHandler for SlowHandler {
    async fn invoke(
        &self,
        _snapshot: StateSnapshot,
        _ctx: HandlerContext,
    ) -> Result<StatePatch, HandlerError> {
        tokio::time::sleep(self.delay).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(StatePatch::new().with(self.marker.clone(), true))
    }
}

/// Fails transiently and records the instant of every invocation, for
/// asserting on the spacing the backoff schedule produces.
pub struct RecordingFailer {
    pub instants: Arc<Mutex<Vec<Instant>>>,
}

impl RecordingFailer {
    pub fn new() -> (Self, Arc<Mutex<Vec<Instant>>>) {
        let instants = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                instants: Arc::clone(&instants),
            },
            instants,
        )
    }
}

#[async_trait]
impl NodeHandler for RecordingFailer {
    async fn invoke(
        &self,
        _snapshot: StateSnapshot,
        _ctx: HandlerContext,
    ) -> Result<StatePatch, HandlerError> {
        self.instants.lock().push(Instant::now());
        Err(HandlerError::Transient("still failing".into()))
    }
}

/// Counts invocations and records the snapshot version it observed.
pub struct CountingHandler {
    pub key: String,
    pub invocations: Arc<AtomicU32>,
}

impl CountingHandler {
    pub fn new(key: impl Into<String>) -> (Self, Arc<AtomicU32>) {
        let invocations = Arc::new(AtomicU32::new(0));
        (
            Self {
                key: key.into(),
                invocations: Arc::clone(&invocations),
            },
            invocations,
        )
    }
}

#[async_trait]
impl NodeHandler for CountingHandler {
    async fn invoke(
        &self,
        snapshot: StateSnapshot,
        _ctx: HandlerContext,
    ) -> Result<StatePatch, HandlerError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(StatePatch::new().with(self.key.clone(), snapshot.version))
    }
}
