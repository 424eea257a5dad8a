//! # phaseloom
//!
//! A checkpointed workflow orchestration engine. A workflow is a directed
//! graph of named phases executed in supersteps: the router picks the next
//! frontier from the current state and history, the executor runs the
//! frontier concurrently with per-node timeouts and retry policies, merges
//! all writes atomically, and checkpoints the run so it can resume after a
//! crash from the last completed superstep.
//!
//! ## Building blocks
//!
//! - [`graph::WorkflowBuilder`]: nodes, edges, branches, fan-outs, and
//!   recovery policy, compiled into a [`graph::WorkflowGraph`]
//! - [`node::NodeHandler`]: the async contract phase implementations plug
//!   into
//! - [`state::WorkflowState`]: versioned key/value state, mutated only by
//!   the engine's atomic patch merges
//! - [`runtime::RunSupervisor`]: start, resume, cancel, and drive runs
//! - [`runtime::CheckpointStore`]: pluggable durability (in-memory or
//!   SQLite)
//!
//! ## Example
//!
//! ```rust,no_run
//! use phaseloom::graph::WorkflowBuilder;
//! use phaseloom::registry::NodeDefinition;
//! use phaseloom::runtime::{RunSupervisor, RuntimeConfig};
//! use phaseloom::state::StatePatch;
//! # use phaseloom::node::{NodeHandler, HandlerContext, HandlerError};
//! # use phaseloom::state::StateSnapshot;
//! # struct Analyze;
//! # #[async_trait::async_trait]
//! # impl NodeHandler for Analyze {
//! #     async fn invoke(&self, _: StateSnapshot, _: HandlerContext) -> Result<StatePatch, HandlerError> {
//! #         Ok(StatePatch::new())
//! #     }
//! # }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let graph = WorkflowBuilder::new()
//!     .add_node(NodeDefinition::new("analyze", Analyze))
//!     .add_edge("Start", "analyze")
//!     .add_edge("analyze", "End")
//!     .compile();
//!
//! let mut supervisor = RunSupervisor::new(graph, RuntimeConfig::default()).await?;
//! let run_id = supervisor
//!     .start(StatePatch::new().with("task", "fix the flaky test"))
//!     .await?;
//! let report = supervisor.run_until_complete(&run_id).await?;
//! println!("{}: {}", report.run_id, report.status);
//! # Ok(())
//! # }
//! ```

pub mod graph;
pub mod node;
pub mod registry;
pub mod retry;
pub mod router;
pub mod runtime;
pub mod state;
pub mod telemetry;
pub mod types;
