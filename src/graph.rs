//! Workflow graph construction.
//!
//! [`WorkflowBuilder`] accumulates node definitions and topology with a
//! fluent API; [`WorkflowBuilder::compile`] assembles them into a
//! [`WorkflowGraph`] without validating. Structural validation runs when a
//! run is started, so a broken graph fails before any checkpoint is
//! written.
//!
//! # Examples
//!
//! ```rust,no_run
//! use phaseloom::graph::WorkflowBuilder;
//! use phaseloom::registry::NodeDefinition;
//! # use phaseloom::node::{NodeHandler, HandlerContext, HandlerError};
//! # use phaseloom::state::{StatePatch, StateSnapshot};
//! # struct Analyze;
//! # #[async_trait::async_trait]
//! # impl NodeHandler for Analyze {
//! #     async fn invoke(&self, _: StateSnapshot, _: HandlerContext) -> Result<StatePatch, HandlerError> {
//! #         Ok(StatePatch::new())
//! #     }
//! # }
//!
//! let graph = WorkflowBuilder::new()
//!     .add_node(NodeDefinition::new("analyze", Analyze))
//!     .add_edge("Start", "analyze")
//!     .add_edge("analyze", "End")
//!     .compile();
//! ```

use miette::Diagnostic;
use thiserror::Error;

use crate::registry::{NodeDefinition, NodeRegistry};
use crate::router::{Router, RoutePredicate, SkipRule};
use crate::types::NodeId;

/// Structural defects detected by [`WorkflowGraph::validate`].
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("no edge originates from Start")]
    #[diagnostic(
        code(phaseloom::graph::no_start_edge),
        help("Every graph needs at least one edge from the virtual Start node.")
    )]
    NoStartEdge,

    #[error("edge or policy references unregistered node: {id}")]
    #[diagnostic(
        code(phaseloom::graph::unknown_node),
        help("Register a handler for every named node the topology mentions.")
    )]
    UnknownNode { id: NodeId },
}

/// Fluent builder for workflow graphs.
#[derive(Default)]
pub struct WorkflowBuilder {
    registry: NodeRegistry,
    router: Router,
}

impl WorkflowBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node definition. Virtual endpoints are ignored with a
    /// warning.
    #[must_use]
    pub fn add_node(mut self, definition: NodeDefinition) -> Self {
        self.registry.register(definition);
        self
    }

    /// Add a static edge.
    #[must_use]
    pub fn add_edge(mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        self.router.add_edge(from.into(), to.into());
        self
    }

    /// Attach a conditional branch to a node.
    ///
    /// When present, the predicate's targets replace the node's static
    /// successors entirely. The predicate must be pure in the snapshot.
    #[must_use]
    pub fn add_branch(mut self, from: impl Into<NodeId>, predicate: RoutePredicate) -> Self {
        self.router.add_branch(from.into(), predicate);
        self
    }

    /// Declare a fan-out: `from` routes to every sibling concurrently, and
    /// `fan_in` runs only after all siblings have a recorded result.
    ///
    /// Wires the sibling edges and the join declaration in one call.
    #[must_use]
    pub fn add_fan_out(
        mut self,
        from: impl Into<NodeId>,
        siblings: Vec<NodeId>,
        fan_in: impl Into<NodeId>,
    ) -> Self {
        let from = from.into();
        let fan_in = fan_in.into();
        for sibling in &siblings {
            self.router.add_edge(from.clone(), sibling.clone());
            self.router.add_edge(sibling.clone(), fan_in.clone());
        }
        self.router.add_fan_in(fan_in, siblings);
        self
    }

    /// Route around `node` when it fails and the boolean state key `flag`
    /// reads true, continuing at `continue_to`.
    #[must_use]
    pub fn skip_on_failure(
        mut self,
        node: impl Into<NodeId>,
        flag: impl Into<String>,
        continue_to: impl Into<NodeId>,
    ) -> Self {
        self.router.add_skip_rule(
            node.into(),
            SkipRule {
                flag: flag.into(),
                continue_to: continue_to.into(),
            },
        );
        self
    }

    /// Grant `node` up to `budget` reruns across the whole run, counted
    /// from the durable history so the budget survives resume.
    #[must_use]
    pub fn rerun_on_failure(mut self, node: impl Into<NodeId>, budget: u32) -> Self {
        self.router.add_rerun_budget(node.into(), budget);
        self
    }

    /// Assemble the graph.
    ///
    /// No validation happens here; [`WorkflowGraph::validate`] runs when a
    /// run starts.
    #[must_use]
    pub fn compile(self) -> WorkflowGraph {
        WorkflowGraph {
            registry: self.registry,
            router: self.router,
        }
    }
}

/// A compiled workflow: registry plus router, immutable at runtime.
#[derive(Clone, Debug)]
pub struct WorkflowGraph {
    registry: NodeRegistry,
    router: Router,
}

impl WorkflowGraph {
    #[must_use]
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Structural validation: a Start edge exists and every named node the
    /// static topology mentions is registered.
    ///
    /// Branch predicates are opaque, so nodes reachable only through them
    /// are checked at dispatch time instead.
    pub fn validate(&self) -> Result<(), GraphError> {
        if !self.router.has_start_edge() {
            return Err(GraphError::NoStartEdge);
        }
        for target in self.router.edge_targets() {
            if target.is_named() && !self.registry.contains(target) {
                return Err(GraphError::UnknownNode {
                    id: target.clone(),
                });
            }
        }
        Ok(())
    }
}
