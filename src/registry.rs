//! Node registry: handler lookup by node id.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::node::NodeHandler;
use crate::retry::RetryPolicy;
use crate::types::NodeId;

/// Default per-invocation time budget for a node.
pub const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_secs(60);

/// Error raised when the graph routes to an unregistered node.
#[derive(Debug, Error, Diagnostic)]
pub enum RegistryError {
    #[error("unknown node: {id}")]
    #[diagnostic(
        code(phaseloom::registry::unknown_node),
        help("Register a handler for every node a route can reach.")
    )]
    UnknownNode { id: NodeId },
}

/// A registered node: its handler plus the execution policy applied to it.
#[derive(Clone)]
pub struct NodeDefinition {
    pub id: NodeId,
    pub handler: Arc<dyn NodeHandler>,
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

impl NodeDefinition {
    /// Definition with the default retry policy and timeout.
    pub fn new(id: impl Into<NodeId>, handler: impl NodeHandler + 'static) -> Self {
        Self {
            id: id.into(),
            handler: Arc::new(handler),
            retry: RetryPolicy::default(),
            timeout: DEFAULT_NODE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for NodeDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDefinition")
            .field("id", &self.id)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Lookup table from node id to definition.
///
/// Populated during graph construction and read-only afterwards; the
/// executor resolves every routed node here before dispatching any of
/// them.
#[derive(Clone, Debug, Default)]
pub struct NodeRegistry {
    nodes: FxHashMap<NodeId, NodeDefinition>,
}

impl NodeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node definition.
    ///
    /// The virtual `Start`/`End` endpoints carry no handler; attempts to
    /// register them are logged and ignored. Re-registering a name
    /// replaces the previous definition.
    pub fn register(&mut self, definition: NodeDefinition) {
        if !definition.id.is_named() {
            tracing::warn!(
                node = %definition.id,
                "attempted to register a virtual endpoint; ignoring"
            );
            return;
        }
        self.nodes.insert(definition.id.clone(), definition);
    }

    /// Resolve a node id to its definition.
    pub fn resolve(&self, id: &NodeId) -> Result<&NodeDefinition, RegistryError> {
        self.nodes
            .get(id)
            .ok_or_else(|| RegistryError::UnknownNode { id: id.clone() })
    }

    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{HandlerContext, HandlerError};
    use crate::state::{StatePatch, StateSnapshot};
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl NodeHandler for Noop {
        async fn invoke(
            &self,
            _snapshot: StateSnapshot,
            _ctx: HandlerContext,
        ) -> Result<StatePatch, HandlerError> {
            Ok(StatePatch::new())
        }
    }

    #[test]
    fn register_and_resolve() {
        let mut registry = NodeRegistry::new();
        registry.register(NodeDefinition::new("analyze", Noop));
        assert!(registry.resolve(&"analyze".into()).is_ok());
        assert!(matches!(
            registry.resolve(&"missing".into()),
            Err(RegistryError::UnknownNode { .. })
        ));
    }

    #[test]
    fn virtual_endpoints_are_ignored() {
        let mut registry = NodeRegistry::new();
        registry.register(NodeDefinition::new(NodeId::Start, Noop));
        registry.register(NodeDefinition::new(NodeId::End, Noop));
        assert!(registry.is_empty());
    }
}
