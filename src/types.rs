//! Core identifiers for the phaseloom workflow engine.
//!
//! This module defines the fundamental types used throughout the system
//! for identifying nodes in workflow graphs and tracking run lifecycle.
//!
//! # Key Types
//!
//! - [`NodeId`]: Identifies a node in a workflow graph, including the
//!   virtual `Start` and `End` endpoints
//! - [`RunStatus`]: Lifecycle state of a workflow run
//!
//! # Examples
//!
//! ```rust
//! use phaseloom::types::{NodeId, RunStatus};
//!
//! let start = NodeId::Start;
//! let phase = NodeId::Named("generateCode".to_string());
//!
//! // Encode for persistence
//! assert_eq!(phase.encode(), "generateCode");
//! assert_eq!(NodeId::decode("Start"), NodeId::Start);
//!
//! assert!(!RunStatus::Running.is_terminal());
//! assert!(RunStatus::Cancelled.is_terminal());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a node within a workflow graph.
///
/// `NodeId` serves as the unique key for nodes in the execution graph.
/// `Start` and `End` are virtual endpoints: they carry no handler and
/// exist only so routing can express entry and termination uniformly.
///
/// # Persistence
///
/// `NodeId` serializes to a plain string (`"Start"`, `"End"`, or the raw
/// name) so checkpoints stay human-readable; the [`encode`](Self::encode)/
/// [`decode`](Self::decode) pair provides the same mapping for non-serde
/// storage paths.
///
/// # Examples
///
/// ```rust
/// use phaseloom::types::NodeId;
///
/// let processor: NodeId = "generateCode".into();
/// assert_eq!(NodeId::decode(&processor.encode()), processor);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeId {
    /// Virtual entry point that begins workflow execution.
    ///
    /// The first edge of every graph must originate here. Start is never
    /// registered or executed.
    Start,

    /// Virtual terminal that completes a workflow branch.
    ///
    /// Routing a frontier exclusively to `End` finishes the run.
    End,

    /// Application node identified by a user-defined name.
    ///
    /// The name should be descriptive and unique within the workflow,
    /// typically the phase it performs (`"analyze"`, `"runTests"`).
    Named(String),
}

impl NodeId {
    /// Encode a NodeId into its persisted string form.
    ///
    /// `Start` and `End` map to their literal names; named nodes map to
    /// the raw name. The names `"Start"` and `"End"` are reserved for the
    /// virtual endpoints, so the mapping is lossless.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            NodeId::Start => "Start".to_string(),
            NodeId::End => "End".to_string(),
            NodeId::Named(s) => s.clone(),
        }
    }

    /// Decode a persisted string form back into a NodeId.
    pub fn decode(s: &str) -> Self {
        match s {
            "Start" => NodeId::Start,
            "End" => NodeId::End,
            other => NodeId::Named(other.to_string()),
        }
    }

    /// Returns `true` if this is the virtual [`Start`](Self::Start) node.
    #[must_use]
    pub fn is_start(&self) -> bool {
        matches!(self, Self::Start)
    }

    /// Returns `true` if this is the virtual [`End`](Self::End) node.
    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }

    /// Returns `true` if this is an application node.
    #[must_use]
    pub fn is_named(&self) -> bool {
        matches!(self, Self::Named(_))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "Start"),
            Self::End => write!(f, "End"),
            Self::Named(name) => write!(f, "{name}"),
        }
    }
}

// Developer experience: allow string literals wherever a NodeId is expected.
impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId::decode(s)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId::decode(&s)
    }
}

impl Serialize for NodeId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(NodeId::decode(&s))
    }
}

/// Lifecycle state of a workflow run.
///
/// A run starts `Pending` (created and checkpointed, nothing executed),
/// moves to `Running` once the first superstep begins, and finishes in
/// exactly one of the terminal states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    /// Created and checkpointed at step 0, nothing executed yet.
    Pending,
    /// At least one superstep has started.
    Running,
    /// Routing reached a terminal frontier with no failures outstanding.
    Succeeded,
    /// A non-recoverable failure or policy exhaustion ended the run.
    Failed,
    /// A cooperative cancellation took effect at a superstep boundary.
    Cancelled,
}

impl RunStatus {
    /// Returns `true` for states from which a run never advances again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_encode_decode_roundtrip() {
        for id in [NodeId::Start, NodeId::End, NodeId::Named("analyze".into())] {
            assert_eq!(NodeId::decode(&id.encode()), id);
        }
    }

    #[test]
    fn node_id_from_str_recognizes_endpoints() {
        assert_eq!(NodeId::from("Start"), NodeId::Start);
        assert_eq!(NodeId::from("End"), NodeId::End);
        assert_eq!(NodeId::from("scanRepo"), NodeId::Named("scanRepo".into()));
    }

    #[test]
    fn node_id_serde_is_plain_string() {
        let json = serde_json::to_string(&NodeId::Named("commit".into())).unwrap();
        assert_eq!(json, "\"commit\"");
        let back: NodeId = serde_json::from_str("\"End\"").unwrap();
        assert_eq!(back, NodeId::End);
    }

    #[test]
    fn terminal_statuses() {
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }
}
