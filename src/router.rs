//! Pure routing: from a snapshot and an execution history to the next
//! transition.
//!
//! The [`Router`] holds the graph topology (static edges, conditional
//! branches, fan-in declarations) and the recovery policy (skip-on-failure
//! flags, workflow-level rerun budgets). [`Router::decide`] is a pure
//! function of the state snapshot and the durable history, so replaying it
//! after a resume yields the identical decision.

use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::node::NodeExecution;
use crate::state::StateSnapshot;
use crate::types::NodeId;

/// Predicate that routes based on state flags, replacing a node's static
/// successors.
///
/// Must be a pure function of the snapshot: the same snapshot always
/// yields the same targets.
pub type RoutePredicate = Arc<dyn Fn(&StateSnapshot) -> Vec<NodeId> + Send + Sync>;

/// Routing decision for the next superstep.
#[derive(Clone, Debug, PartialEq)]
pub enum Transition {
    /// Exactly one node runs next.
    Next(NodeId),
    /// Several independent nodes run concurrently.
    Parallel(Vec<NodeId>),
    /// Re-run a node that failed, charged against its rerun budget.
    Retry(NodeId),
    /// The run is complete.
    Succeed,
    /// The run failed and no recovery policy applies.
    Fail,
}

/// Recovery route taken when a node fails and a state flag allows skipping
/// it.
#[derive(Clone, Debug)]
pub struct SkipRule {
    /// Boolean state key; the skip only applies while it reads `true`.
    pub flag: String,
    /// Where execution continues instead of the failed node's output path.
    pub continue_to: NodeId,
}

/// Graph topology plus recovery policy, evaluated purely.
#[derive(Clone, Default)]
pub struct Router {
    edges: FxHashMap<NodeId, Vec<NodeId>>,
    branches: FxHashMap<NodeId, RoutePredicate>,
    /// Fan-in target to the sibling set that must finish before it runs.
    fan_ins: FxHashMap<NodeId, Vec<NodeId>>,
    skip_on_failure: FxHashMap<NodeId, SkipRule>,
    /// Workflow-level rerun budgets: extra invocations granted to a node
    /// across the whole run, counted from history.
    rerun_budgets: FxHashMap<NodeId, u32>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("edges", &self.edges)
            .field("branches", &self.branches.keys().collect::<Vec<_>>())
            .field("fan_ins", &self.fan_ins)
            .field("rerun_budgets", &self.rerun_budgets)
            .finish_non_exhaustive()
    }
}

impl Router {
    pub(crate) fn add_edge(&mut self, from: NodeId, to: NodeId) {
        let targets = self.edges.entry(from).or_default();
        if !targets.contains(&to) {
            targets.push(to);
        }
    }

    pub(crate) fn add_branch(&mut self, from: NodeId, predicate: RoutePredicate) {
        self.branches.insert(from, predicate);
    }

    pub(crate) fn add_fan_in(&mut self, target: NodeId, siblings: Vec<NodeId>) {
        self.fan_ins.insert(target, siblings);
    }

    pub(crate) fn add_skip_rule(&mut self, node: NodeId, rule: SkipRule) {
        self.skip_on_failure.insert(node, rule);
    }

    pub(crate) fn add_rerun_budget(&mut self, node: NodeId, budget: u32) {
        self.rerun_budgets.insert(node, budget);
    }

    /// Static successors of a node, in insertion order.
    #[must_use]
    pub fn successors(&self, node: &NodeId) -> &[NodeId] {
        self.edges.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn edge_targets(&self) -> impl Iterator<Item = &NodeId> {
        self.edges.values().flatten()
    }

    pub(crate) fn has_start_edge(&self) -> bool {
        !self.successors(&NodeId::Start).is_empty()
    }

    /// Decide the next transition.
    ///
    /// Pure: depends only on the snapshot and the history, both of which
    /// are checkpointed, so an identical call after resume reproduces the
    /// pre-crash decision.
    #[must_use]
    pub fn decide(&self, snapshot: &StateSnapshot, history: &[NodeExecution]) -> Transition {
        if history.is_empty() {
            return self.initial_frontier();
        }

        let last_step = history.iter().map(|e| e.step).max().unwrap_or(0);
        let last: Vec<&NodeExecution> =
            history.iter().filter(|e| e.step == last_step).collect();

        let mut candidates: Vec<NodeId> = Vec::new();

        for entry in &last {
            if entry.succeeded() {
                continue;
            }
            // Rerun budget first: failures below the budget re-enter the
            // same node.
            if let Some(&budget) = self.rerun_budgets.get(&entry.node) {
                let failures = history
                    .iter()
                    .filter(|e| e.node == entry.node && !e.succeeded())
                    .count() as u32;
                if failures <= budget {
                    tracing::debug!(
                        node = %entry.node,
                        failures,
                        budget,
                        "routing failed node back for a rerun"
                    );
                    return Transition::Retry(entry.node.clone());
                }
            }
            // Then skip routes gated on a state flag.
            if let Some(rule) = self.skip_on_failure.get(&entry.node) {
                if snapshot.flag(&rule.flag) {
                    tracing::debug!(
                        node = %entry.node,
                        flag = %rule.flag,
                        continue_to = %rule.continue_to,
                        "skipping failed node via flag route"
                    );
                    push_unique(&mut candidates, rule.continue_to.clone());
                    continue;
                }
            }
            return Transition::Fail;
        }

        for entry in &last {
            if !entry.succeeded() {
                continue;
            }
            let targets = match self.branches.get(&entry.node) {
                Some(predicate) => predicate(snapshot),
                None => self.successors(&entry.node).to_vec(),
            };
            for target in targets {
                if !target.is_start() {
                    push_unique(&mut candidates, target);
                }
            }
        }

        let candidates = self.gate_fan_ins(candidates, history);

        self.frontier_to_transition(candidates)
    }

    /// Frontier for step 1: the successors of the virtual start node.
    fn initial_frontier(&self) -> Transition {
        let successors = self.successors(&NodeId::Start);
        if successors.is_empty() {
            return Transition::Fail;
        }
        self.frontier_to_transition(successors.to_vec())
    }

    /// Withhold fan-in targets whose declared siblings have not all
    /// recorded a final result; re-emit the missing siblings instead so an
    /// interrupted fan-out completes after resume.
    fn gate_fan_ins(&self, candidates: Vec<NodeId>, history: &[NodeExecution]) -> Vec<NodeId> {
        let mut gated = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match self.fan_ins.get(&candidate) {
                Some(siblings) => {
                    let missing: Vec<NodeId> = siblings
                        .iter()
                        .filter(|s| !history.iter().any(|e| &e.node == *s))
                        .cloned()
                        .collect();
                    if missing.is_empty() {
                        push_unique(&mut gated, candidate);
                    } else {
                        tracing::debug!(
                            fan_in = %candidate,
                            ?missing,
                            "withholding fan-in until siblings finish"
                        );
                        for node in missing {
                            push_unique(&mut gated, node);
                        }
                    }
                }
                None => push_unique(&mut gated, candidate),
            }
        }
        gated
    }

    fn frontier_to_transition(&self, mut frontier: Vec<NodeId>) -> Transition {
        frontier.retain(|n| !n.is_end());
        match frontier.len() {
            0 => Transition::Succeed,
            1 => Transition::Next(frontier.remove(0)),
            _ => Transition::Parallel(frontier),
        }
    }
}

fn push_unique(list: &mut Vec<NodeId>, node: NodeId) {
    if !list.contains(&node) {
        list.push(node);
    }
}
