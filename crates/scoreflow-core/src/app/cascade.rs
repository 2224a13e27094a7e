//! Cascade plan - the DAG of recomputations triggered by one event.
//!
//! Closure: the seeds, everything that depends on them (task dependents,
//! recursively), and every ancestor of all of those. Within the closure a
//! node's prerequisites are its in-closure children and in-closure
//! predecessors. The graph is acyclic: dependency edges are acyclic and tree
//! edges always point one level up.
//!
//! Release rule, applied once the last prerequisite of a node settles:
//! - a prerequisite Failed or Halted -> node Halted, no job
//! - a prerequisite Changed, or node is a seed -> job enqueued
//! - otherwise -> node settled Unchanged without a job
//!
//! The plan is plain data; the scheduler owns locking and publishing.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tokio::time::Instant;

use crate::domain::{CascadeId, EntityRef, Reason, Settlement, StructuralError};
use crate::graph::HierarchyIndex;

/// How a node ended, as far as its dependents care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    Changed,
    Unchanged,
    Failed,
    Halted,
}

impl NodeOutcome {
    pub fn from_settlement(settlement: &Settlement) -> Self {
        match settlement {
            Settlement::Changed { .. } | Settlement::Replayed { .. } => NodeOutcome::Changed,
            Settlement::Unchanged { .. } | Settlement::Conflict { .. } | Settlement::Skipped => {
                NodeOutcome::Unchanged
            }
            Settlement::Failed { .. } => NodeOutcome::Failed,
        }
    }

    fn blocks(self) -> bool {
        matches!(self, NodeOutcome::Failed | NodeOutcome::Halted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Waiting,
    Enqueued,
    Settled(NodeOutcome),
}

#[derive(Debug)]
struct Node {
    /// Reason given by the triggering event; `None` for non-seeds.
    seed_reason: Option<Reason>,
    dependents: BTreeSet<EntityRef>,
    remaining: usize,
    any_changed: bool,
    blocked: bool,
    state: NodeState,
}

/// A node that became runnable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Release {
    pub entity: EntityRef,
    pub reason: Reason,
}

/// What one settlement unlocked.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Released {
    /// Jobs to publish, children before parents.
    pub enqueue: Vec<Release>,
    /// Skipped because an upstream job failed.
    pub halted: Vec<EntityRef>,
    /// Settled without a job: no prerequisite changed.
    pub suppressed: Vec<EntityRef>,
    /// The entity was not awaiting a settlement (duplicate or unknown).
    pub ignored: bool,
}

#[derive(Debug)]
pub struct CascadePlan {
    id: CascadeId,
    nodes: BTreeMap<EntityRef, Node>,
    started_at: Instant,
}

fn release_order(a: &EntityRef, b: &EntityRef) -> std::cmp::Ordering {
    (a.kind.level(), a).cmp(&(b.kind.level(), b))
}

/// Reason attached to a job that a prerequisite released.
fn follow_up_reason(entity: EntityRef) -> Reason {
    if entity.is_task() {
        Reason::PredecessorChanged
    } else {
        Reason::ChildChanged
    }
}

impl CascadePlan {
    /// Plan the closure of `seeds`. Unknown seeds are a structural error.
    pub fn build(
        id: CascadeId,
        seeds: &[(EntityRef, Reason)],
        index: &HierarchyIndex,
    ) -> Result<Self, StructuralError> {
        let mut nodes: BTreeMap<EntityRef, Node> = BTreeMap::new();
        let mut queue = VecDeque::new();

        for &(entity, reason) in seeds {
            if !index.contains(entity) {
                return Err(StructuralError::UnknownEntity(entity));
            }
            match nodes.get_mut(&entity) {
                Some(node) => {
                    node.seed_reason.get_or_insert(reason);
                }
                None => {
                    nodes.insert(entity, Node::new(Some(reason)));
                    queue.push_back(entity);
                }
            }
        }

        // BFS over downstream edges; terminates because the graph is a DAG
        while let Some(entity) = queue.pop_front() {
            for next in index.downstream(entity)? {
                if !nodes.contains_key(&next) {
                    nodes.insert(next, Node::new(None));
                    queue.push_back(next);
                }
                if let Some(node) = nodes.get_mut(&entity) {
                    node.dependents.insert(next);
                }
            }
        }

        let edges: Vec<EntityRef> = nodes
            .values()
            .flat_map(|n| n.dependents.iter().copied())
            .collect();
        for target in edges {
            if let Some(node) = nodes.get_mut(&target) {
                node.remaining += 1;
            }
        }

        Ok(Self {
            id,
            nodes,
            started_at: Instant::now(),
        })
    }

    pub fn id(&self) -> CascadeId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn age(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    pub fn contains(&self, entity: EntityRef) -> bool {
        self.nodes.contains_key(&entity)
    }

    /// Every entity in the closure, children before parents.
    pub fn entities(&self) -> Vec<EntityRef> {
        let mut out: Vec<EntityRef> = self.nodes.keys().copied().collect();
        out.sort_by(release_order);
        out
    }

    /// Nodes with no prerequisite. Called once, right after `build`.
    pub fn start(&mut self) -> Vec<Release> {
        let mut ready: Vec<EntityRef> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.remaining == 0 && n.state == NodeState::Waiting)
            .map(|(e, _)| *e)
            .collect();
        ready.sort_by(release_order);

        let mut out = Vec::with_capacity(ready.len());
        for entity in ready {
            if let Some(node) = self.nodes.get_mut(&entity) {
                node.state = NodeState::Enqueued;
                out.push(Release {
                    entity,
                    reason: node.seed_reason.unwrap_or_else(|| follow_up_reason(entity)),
                });
            }
        }
        out
    }

    /// Record the outcome of `entity`'s job and release whatever it unblocks.
    ///
    /// Only an enqueued node accepts a settlement; anything else comes back
    /// with `ignored` set, so duplicate deliveries are harmless.
    pub fn settle(&mut self, entity: EntityRef, outcome: NodeOutcome) -> Released {
        let mut released = Released::default();
        match self.nodes.get_mut(&entity) {
            Some(node) if node.state == NodeState::Enqueued => {
                node.state = NodeState::Settled(outcome);
            }
            _ => {
                released.ignored = true;
                return released;
            }
        }

        let mut settled = VecDeque::from([(entity, outcome)]);
        while let Some((from, outcome)) = settled.pop_front() {
            let dependents: Vec<EntityRef> = self
                .nodes
                .get(&from)
                .map(|n| n.dependents.iter().copied().collect())
                .unwrap_or_default();

            for target in dependents {
                let Some(node) = self.nodes.get_mut(&target) else {
                    continue;
                };
                node.remaining = node.remaining.saturating_sub(1);
                node.any_changed |= outcome == NodeOutcome::Changed;
                node.blocked |= outcome.blocks();
                if node.remaining > 0 || node.state != NodeState::Waiting {
                    continue;
                }

                if node.blocked {
                    node.state = NodeState::Settled(NodeOutcome::Halted);
                    released.halted.push(target);
                    settled.push_back((target, NodeOutcome::Halted));
                } else if node.any_changed || node.seed_reason.is_some() {
                    node.state = NodeState::Enqueued;
                    released.enqueue.push(Release {
                        entity: target,
                        reason: node
                            .seed_reason
                            .unwrap_or_else(|| follow_up_reason(target)),
                    });
                } else {
                    node.state = NodeState::Settled(NodeOutcome::Unchanged);
                    released.suppressed.push(target);
                    settled.push_back((target, NodeOutcome::Unchanged));
                }
            }
        }

        released
            .enqueue
            .sort_by(|a, b| release_order(&a.entity, &b.entity));
        released
    }

    /// Outcome of `entity`, if it has settled.
    pub fn outcome(&self, entity: EntityRef) -> Option<NodeOutcome> {
        match self.nodes.get(&entity)?.state {
            NodeState::Settled(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// Recomputations this plan still owes: unreleased nodes that are seeds
    /// or already saw a prerequisite change. Halted nodes are not owed.
    pub fn owed(&self) -> Vec<(EntityRef, Reason)> {
        let mut out: Vec<(EntityRef, Reason)> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.state == NodeState::Waiting && !n.blocked)
            .filter(|(_, n)| n.any_changed || n.seed_reason.is_some())
            .map(|(e, n)| (*e, n.seed_reason.unwrap_or_else(|| follow_up_reason(*e))))
            .collect();
        out.sort_by(|a, b| release_order(&a.0, &b.0));
        out
    }

    pub fn is_complete(&self) -> bool {
        self.nodes
            .values()
            .all(|n| matches!(n.state, NodeState::Settled(_)))
    }
}

impl Node {
    fn new(seed_reason: Option<Reason>) -> Self {
        Self {
            seed_reason,
            dependents: BTreeSet::new(),
            remaining: 0,
            any_changed: false,
            blocked: false,
            state: NodeState::Waiting,
        }
    }
}
