//! Hierarchy + dependency index.
//!
//! Design:
//! - Entities live in an arena keyed by `EntityId`; edges are separate maps.
//! - Tree edges: `parent` on each node, `children` as the reverse map.
//! - Dependency edges: `edges` (task -> tasks it depends on) and
//!   `reverse_edges` (task -> tasks that depend on it).
//! - Invariant: forward and reverse maps are always kept in sync.
//! - Invariant: the dependency graph is acyclic. `add_dependency` refuses
//!   edges that would close a cycle.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::domain::{EntityId, EntityKind, EntityRef, StructuralError};

#[derive(Debug, Clone)]
struct Node {
    kind: EntityKind,
    parent: Option<EntityId>,
}

/// In-memory view of "who depends on whom".
///
/// Every lookup is a hash probe. Asking about an entity that is not in the
/// index yields `StructuralError::UnknownEntity`, never an empty answer.
#[derive(Debug, Default)]
pub struct HierarchyIndex {
    nodes: HashMap<EntityId, Node>,

    /// parent -> direct children
    children: HashMap<EntityId, HashSet<EntityId>>,

    /// Forward edges: task -> tasks it depends on (predecessors)
    edges: HashMap<EntityId, HashSet<EntityId>>,

    /// Reverse edges: task -> tasks that depend on it (dependents)
    reverse_edges: HashMap<EntityId, HashSet<EntityId>>,
}

impl HierarchyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, entity: EntityRef) -> bool {
        self.node(entity).is_ok()
    }

    /// Resolve a bare id to its kind.
    pub fn resolve(&self, id: EntityId) -> Option<EntityRef> {
        self.nodes.get(&id).map(|n| EntityRef::new(n.kind, id))
    }

    fn node(&self, entity: EntityRef) -> Result<&Node, StructuralError> {
        match self.nodes.get(&entity.id) {
            Some(node) if node.kind == entity.kind => Ok(node),
            _ => Err(StructuralError::UnknownEntity(entity)),
        }
    }

    fn to_ref(&self, id: EntityId) -> Option<EntityRef> {
        self.resolve(id)
    }

    fn sorted_refs<'a>(&self, ids: impl Iterator<Item = &'a EntityId>) -> Vec<EntityRef> {
        let mut refs: Vec<EntityRef> = ids.filter_map(|id| self.to_ref(*id)).collect();
        refs.sort();
        refs
    }

    fn check_parent(
        &self,
        child: EntityRef,
        parent: Option<EntityRef>,
    ) -> Result<(), StructuralError> {
        let allowed = child.kind.parent_kinds();
        match parent {
            None if allowed.is_empty() => Ok(()),
            Some(p) if allowed.contains(&p.kind) => self.node(p).map(|_| ()),
            _ => Err(StructuralError::InvalidParent { child, parent }),
        }
    }

    // ------------------------------------------------------------------
    // Tree mutations
    // ------------------------------------------------------------------

    /// Register an entity under `parent` (None only for pillars).
    pub fn insert(
        &mut self,
        entity: EntityRef,
        parent: Option<EntityRef>,
    ) -> Result<(), StructuralError> {
        if self.nodes.contains_key(&entity.id) {
            return Err(StructuralError::AlreadyExists(entity));
        }
        self.check_parent(entity, parent)?;

        self.nodes.insert(
            entity.id,
            Node {
                kind: entity.kind,
                parent: parent.map(|p| p.id),
            },
        );
        if let Some(p) = parent {
            self.children.entry(p.id).or_default().insert(entity.id);
        }
        Ok(())
    }

    /// Remove a leaf of the tree along with its dependency edges.
    ///
    /// Returns the former parent. Cascading deletion of children is the
    /// caller's job, so an entity that still has children is rejected.
    pub fn remove(&mut self, entity: EntityRef) -> Result<Option<EntityRef>, StructuralError> {
        let parent = self.node(entity)?.parent;
        if self.children.get(&entity.id).is_some_and(|c| !c.is_empty()) {
            return Err(StructuralError::HasChildren(entity));
        }
        let parent_ref = parent.and_then(|p| self.to_ref(p));

        if let Some(p) = parent {
            detach(&mut self.children, p, entity.id);
        }
        self.children.remove(&entity.id);

        for pred in self.edges.remove(&entity.id).unwrap_or_default() {
            detach(&mut self.reverse_edges, pred, entity.id);
        }
        for dependent in self.reverse_edges.remove(&entity.id).unwrap_or_default() {
            detach(&mut self.edges, dependent, entity.id);
        }
        self.nodes.remove(&entity.id);
        Ok(parent_ref)
    }

    /// Move an entity under a new parent. Returns the old parent.
    pub fn reparent(
        &mut self,
        entity: EntityRef,
        new_parent: EntityRef,
    ) -> Result<Option<EntityRef>, StructuralError> {
        let old = self.node(entity)?.parent;
        self.check_parent(entity, Some(new_parent))?;

        if let Some(old) = old {
            detach(&mut self.children, old, entity.id);
        }
        self.children
            .entry(new_parent.id)
            .or_default()
            .insert(entity.id);
        if let Some(node) = self.nodes.get_mut(&entity.id) {
            node.parent = Some(new_parent.id);
        }
        Ok(old.and_then(|id| self.to_ref(id)))
    }

    // ------------------------------------------------------------------
    // Dependency mutations
    // ------------------------------------------------------------------

    /// Add a dependency: `successor` depends on `predecessor`.
    ///
    /// Rejected when either side is not a task or when `predecessor` is
    /// already reachable downstream of `successor` (the edge would close a
    /// cycle). Only the two adjacency entries are touched.
    pub fn add_dependency(
        &mut self,
        successor: EntityRef,
        predecessor: EntityRef,
    ) -> Result<(), StructuralError> {
        for side in [successor, predecessor] {
            self.node(side)?;
            if !side.is_task() {
                return Err(StructuralError::NotATask(side));
            }
        }
        if let Some(path) = self.path_between(successor.id, predecessor.id) {
            return Err(StructuralError::Cycle { path });
        }

        self.edges
            .entry(successor.id)
            .or_default()
            .insert(predecessor.id);
        self.reverse_edges
            .entry(predecessor.id)
            .or_default()
            .insert(successor.id);
        Ok(())
    }

    /// Remove a dependency. Returns whether the edge existed.
    pub fn remove_dependency(
        &mut self,
        successor: EntityRef,
        predecessor: EntityRef,
    ) -> Result<bool, StructuralError> {
        self.node(successor)?;
        self.node(predecessor)?;
        let existed = detach(&mut self.edges, successor.id, predecessor.id);
        detach(&mut self.reverse_edges, predecessor.id, successor.id);
        Ok(existed)
    }

    /// Path `from -> ... -> to` following dependents, if one exists.
    ///
    /// Adding `to -> from` (from depends on to) would then form
    /// `from -> ... -> to -> from`.
    fn path_between(&self, from: EntityId, to: EntityId) -> Option<Vec<EntityId>> {
        if from == to {
            return Some(vec![from, to]);
        }
        let mut prev: HashMap<EntityId, EntityId> = HashMap::new();
        let mut queue = VecDeque::from([from]);
        let mut visited = HashSet::from([from]);

        while let Some(node) = queue.pop_front() {
            let Some(next) = self.reverse_edges.get(&node) else {
                continue;
            };
            for &dependent in next {
                if !visited.insert(dependent) {
                    continue;
                }
                prev.insert(dependent, node);
                if dependent == to {
                    let mut path = vec![to];
                    let mut current = to;
                    while let Some(&p) = prev.get(&current) {
                        path.push(p);
                        current = p;
                    }
                    path.reverse();
                    path.push(from);
                    return Some(path);
                }
                queue.push_back(dependent);
            }
        }
        None
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn parent(&self, entity: EntityRef) -> Result<Option<EntityRef>, StructuralError> {
        Ok(self.node(entity)?.parent.and_then(|p| self.to_ref(p)))
    }

    pub fn children(&self, entity: EntityRef) -> Result<Vec<EntityRef>, StructuralError> {
        self.node(entity)?;
        Ok(self
            .children
            .get(&entity.id)
            .map(|c| self.sorted_refs(c.iter()))
            .unwrap_or_default())
    }

    /// Tasks that declare a dependency on `entity`.
    pub fn dependents(&self, entity: EntityRef) -> Result<Vec<EntityRef>, StructuralError> {
        self.node(entity)?;
        Ok(self
            .reverse_edges
            .get(&entity.id)
            .map(|d| self.sorted_refs(d.iter()))
            .unwrap_or_default())
    }

    /// Tasks `entity` depends on.
    pub fn predecessors(&self, entity: EntityRef) -> Result<Vec<EntityRef>, StructuralError> {
        self.node(entity)?;
        Ok(self
            .edges
            .get(&entity.id)
            .map(|d| self.sorted_refs(d.iter()))
            .unwrap_or_default())
    }

    /// Entities whose score reads `entity`'s score: its dependents and its parent.
    pub fn downstream(&self, entity: EntityRef) -> Result<Vec<EntityRef>, StructuralError> {
        let mut out = self.dependents(entity)?;
        if let Some(parent) = self.parent(entity)? {
            out.push(parent);
        }
        Ok(out)
    }

    /// Parent chain, nearest first.
    pub fn ancestors(&self, entity: EntityRef) -> Result<Vec<EntityRef>, StructuralError> {
        let mut out = Vec::new();
        let mut current = self.parent(entity)?;
        while let Some(p) = current {
            out.push(p);
            current = self.parent(p)?;
        }
        Ok(out)
    }

    /// Every task below `entity` in the tree.
    pub fn descendant_tasks(&self, entity: EntityRef) -> Result<Vec<EntityRef>, StructuralError> {
        self.node(entity)?;
        let mut tasks = Vec::new();
        let mut stack = vec![entity.id];
        while let Some(id) = stack.pop() {
            for &child in self.children.get(&id).into_iter().flatten() {
                match self.to_ref(child) {
                    Some(r) if r.is_task() => tasks.push(r),
                    Some(_) => stack.push(child),
                    None => {}
                }
            }
        }
        tasks.sort();
        Ok(tasks)
    }

    pub fn entities_of_kind(&self, kind: EntityKind) -> Vec<EntityRef> {
        let mut out: Vec<EntityRef> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.kind == kind)
            .map(|(id, n)| EntityRef::new(n.kind, *id))
            .collect();
        out.sort();
        out
    }
}

/// Remove `value` from `map[key]`, dropping the entry once empty.
fn detach(map: &mut HashMap<EntityId, HashSet<EntityId>>, key: EntityId, value: EntityId) -> bool {
    match map.entry(key) {
        Entry::Occupied(mut e) => {
            let removed = e.get_mut().remove(&value);
            if e.get().is_empty() {
                e.remove_entry();
            }
            removed
        }
        Entry::Vacant(_) => false,
    }
}
