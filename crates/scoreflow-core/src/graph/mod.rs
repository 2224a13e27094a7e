//! Dependency graph index (tree edges + task dependency edges).

mod index;

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use index::HierarchyIndex;

/// The index shared between the engine façade, the scheduler and workers.
///
/// Read-mostly. Guards are plain std locks: take them, copy out what you
/// need, drop them before the next `.await`.
#[derive(Debug, Clone, Default)]
pub struct SharedIndex(Arc<RwLock<HierarchyIndex>>);

impl SharedIndex {
    pub fn new(index: HierarchyIndex) -> Self {
        Self(Arc::new(RwLock::new(index)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, HierarchyIndex> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, HierarchyIndex> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }
}
