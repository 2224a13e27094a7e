//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use ulid::Ulid;

use crate::domain::{CascadeId, EntityId, JobId};
use crate::ports::Clock;

/// Generates ids for jobs, cascades and newly created entities.
///
/// ULIDs sort by creation time and need no coordination between processes.
pub trait IdGenerator: Send + Sync {
    fn job_id(&self) -> JobId;

    fn cascade_id(&self) -> CascadeId;

    fn entity_id(&self) -> EntityId;
}

/// ULID generator driven by a `Clock`.
///
/// The timestamp half comes from the clock, the random half from `rand`, so a
/// `FixedClock` gives ids with a predictable time component.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn job_id(&self) -> JobId {
        JobId::from(self.next())
    }

    fn cascade_id(&self) -> CascadeId {
        CascadeId::from(self.next())
    }

    fn entity_id(&self) -> EntityId {
        EntityId::from(self.next())
    }
}
