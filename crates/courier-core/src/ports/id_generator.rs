//! IdGenerator port - ULID generation driven by a `Clock`.

use ulid::Ulid;

use crate::domain::ids::{CampaignId, TaskId};
use crate::ports::Clock;

/// Generates ids for new campaigns and tasks.
///
/// # ULID properties
/// - Sortable by creation time, which the due queries use as a tie-breaker
/// - Generated without coordination between workers
///
/// # Thread Safety
/// - `Send + Sync`: launches may run from any task
pub trait IdGenerator: Send + Sync {
    /// Campaign ID
    fn generate_campaign_id(&self) -> CampaignId;

    /// Send task ID
    fn generate_task_id(&self) -> TaskId;
}

/// ULID generator. The timestamp part comes from the clock, so a
/// `FixedClock` yields ids with a known timestamp.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_campaign_id(&self) -> CampaignId {
        CampaignId::from(self.next())
    }

    fn generate_task_id(&self) -> TaskId {
        TaskId::from(self.next())
    }
}
