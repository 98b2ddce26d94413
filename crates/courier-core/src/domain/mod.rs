//! Domain model: ids, send tasks, campaigns, batches, delivery reports.

pub mod batch;
pub mod campaign;
pub mod errors;
pub mod ids;
pub mod outcome;
pub mod schedule;
pub mod state;
pub mod task;

pub use batch::DispatchBatch;
pub use campaign::{Campaign, CampaignProgress};
pub use errors::{DeliveryError, DispatchError, StoreError};
pub use ids::{CampaignId, TaskId};
pub use outcome::{DeliveryOutcome, DeliveryReport};
pub use schedule::{latest_send_at, pace};
pub use state::{CampaignStatus, ClaimState};
pub use task::{Recipient, SendTask, TaskOutcome};
