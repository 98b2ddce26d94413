//! App - application layer.
//!
//! Combines the ports into the dispatch worker.
//!
//! # Components
//! - **DispatchWorker**: the claim, batch, dispatch, settle cycle
//! - **WorkerGroup**: several workers sharing one store
//! - **RetryPolicy**: bounded backoff for failed sends
//! - **lifecycle**: campaign status transitions
//! - **launch**: campaign creation with paced send times

pub mod batching;
pub mod group;
pub mod launch;
pub mod lifecycle;
pub mod retry;
pub mod worker_loop;

pub use self::group::WorkerGroup;
pub use self::launch::{launch, plan_launch};
pub use self::retry::{RetryDecision, RetryPolicy};
pub use self::worker_loop::DispatchWorker;
