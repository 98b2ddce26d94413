//! Ports - the seams to the outside world.
//!
//! - `TaskStore` / `CampaignWriter`: persistence (in-memory, SQLite)
//! - `DeliveryBackend` / `MessageSender`: the mailer
//! - `Clock`, `IdGenerator`: time and ids, swappable in tests

pub mod clock;
pub mod delivery;
pub mod id_generator;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::delivery::{DeliveryBackend, MessageSender};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::task_store::{CampaignWriter, TaskStore};
