//! courier-core
//!
//! Campaign mail dispatch worker: claims due send tasks from a shared store,
//! hands them to a delivery backend in per-campaign batches and keeps each
//! campaign's status in step.
//!
//! # Modules
//! - **domain**: ids, send tasks, campaigns, batches, delivery reports, errors
//! - **ports**: TaskStore, CampaignWriter, DeliveryBackend, MessageSender, Clock, IdGenerator
//! - **app**: DispatchWorker, WorkerGroup, retry policy, campaign lifecycle, launch
//! - **impls**: in-memory and SQLite stores, recording and queued backends
//! - **config**: WorkerConfig
//! - **observability**: per-cycle counters

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{DispatchWorker, RetryPolicy, WorkerGroup};
pub use config::{ConfigError, WorkerConfig};
pub use observability::CycleReport;
