//! Impls - port implementations.
//!
//! - **InMemoryTaskStore**: single-process store for tests and trial runs
//! - **SqliteTaskStore**: durable store shared between worker processes
//! - **RecordingBackend**: delivery backend that records batches
//! - **QueuedBackend** + **LogSender**: mailer task fed through a channel

pub mod log_sender;
pub mod memory_store;
pub mod queued_backend;
pub mod recording_backend;
pub mod sqlite_store;

pub use self::log_sender::LogSender;
pub use self::memory_store::InMemoryTaskStore;
pub use self::queued_backend::QueuedBackend;
pub use self::recording_backend::RecordingBackend;
pub use self::sqlite_store::SqliteTaskStore;
