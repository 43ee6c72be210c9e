//! Heartbeat reporter for the primary encoder host.
//!
//! Runs next to the streaming worker but never in its way: the worker
//! publishes state snapshots into a watch channel and the reporter posts
//! the latest one to the monitor on its own schedule, with exponential
//! backoff when the monitor is unreachable.

pub mod backoff;
pub mod reporter;
pub mod snapshot;

pub use backoff::Backoff;
pub use reporter::{Reporter, ReporterConfig};
pub use snapshot::PrimarySnapshot;
