//! Offline-first synchronization
//!
//! One [`SyncCoordinator`] per entity type owns its writes, deciding per call
//! between local-only and remote-then-local, and reconciles the stores at
//! login and when connectivity returns.
//!
//! - `coordinator`: the generic create/update/delete/list and sync passes
//! - `cache`: the in-memory [`ReadCache`]
//! - `tasks`, `projects`, `notifications`: per-type operations

mod cache;
mod coordinator;
mod notifications;
mod projects;
mod tasks;

pub use cache::ReadCache;
pub use coordinator::{
    CascadeDelete, ChangeEvent, Entity, ListFilter, SyncCoordinator, SyncError, SyncReport,
    SyncResult,
};
pub use notifications::NotificationCoordinator;
pub use projects::ProjectCoordinator;
pub use tasks::{parse_status_filter, TaskCoordinator};
