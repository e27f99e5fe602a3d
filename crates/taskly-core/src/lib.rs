//! Taskly Core Library
//!
//! This crate provides the core functionality for Taskly, an offline-first
//! task and project manager that reconciles with a multi-device cloud
//! backend when connectivity returns.
//!
//! # Architecture
//!
//! - **LocalStore** (SQLite): the durable offline source of truth
//! - **DocumentStore**: the remote, per-user document service
//! - **SyncCoordinator**: decides per write whether to go local-only,
//!   remote-first or both, tags rows for deferred sync and flushes them
//! - **SessionRegistry**: one active device per account, enforced by a
//!   realtime watch
//!
//! # Quick Start
//!
//! ```text
//! let engine = Arc::new(Engine::open(Config::load()?)?);
//! engine.start().await;
//!
//! let task = engine.tasks().create(Task::new("Buy milk")).await?;
//! let tasks = engine.tasks().list().await?;
//! ```
//!
//! # Modules
//!
//! - `engine`: Wiring and background event handling (main entry point)
//! - `models`: Tasks, projects, notifications and session documents
//! - `storage`: Local SQLite store
//! - `remote`: Remote document store backends
//! - `sync`: Per-entity coordinators and read caches
//! - `auth`, `session`: Authentication state and device exclusivity
//! - `connectivity`: Reachability monitoring
//! - `config`: Application configuration

pub mod advisory;
pub mod auth;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod identity;
pub mod models;
pub mod remote;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod sync;

pub use advisory::{Advisory, CollectedAdvisories, LogAdvisory};
pub use auth::{AuthError, AuthEvent, AuthSession, AuthState};
pub use config::Config;
pub use connectivity::{ConnectivityMonitor, ReachabilityProbe};
pub use engine::{Engine, EngineBuilder, EngineStatus};
pub use identity::DeviceIdentity;
pub use models::{
    ActiveSession, EntityKind, Notification, NotificationCategory, NotificationType, Project,
    Task, TaskPriority, TaskStatus,
};
pub use remote::{DocumentStore, HttpDocumentStore, MemoryDocumentStore, RemoteError};
pub use scheduler::{NoopScheduler, ReminderScheduler};
pub use session::SessionRegistry;
pub use storage::{LocalStore, StorageError};
pub use sync::{ChangeEvent, SyncCoordinator, SyncError, SyncReport};
