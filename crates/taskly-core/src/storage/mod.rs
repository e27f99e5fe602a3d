//! Local storage layer
//!
//! A single SQLite database is the durable offline source of truth.
//!
//! ## Architecture
//!
//! - **LocalStore**: owns the connection lifecycle (lazy open with retry,
//!   checkpoint and close, wipe)
//! - **Collection**: typed, indexed access to one table per entity type
//! - **records**: row mappings for tasks, projects and notifications

pub mod collection;
pub mod error;
pub mod local;
pub mod records;
pub mod schema;

pub use collection::{Collection, Filter, LocalRecord};
pub use error::{StorageError, StorageResult};
pub use local::{LocalStore, OpenOptions, StoreLocation};
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
