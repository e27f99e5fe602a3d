//! Remote document store
//!
//! The cloud source of truth: JSON documents sharded per user under
//! `{collection}/{userId}/{userCollection}/{id}`.
//!
//! - `DocumentStore`: backend contract (get/set/query/delete, batches, watch)
//! - `HttpDocumentStore`: the network backend
//! - `MemoryDocumentStore`: in-process backend for local-only mode and tests
//! - `RemoteCollection`: typed per-entity operations on top of a backend

pub mod codec;
pub mod collection;
pub mod document;
pub mod error;
pub mod http;
pub mod memory;
pub mod store;

pub use collection::RemoteCollection;
pub use document::{CollectionPath, Document, DocumentPath, FieldFilter, RemoteDocument, RemoteEntity};
pub use error::{RemoteError, RemoteResult};
pub use http::{HttpDocumentStore, ReconnectPolicy};
pub use memory::MemoryDocumentStore;
pub use store::{BatchWrite, DocumentStore, Subscription, WriteBatch, BATCH_LIMIT};
